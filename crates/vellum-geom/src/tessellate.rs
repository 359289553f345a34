// SPDX-License-Identifier: CEPL-1.0
//! Shape → triangle conversion. Pure functions appending into a caller's
//! vertex vec; every call leaves the vec length a multiple of 3.
//!
//! Coordinates are treated mathematically: `y` is the bottom edge and
//! `y + h` the top. The projection decides which way is up on screen.
use std::f32::consts::{FRAC_PI_2, PI};

use glam::Vec2;

use crate::{Color, CornerRadii, Vertex};

/// Axis-aligned box as two triangles, 6 vertices, uniform color.
///
/// Zero- or negative-area boxes append nothing.
pub fn rect(out: &mut Vec<Vertex>, x: f32, y: f32, w: f32, h: f32, color: Color) {
    if w <= 0.0 || h <= 0.0 {
        return;
    }
    let c = color.to_array();
    out.extend_from_slice(&[
        Vertex::new(x, y, c),
        Vertex::new(x + w, y, c),
        Vertex::new(x + w, y + h, c),
        Vertex::new(x, y, c),
        Vertex::new(x + w, y + h, c),
        Vertex::new(x, y + h, c),
    ]);
}

/// One corner of a rounded rectangle: where its arc fans from, where the
/// 90° sweep starts, and the radius used for both axes of the arc.
struct CornerArc {
    center: Vec2,
    start_angle: f32,
    radius: f32,
}

/// Rounded box: four arc fans plus axis-aligned filler rectangles.
///
/// Radii are clamped to half the shorter side before use. `subdivisions`
/// is the wedge count per quarter arc; zero subdivisions (or all-zero
/// radii) degrade to a plain rectangle rather than emitting zero-area
/// triangles.
pub fn round_rect(
    out: &mut Vec<Vertex>,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    radii: CornerRadii,
    subdivisions: u32,
    color: Color,
) {
    if w <= 0.0 || h <= 0.0 {
        return;
    }
    let radii = radii.clamped(w, h);
    if subdivisions == 0 || radii.is_zero() {
        rect(out, x, y, w, h, color);
        return;
    }

    let c = color.to_array();
    let (left, right) = (x, x + w);
    let (bottom, top) = (y, y + h);

    // One descriptor per corner; the start angles tile the four quarter
    // sweeps without gaps (bottom-left 180°, bottom-right 270°,
    // top-right 0°, top-left 90°).
    let corners = [
        CornerArc {
            center: Vec2::new(left + radii.bottom_left, bottom + radii.bottom_left),
            start_angle: PI,
            radius: radii.bottom_left,
        },
        CornerArc {
            center: Vec2::new(right - radii.bottom_right, bottom + radii.bottom_right),
            start_angle: PI * 1.5,
            radius: radii.bottom_right,
        },
        CornerArc {
            center: Vec2::new(right - radii.top_right, top - radii.top_right),
            start_angle: 0.0,
            radius: radii.top_right,
        },
        CornerArc {
            center: Vec2::new(left + radii.top_left, top - radii.top_left),
            start_angle: FRAC_PI_2,
            radius: radii.top_left,
        },
    ];

    for corner in &corners {
        if corner.radius <= 0.0 {
            continue;
        }
        let step = FRAC_PI_2 / subdivisions as f32;
        for i in 0..subdivisions {
            let a0 = corner.start_angle + step * i as f32;
            let a1 = corner.start_angle + step * (i + 1) as f32;
            let p0 = corner.center + corner.radius * Vec2::new(a0.cos(), a0.sin());
            let p1 = corner.center + corner.radius * Vec2::new(a1.cos(), a1.sin());
            out.push(Vertex::new(corner.center.x, corner.center.y, c));
            out.push(Vertex::new(p0.x, p0.y, c));
            out.push(Vertex::new(p1.x, p1.y, c));
        }
    }

    // Filler bounds. Each side pulls in by the larger of its two corner
    // radii so no filler can reach into an arc fan.
    let inner_left = left + radii.top_left.max(radii.bottom_left);
    let inner_right = right - radii.top_right.max(radii.bottom_right);
    let inner_bottom = bottom + radii.bottom_left.max(radii.bottom_right);
    let inner_top = top - radii.top_left.max(radii.top_right);

    // Center plus one filler per edge. rect() drops any that collapse
    // (e.g. the center strip when a radius equals half the height).
    rect(out, inner_left, inner_bottom, inner_right - inner_left, inner_top - inner_bottom, color);
    rect(out, inner_left, bottom, inner_right - inner_left, inner_bottom - bottom, color);
    rect(out, inner_left, inner_top, inner_right - inner_left, top - inner_top, color);
    rect(out, left, inner_bottom, inner_left - left, inner_top - inner_bottom, color);
    rect(out, inner_right, inner_bottom, right - inner_right, inner_top - inner_bottom, color);

    // With unequal adjacent radii the per-side pull-in leaves an L-shaped
    // shoulder next to each smaller arc; patch it with two strips per
    // corner. All eight collapse to nothing for uniform radii.
    let shoulders = [
        // bottom-left
        (left + radii.bottom_left, bottom, inner_left, inner_bottom),
        (left, bottom + radii.bottom_left, left + radii.bottom_left, inner_bottom),
        // bottom-right
        (inner_right, bottom, right - radii.bottom_right, inner_bottom),
        (right - radii.bottom_right, bottom + radii.bottom_right, right, inner_bottom),
        // top-right
        (inner_right, inner_top, right - radii.top_right, top),
        (right - radii.top_right, inner_top, right, top - radii.top_right),
        // top-left
        (left + radii.top_left, inner_top, inner_left, top),
        (left, inner_top, left + radii.top_left, top - radii.top_left),
    ];
    for &(x0, y0, x1, y1) in &shoulders {
        rect(out, x0, y0, x1 - x0, y1 - y0, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Color = Color::white();

    fn tessellated_area(vertices: &[Vertex]) -> f32 {
        assert_eq!(vertices.len() % 3, 0);
        vertices
            .chunks_exact(3)
            .map(|tri| {
                let [a, b, c] = [tri[0].pos, tri[1].pos, tri[2].pos];
                let cross = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
                cross.abs() / 2.0
            })
            .sum()
    }

    fn bounds(vertices: &[Vertex]) -> (f32, f32, f32, f32) {
        let xs = vertices.iter().map(|v| v.pos[0]);
        let ys = vertices.iter().map(|v| v.pos[1]);
        (
            xs.clone().fold(f32::INFINITY, f32::min),
            ys.clone().fold(f32::INFINITY, f32::min),
            xs.fold(f32::NEG_INFINITY, f32::max),
            ys.fold(f32::NEG_INFINITY, f32::max),
        )
    }

    // ── rect ──────────────────────────────────────────────────────────────

    #[test]
    fn rect_emits_two_triangles_covering_the_box() {
        let mut v = Vec::new();
        rect(&mut v, 10.0, 10.0, 100.0, 50.0, WHITE);
        assert_eq!(v.len(), 6);
        assert!((tessellated_area(&v) - 5000.0).abs() < 1e-3);
        assert_eq!(bounds(&v), (10.0, 10.0, 110.0, 60.0));
    }

    #[test]
    fn rect_with_degenerate_size_is_a_noop() {
        let mut v = Vec::new();
        rect(&mut v, 0.0, 0.0, 0.0, 10.0, WHITE);
        rect(&mut v, 0.0, 0.0, 10.0, -1.0, WHITE);
        assert!(v.is_empty());
    }

    // ── round_rect ────────────────────────────────────────────────────────

    #[test]
    fn round_rect_vertex_count_is_fans_plus_fillers() {
        let mut v = Vec::new();
        round_rect(&mut v, 0.0, 0.0, 100.0, 50.0, CornerRadii::all(5.0), 4, WHITE);
        // 4 corners × 4 wedges × 3 vertices + 5 fillers × 6 vertices;
        // uniform radii leave no shoulder strips.
        assert_eq!(v.len(), 4 * 4 * 3 + 5 * 6);
    }

    #[test]
    fn round_rect_zero_subdivisions_degrades_to_rect() {
        let mut v = Vec::new();
        round_rect(&mut v, 0.0, 0.0, 100.0, 50.0, CornerRadii::all(5.0), 0, WHITE);
        assert_eq!(v.len(), 6);
        assert!((tessellated_area(&v) - 5000.0).abs() < 1e-3);
    }

    #[test]
    fn round_rect_zero_radii_degrades_to_rect() {
        let mut v = Vec::new();
        round_rect(&mut v, 0.0, 0.0, 80.0, 40.0, CornerRadii::zero(), 8, WHITE);
        assert_eq!(v.len(), 6);
    }

    #[test]
    fn round_rect_stays_inside_the_box() {
        let mut v = Vec::new();
        round_rect(&mut v, 5.0, 7.0, 60.0, 30.0, CornerRadii::all(10.0), 6, WHITE);
        let (min_x, min_y, max_x, max_y) = bounds(&v);
        assert!(min_x >= 5.0 - 1e-4 && min_y >= 7.0 - 1e-4);
        assert!(max_x <= 65.0 + 1e-4 && max_y <= 37.0 + 1e-4);
    }

    #[test]
    fn round_rect_area_converges_from_below() {
        let (w, h, r) = (100.0f32, 60.0f32, 12.0f32);
        let exact = w * h - (4.0 - PI) * r * r;
        let mut last = 0.0;
        for subdiv in [1u32, 2, 4, 8, 16] {
            let mut v = Vec::new();
            round_rect(&mut v, 0.0, 0.0, w, h, CornerRadii::all(r), subdiv, WHITE);
            let area = tessellated_area(&v);
            assert!(area <= exact + 1e-2, "subdiv {subdiv}: {area} > {exact}");
            assert!(area >= last - 1e-3, "area must not shrink with more wedges");
            last = area;
        }
        // 16 wedges per corner should be well under 0.1% off.
        assert!((last - exact).abs() / exact < 1e-3);
    }

    #[test]
    fn round_rect_oversized_radius_is_clamped_to_half_min_side() {
        // radius > min(w, h) / 2 must behave exactly like radius == h / 2.
        let mut clamped = Vec::new();
        round_rect(&mut clamped, 0.0, 0.0, 100.0, 40.0, CornerRadii::all(500.0), 8, WHITE);
        let mut reference = Vec::new();
        round_rect(&mut reference, 0.0, 0.0, 100.0, 40.0, CornerRadii::all(20.0), 8, WHITE);
        assert_eq!(clamped, reference);
    }

    #[test]
    fn round_rect_with_unequal_radii_covers_full_area() {
        // The shoulder strips must close the gaps next to smaller arcs:
        // total area = box minus the four true corner cuts.
        let (w, h) = (90.0f32, 70.0f32);
        let radii = CornerRadii::new(4.0, 16.0, 8.0, 0.0);
        let mut v = Vec::new();
        round_rect(&mut v, 0.0, 0.0, w, h, radii, 32, WHITE);
        let cut = |r: f32| r * r * (4.0 - PI) / 4.0;
        let exact = w * h - cut(4.0) - cut(16.0) - cut(8.0) - cut(0.0);
        let area = tessellated_area(&v);
        assert!((area - exact).abs() / exact < 1e-3, "{area} vs {exact}");
    }

    #[test]
    fn round_rect_degenerate_size_is_a_noop() {
        let mut v = Vec::new();
        round_rect(&mut v, 0.0, 0.0, -5.0, 10.0, CornerRadii::all(2.0), 4, WHITE);
        assert!(v.is_empty());
    }
}
