// SPDX-License-Identifier: CEPL-1.0

/// Per-corner radii for a rounded rectangle (logical pixels).
///
/// Corners follow CSS convention: top-left, top-right, bottom-right,
/// bottom-left. Each corner has exactly one radius, used for both axes of
/// its arc. Negative values are treated as zero.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct CornerRadii {
    pub top_left: f32,
    pub top_right: f32,
    pub bottom_right: f32,
    pub bottom_left: f32,
}

impl CornerRadii {
    #[inline]
    pub const fn new(top_left: f32, top_right: f32, bottom_right: f32, bottom_left: f32) -> Self {
        Self { top_left, top_right, bottom_right, bottom_left }
    }

    /// Uniform radius on all four corners.
    #[inline]
    pub const fn all(r: f32) -> Self {
        Self { top_left: r, top_right: r, bottom_right: r, bottom_left: r }
    }

    /// No rounding.
    #[inline]
    pub const fn zero() -> Self {
        Self::all(0.0)
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.top_left <= 0.0
            && self.top_right <= 0.0
            && self.bottom_right <= 0.0
            && self.bottom_left <= 0.0
    }

    /// Radii usable for a `w`×`h` rectangle: each corner is floored at zero
    /// and capped at half the shorter side so adjacent arcs cannot overlap
    /// or invert.
    #[inline]
    pub fn clamped(self, w: f32, h: f32) -> Self {
        let cap = w.min(h) / 2.0;
        let clamp = |r: f32| r.clamp(0.0, cap);
        Self {
            top_left: clamp(self.top_left),
            top_right: clamp(self.top_right),
            bottom_right: clamp(self.bottom_right),
            bottom_left: clamp(self.bottom_left),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_caps_at_half_min_dimension() {
        let r = CornerRadii::all(100.0).clamped(40.0, 30.0);
        assert_eq!(r, CornerRadii::all(15.0));
    }

    #[test]
    fn clamped_floors_negative_radii() {
        let r = CornerRadii::new(-5.0, 2.0, 2.0, 2.0).clamped(20.0, 20.0);
        assert_eq!(r.top_left, 0.0);
        assert_eq!(r.top_right, 2.0);
    }

    #[test]
    fn clamped_leaves_small_radii_alone() {
        let r = CornerRadii::all(5.0).clamped(100.0, 50.0);
        assert_eq!(r, CornerRadii::all(5.0));
    }
}
