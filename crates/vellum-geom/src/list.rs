// SPDX-License-Identifier: CEPL-1.0
use crate::{tessellate, Color, CornerRadii, Vertex};

/// Per-frame batch of tessellated shapes, consumed as one flat triangle
/// list (every 3 consecutive vertices form one triangle).
///
/// The renderer reads `vertices()` during submission and calls `clear()`
/// afterwards; clearing keeps the backing allocation so steady-state
/// frames stop allocating.
#[derive(Debug, Default)]
pub struct DrawList {
    vertices: Vec<Vertex>,
}

impl DrawList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filled axis-aligned rectangle.
    pub fn rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Color) {
        tessellate::rect(&mut self.vertices, x, y, w, h, color);
    }

    /// Filled rounded rectangle; `subdivisions` wedges per corner arc.
    pub fn round_rect(
        &mut self,
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        radii: CornerRadii,
        subdivisions: u32,
        color: Color,
    ) {
        tessellate::round_rect(&mut self.vertices, x, y, w, h, radii, subdivisions, color);
    }

    /// Everything drawn since the last `clear()`, in draw order.
    #[inline]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Empties the batch without releasing capacity. Called once per frame
    /// after the frame's submission has been issued.
    pub fn clear(&mut self) {
        self.vertices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_has_no_vertices() {
        let list = DrawList::new();
        assert!(list.is_empty());
        assert_eq!(list.vertices().len(), 0);
    }

    #[test]
    fn length_is_always_a_multiple_of_three() {
        let mut list = DrawList::new();
        list.rect(0.0, 0.0, 10.0, 10.0, Color::white());
        assert_eq!(list.len() % 3, 0);
        list.round_rect(5.0, 5.0, 40.0, 20.0, CornerRadii::all(3.0), 5, Color::black());
        assert_eq!(list.len() % 3, 0);
        list.round_rect(0.0, 0.0, 8.0, 8.0, CornerRadii::all(2.0), 0, Color::white());
        assert_eq!(list.len() % 3, 0);
    }

    #[test]
    fn clear_empties_but_keeps_capacity() {
        let mut list = DrawList::new();
        list.rect(0.0, 0.0, 10.0, 10.0, Color::white());
        let cap = list.vertices.capacity();
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.vertices.capacity(), cap);
    }

    #[test]
    fn frame_scenario_draw_present_clear() {
        // One white rectangle is exactly 6 vertices; after the frame the
        // batch starts empty again.
        let mut list = DrawList::new();
        list.rect(10.0, 10.0, 100.0, 50.0, Color::white());
        assert_eq!(list.vertices().len(), 6);
        list.clear();
        assert!(list.is_empty());
    }
}
