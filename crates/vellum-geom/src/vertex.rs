// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};

/// One vertex of the batched triangle list.
///
/// Layout is the binary contract with the pipeline: position (2×f32)
/// immediately followed by color (4×f32), tightly packed, no index buffer.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub color: [f32; 4],
}

impl Vertex {
    #[inline]
    pub const fn new(x: f32, y: f32, color: [f32; 4]) -> Self {
        Self { pos: [x, y], color }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        assert_eq!(std::mem::offset_of!(Vertex, pos), 0);
        assert_eq!(std::mem::offset_of!(Vertex, color), 8);
    }
}
