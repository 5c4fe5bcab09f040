// Per-draw data for a single point
//
// Split into the vertex-stage and fragment-stage push-constant blocks.
// Layout is byte-exact with shaders/point.vert and shaders/point.frag:
//   [0, 16)  vec2 position, float size, float padding
//   [16, 32) vec4 color

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};
use std::mem::size_of;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VertexPushConstants {
    pub position: Vec2,
    pub point_size: f32,
    _padding: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FragmentPushConstants {
    pub color: Vec4,
}

/// One renderable point, copied into push constants every draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointRenderData {
    pub vertex: VertexPushConstants,
    pub fragment: FragmentPushConstants,
}

impl PointRenderData {
    pub const VERTEX_SIZE: u32 = size_of::<VertexPushConstants>() as u32;
    pub const FRAGMENT_OFFSET: u32 = Self::VERTEX_SIZE;
    pub const FRAGMENT_SIZE: u32 = size_of::<FragmentPushConstants>() as u32;

    /// `position` in clip space, `point_size` in pixels, `color` as RGBA
    pub fn new(position: Vec2, point_size: f32, color: Vec4) -> Self {
        Self {
            vertex: VertexPushConstants {
                position,
                point_size,
                _padding: 0.0,
            },
            fragment: FragmentPushConstants { color },
        }
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.vertex)
    }

    pub fn fragment_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.fragment)
    }
}

impl Default for PointRenderData {
    fn default() -> Self {
        Self::new(Vec2::ZERO, 1.0, Vec4::ONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn vertex_block_is_16_bytes_with_padding_last() {
        assert_eq!(PointRenderData::VERTEX_SIZE, 16);
        assert_eq!(offset_of!(VertexPushConstants, position), 0);
        assert_eq!(offset_of!(VertexPushConstants, point_size), 8);
        assert_eq!(offset_of!(VertexPushConstants, _padding), 12);
    }

    #[test]
    fn fragment_block_is_one_vec4() {
        assert_eq!(PointRenderData::FRAGMENT_SIZE, 16);
        assert_eq!(offset_of!(FragmentPushConstants, color), 0);
    }

    #[test]
    fn byte_views_match_declared_sizes() {
        let point = PointRenderData::new(Vec2::new(0.25, -0.5), 8.0, Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(point.vertex_bytes().len() as u32, PointRenderData::VERTEX_SIZE);
        assert_eq!(point.fragment_bytes().len() as u32, PointRenderData::FRAGMENT_SIZE);

        let floats: &[f32] = bytemuck::cast_slice(point.vertex_bytes());
        assert_eq!(floats, &[0.25, -0.5, 8.0, 0.0]);
    }
}
