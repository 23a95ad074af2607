// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::depth_pyramid::DepthPyramid;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use lumen_core::math::CLIP_PLANE_COUNT;
use lumen_core::renderer::CameraView;

/// Set in [`CullingUniforms::flags`] when the occlusion test is enabled.
pub const FLAG_OCCLUSION: u32 = 1 << 0;

/// Per-camera constants read by the culling kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CullingUniforms {
    /// Projection-view matrix of this frame.
    pub view_projection: [[f32; 4]; 4],
    /// Projection-view matrix of the previous frame.
    pub previous_view_projection: [[f32; 4]; 4],
    /// Left, right, bottom, top and far planes of this frame.
    pub planes: [[f32; 4]; CLIP_PLANE_COUNT],
    /// Viewport size in pixels.
    pub viewport: [f32; 2],
    /// Size of level 0 of the depth pyramid.
    pub pyramid_size: [u32; 2],
    /// Number of pyramid levels; zero when there is no pyramid.
    pub pyramid_levels: u32,
    /// Number of entities to test.
    pub entity_count: u32,
    /// `FLAG_*` bits.
    pub flags: u32,
    /// Pads the struct to a multiple of 16 bytes.
    pub _padding: u32,
}

impl CullingUniforms {
    /// Packs a camera, optionally with last frame's depth pyramid.
    pub fn new(
        camera: &dyn CameraView,
        entity_count: u32,
        pyramid: Option<&DepthPyramid>,
        occlusion: bool,
    ) -> Self {
        let planes = camera.clip_planes().map(|p| p.to_array());
        let viewport = camera.viewport().as_vec2().to_array();
        let (pyramid_size, pyramid_levels) = pyramid
            .map(|p| ([p.width(), p.height()], p.levels()))
            .unwrap_or(([0, 0], 0));

        Self {
            view_projection: camera.view_projection().to_cols_array_2d(),
            previous_view_projection: camera.previous_view_projection().to_cols_array_2d(),
            planes,
            viewport,
            pyramid_size,
            pyramid_levels,
            entity_count,
            flags: if occlusion && pyramid_levels > 0 {
                FLAG_OCCLUSION
            } else {
                0
            },
            _padding: 0,
        }
    }

    /// Whether the kernel should run the occlusion test.
    pub fn occlusion_enabled(&self) -> bool {
        self.flags & FLAG_OCCLUSION != 0 && self.pyramid_levels > 0
    }

    /// Planes as vectors.
    pub fn planes(&self) -> [Vec4; CLIP_PLANE_COUNT] {
        self.planes.map(Vec4::from_array)
    }

    /// Previous frame's projection-view matrix.
    pub fn previous_view_projection(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.previous_view_projection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::UVec2;
    use lumen_core::renderer::CameraSnapshot;

    #[test]
    fn layout_is_shader_friendly() {
        assert_eq!(std::mem::size_of::<CullingUniforms>() % 16, 0);
    }

    #[test]
    fn occlusion_requires_a_pyramid() {
        let camera = CameraSnapshot::new(Mat4::IDENTITY, UVec2::new(32, 32));
        let uniforms = CullingUniforms::new(&camera, 10, None, true);
        assert!(!uniforms.occlusion_enabled());
        assert_eq!(uniforms.entity_count, 10);
        assert_eq!(uniforms.viewport, [32.0, 32.0]);
    }

    #[test]
    fn planes_survive_packing() {
        let camera = CameraSnapshot::new(Mat4::IDENTITY, UVec2::new(8, 8));
        let planes = CullingUniforms::new(&camera, 1, None, false).planes();
        let left = planes[0];
        let far = planes[4];
        assert_relative_eq!(left.x, 1.0);
        assert_relative_eq!(left.w, 1.0);
        assert_relative_eq!(far.z, -1.0);
        assert_relative_eq!(far.w, 1.0);
    }
}
