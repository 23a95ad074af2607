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

//! Compute programs of the culling lane.

use super::depth_pyramid::{level_extent, level_offset};
use super::uniforms::CullingUniforms;
use crate::mesh_pipeline::MeshRef;
use glam::{Mat4, UVec2, Vec2, Vec4};
use lumen_core::math::{clip_planes, project_sphere, sphere_outside_planes, BoundingSphere, CLIP_PLANE_COUNT};
use lumen_core::renderer::{
    load_pod, store_pod, BufferId, ComputeKernel, DrawIndexedIndirectCommand, KernelMemory,
    ResourceError,
};
use lumen_data::mesh_pool::MeshInfo;

/// Frustum and occlusion test, one invocation per entity offset.
///
/// Survivors are gathered per work group and appended to `visible_ids` with a
/// single atomic add on `counter`.
#[derive(Debug)]
pub struct CullKernel {
    /// [`CullingUniforms`] of the current camera.
    pub uniforms: BufferId,
    /// One `Mat4` per entity offset.
    pub transforms: BufferId,
    /// One object-space [`BoundingSphere`] per entity offset.
    pub bounds: BufferId,
    /// Output list of surviving offsets.
    pub visible_ids: BufferId,
    /// `u32` append counter.
    pub counter: BufferId,
    /// Last frame's depth pyramid.
    pub pyramid: Option<BufferId>,
    /// Invocations per work group.
    pub workgroup_size: u32,
}

impl ComputeKernel for CullKernel {
    fn label(&self) -> &str {
        "visibility-culling"
    }

    fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    fn run_workgroup(
        &self,
        workgroup: u32,
        memory: &mut dyn KernelMemory,
    ) -> Result<(), ResourceError> {
        let uniforms: CullingUniforms = load_pod(memory, self.uniforms, 0)?;
        let planes = uniforms.planes();
        let occlusion = match self.pyramid {
            Some(pyramid) if uniforms.occlusion_enabled() => {
                Some(OcclusionTest::new(&uniforms, pyramid))
            }
            _ => None,
        };

        let first = workgroup.saturating_mul(self.workgroup_size);
        let end = first
            .saturating_add(self.workgroup_size)
            .min(uniforms.entity_count);

        let mut survivors = Vec::with_capacity(self.workgroup_size as usize);
        for offset in first..end {
            let transform: Mat4 = load_pod(memory, self.transforms, offset as u64)?;
            let bounds: BoundingSphere = load_pod(memory, self.bounds, offset as u64)?;
            let sphere = bounds.transformed(&transform);

            if sphere_outside_planes(sphere.center(), sphere.radius, &planes) {
                continue;
            }
            if let Some(test) = &occlusion {
                if test.is_occluded(memory, &sphere)? {
                    continue;
                }
            }
            survivors.push(offset);
        }

        if survivors.is_empty() {
            return Ok(());
        }
        let base = memory.atomic_add_u32(self.counter, 0, survivors.len() as u32)?;
        for (i, offset) in survivors.iter().enumerate() {
            store_pod(memory, self.visible_ids, base as u64 + i as u64, offset)?;
        }
        Ok(())
    }
}

/// Conservative test against the max-depth pyramid of the previous frame.
struct OcclusionTest {
    previous: Mat4,
    previous_planes: [Vec4; CLIP_PLANE_COUNT],
    pyramid: BufferId,
    size: UVec2,
    levels: u32,
}

impl OcclusionTest {
    fn new(uniforms: &CullingUniforms, pyramid: BufferId) -> Self {
        let previous = uniforms.previous_view_projection();
        Self {
            previous,
            previous_planes: clip_planes(&previous),
            pyramid,
            size: UVec2::from_array(uniforms.pyramid_size),
            levels: uniforms.pyramid_levels,
        }
    }

    fn is_occluded(
        &self,
        memory: &dyn KernelMemory,
        sphere: &BoundingSphere,
    ) -> Result<bool, ResourceError> {
        let center = sphere.center();
        // Entities that were off screen last frame have no depth to test against.
        if sphere_outside_planes(center, sphere.radius, &self.previous_planes) {
            return Ok(false);
        }
        let Some(rect) = project_sphere(center, sphere.radius, &self.previous) else {
            return Ok(false);
        };
        if !rect.overlaps_viewport() || rect.nearest_depth <= 0.0 {
            return Ok(false);
        }

        let min = rect.min.clamp(Vec2::NEG_ONE, Vec2::ONE);
        let max = rect.max.clamp(Vec2::NEG_ONE, Vec2::ONE);
        let uv_min = Vec2::new(min.x * 0.5 + 0.5, 0.5 - max.y * 0.5);
        let uv_max = Vec2::new(max.x * 0.5 + 0.5, 0.5 - min.y * 0.5);

        let footprint = ((uv_max - uv_min) * self.size.as_vec2()).max_element().max(1.0);
        let level = (footprint.log2().ceil() as u32).min(self.levels - 1);
        let (width, height) = level_extent(self.size.x, self.size.y, level);
        let base = level_offset(self.size.x, self.size.y, level);

        let (x0, x1) = (texel(uv_min.x, width), texel(uv_max.x, width));
        let (y0, y1) = (texel(uv_min.y, height), texel(uv_max.y, height));

        let mut max_depth = 0.0f32;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let depth: f32 =
                    load_pod(memory, self.pyramid, base + y as u64 * width as u64 + x as u64)?;
                max_depth = max_depth.max(depth);
            }
        }
        Ok(rect.nearest_depth > max_depth)
    }
}

fn texel(coord: f32, extent: u32) -> u32 {
    ((coord * extent as f32) as u32).min(extent - 1)
}

/// Turns the visible offsets into indexed indirect draw commands.
///
/// Command `i` draws the entity at `visible_ids[i]`, with the entity offset
/// carried in `first_instance`.
#[derive(Debug)]
pub struct GenerateDrawsKernel {
    /// Surviving offsets written by [`CullKernel`].
    pub visible_ids: BufferId,
    /// Number of valid entries in `visible_ids`.
    pub visible_count: u32,
    /// One [`MeshRef`] per entity offset.
    pub mesh_refs: BufferId,
    /// One [`MeshInfo`] per mesh id.
    pub mesh_infos: BufferId,
    /// Output command buffer.
    pub indirect: BufferId,
    /// Invocations per work group.
    pub workgroup_size: u32,
}

impl ComputeKernel for GenerateDrawsKernel {
    fn label(&self) -> &str {
        "generate-indirect-draws"
    }

    fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    fn run_workgroup(
        &self,
        workgroup: u32,
        memory: &mut dyn KernelMemory,
    ) -> Result<(), ResourceError> {
        let first = workgroup.saturating_mul(self.workgroup_size);
        let end = first
            .saturating_add(self.workgroup_size)
            .min(self.visible_count);

        for slot in first..end {
            let offset: u32 = load_pod(memory, self.visible_ids, slot as u64)?;
            let mesh: MeshRef = load_pod(memory, self.mesh_refs, offset as u64)?;
            let command = match mesh.mesh() {
                Some(id) => {
                    let info: MeshInfo = load_pod(memory, self.mesh_infos, id.0 as u64)?;
                    DrawIndexedIndirectCommand {
                        index_count: info.index_count,
                        instance_count: u32::from(info.index_count > 0),
                        first_index: info.first_index,
                        base_vertex: info.base_vertex,
                        first_instance: offset,
                    }
                }
                None => DrawIndexedIndirectCommand {
                    first_instance: offset,
                    ..Default::default()
                },
            };
            store_pod(memory, self.indirect, slot as u64, &command)?;
        }
        Ok(())
    }
}

/// Builds one pyramid level from the level above it, keeping the farthest depth.
#[derive(Debug)]
pub struct DepthReduceKernel {
    /// Buffer holding every level.
    pub pyramid: BufferId,
    /// Width of level 0.
    pub width: u32,
    /// Height of level 0.
    pub height: u32,
    /// Level written by this dispatch; reads `level - 1`.
    pub level: u32,
    /// Invocations per work group.
    pub workgroup_size: u32,
}

impl ComputeKernel for DepthReduceKernel {
    fn label(&self) -> &str {
        "depth-pyramid-reduce"
    }

    fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    fn run_workgroup(
        &self,
        workgroup: u32,
        memory: &mut dyn KernelMemory,
    ) -> Result<(), ResourceError> {
        let (sw, sh) = level_extent(self.width, self.height, self.level - 1);
        let (dw, dh) = level_extent(self.width, self.height, self.level);
        let source_base = level_offset(self.width, self.height, self.level - 1);
        let destination_base = level_offset(self.width, self.height, self.level);

        let first = workgroup.saturating_mul(self.workgroup_size);
        let end = first.saturating_add(self.workgroup_size).min(dw * dh);

        for texel in first..end {
            let (x, y) = (texel % dw, texel / dw);
            let mut depth = 0.0f32;
            for sy in source_span(y, sh, dh) {
                for sx in source_span(x, sw, dw) {
                    let value: f32 =
                        load_pod(memory, self.pyramid, source_base + sy as u64 * sw as u64 + sx as u64)?;
                    depth = depth.max(value);
                }
            }
            store_pod(memory, self.pyramid, destination_base + texel as u64, &depth)?;
        }
        Ok(())
    }
}

/// Source texels covered by destination texel `i`, rounded outwards.
fn source_span(i: u32, source: u32, destination: u32) -> std::ops::Range<u32> {
    let start = i * source / destination;
    let end = ((i + 1) * source).div_ceil(destination).min(source);
    start..end.max(start + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_sizes_are_covered_conservatively() {
        assert_eq!(source_span(0, 5, 2), 0..3);
        assert_eq!(source_span(1, 5, 2), 2..5);
        assert_eq!(source_span(0, 1, 1), 0..1);
        assert_eq!(source_span(3, 8, 4), 6..8);
    }

    #[test]
    fn texel_lookup_stays_in_bounds() {
        assert_eq!(texel(0.0, 8), 0);
        assert_eq!(texel(1.0, 8), 7);
        assert_eq!(texel(0.5, 8), 4);
    }
}
