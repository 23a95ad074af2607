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

//! Shared vertex and index pools.
//!
//! Every mesh drawn through multi-draw-indirect lives in the same vertex
//! buffer and the same index buffer. Sub-ranges are handed out by a
//! [`RangeAllocator`] per pool; when a pool runs out the device buffer is
//! resized in place and the allocator continues in the new tail.

use crate::allocators::{RangeAllocator, RangeError};
use crate::buffers::{AttributeBuffer, BufferError, GpuAttributeBuffer};
use bytemuck::{Pod, Zeroable};
use lumen_core::math::BoundingSphere;
use lumen_core::renderer::{BufferDescriptor, BufferId, BufferUsage, GpuDevice, ResourceError};
use std::sync::Arc;

/// Dense identifier of a mesh in a [`MeshPool`]. Freed ids are reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Pod, Zeroable)]
#[repr(transparent)]
pub struct MeshId(pub u32);

/// Per-mesh record read by the indirect draw generation kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct MeshInfo {
    /// First index in the shared index pool.
    pub first_index: u32,
    /// Number of indices; zero for freed meshes.
    pub index_count: u32,
    /// First vertex in the shared vertex pool.
    pub base_vertex: i32,
    /// Keeps `bounds` 16-byte aligned for shader-side structs.
    pub _padding: u32,
    /// Object-space bounding sphere.
    pub bounds: BoundingSphere,
}

/// Errors raised by [`MeshPool`].
#[derive(Debug, thiserror::Error)]
pub enum MeshPoolError {
    /// A pool allocator failed.
    #[error("mesh pool allocation failed: {0}")]
    Range(#[from] RangeError),
    /// The info table failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),
    /// The device rejected an upload.
    #[error("device error: {0}")]
    Resource(#[from] ResourceError),
    /// Vertex type size differs from the pool's stride.
    #[error("vertex stride {actual} does not match the pool stride {expected}")]
    StrideMismatch {
        /// Stride the pool was created with.
        expected: u64,
        /// Size of the supplied vertex type.
        actual: u64,
    },
    /// Meshes need at least one vertex and one index.
    #[error("cannot upload an empty mesh")]
    EmptyMesh,
    /// The id does not name a live mesh.
    #[error("mesh {0:?} does not exist")]
    UnknownMesh(MeshId),
    /// A pool offset or count does not fit the indirect draw command.
    #[error("{field} {value} does not fit an indirect draw command")]
    DrawRangeOverflow {
        /// Which command field overflowed.
        field: &'static str,
        /// The value that did not fit.
        value: u64,
    },
}

#[derive(Debug, Clone, Copy)]
struct MeshAllocation {
    vertex_offset: u64,
    vertex_count: u64,
    index_offset: u64,
    index_count: u64,
}

/// Sizes used when creating a [`MeshPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshPoolDescriptor {
    /// Size of one vertex in bytes.
    pub vertex_stride: u64,
    /// Initial vertex capacity.
    pub vertex_capacity: u64,
    /// Initial index capacity.
    pub index_capacity: u64,
    /// Smallest growth step for either pool, in elements.
    pub min_growth: u64,
}

impl Default for MeshPoolDescriptor {
    fn default() -> Self {
        Self {
            vertex_stride: 32,
            vertex_capacity: 4096,
            index_capacity: 16384,
            min_growth: 1024,
        }
    }
}

/// Vertex pool, index pool and mesh info table.
pub struct MeshPool {
    device: Arc<dyn GpuDevice>,
    vertex_stride: u64,
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    vertices: RangeAllocator,
    indices: RangeAllocator,
    infos: GpuAttributeBuffer<MeshInfo>,
    meshes: Vec<Option<MeshAllocation>>,
    free_ids: Vec<u32>,
}

const INDEX_SIZE: u64 = std::mem::size_of::<u32>() as u64;

impl MeshPool {
    /// Creates the pool buffers on `device`.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        descriptor: MeshPoolDescriptor,
    ) -> Result<Self, MeshPoolError> {
        let vertex_buffer = device.create_buffer(&BufferDescriptor::new(
            "mesh-pool-vertices",
            descriptor.vertex_capacity * descriptor.vertex_stride,
            BufferUsage::VERTEX | BufferUsage::STORAGE | BufferUsage::COPY_DST,
        ))?;
        let index_buffer = device.create_buffer(&BufferDescriptor::new(
            "mesh-pool-indices",
            descriptor.index_capacity * INDEX_SIZE,
            BufferUsage::INDEX | BufferUsage::COPY_DST,
        ))?;

        let vertices = Self::pool_allocator(
            &device,
            vertex_buffer,
            descriptor.vertex_stride,
            descriptor.vertex_capacity,
            descriptor.min_growth,
        );
        let indices = Self::pool_allocator(
            &device,
            index_buffer,
            INDEX_SIZE,
            descriptor.index_capacity,
            descriptor.min_growth,
        );
        let infos = GpuAttributeBuffer::new(device.as_ref(), "mesh-info", 0)?;

        Ok(Self {
            device,
            vertex_stride: descriptor.vertex_stride,
            vertex_buffer,
            index_buffer,
            vertices,
            indices,
            infos,
            meshes: Vec::new(),
            free_ids: Vec::new(),
        })
    }

    fn pool_allocator(
        device: &Arc<dyn GpuDevice>,
        buffer: BufferId,
        stride: u64,
        capacity: u64,
        min_growth: u64,
    ) -> RangeAllocator {
        let device = Arc::clone(device);
        RangeAllocator::with_growth(capacity, min_growth, move |_, new_capacity| {
            device.resize_buffer(buffer, new_capacity * stride)?;
            Ok(())
        })
    }

    /// Uploads a mesh into the pools and records its info.
    pub fn upload_mesh<V: Pod>(
        &mut self,
        vertices: &[V],
        indices: &[u32],
        bounds: BoundingSphere,
    ) -> Result<MeshId, MeshPoolError> {
        let stride = std::mem::size_of::<V>() as u64;
        if stride != self.vertex_stride {
            return Err(MeshPoolError::StrideMismatch {
                expected: self.vertex_stride,
                actual: stride,
            });
        }
        if vertices.is_empty() || indices.is_empty() {
            return Err(MeshPoolError::EmptyMesh);
        }

        let vertex_count = vertices.len() as u64;
        let index_count = indices.len() as u64;
        let vertex_offset = self.vertices.allocate(vertex_count)?;
        let index_offset = match self.indices.allocate(index_count) {
            Ok(offset) => offset,
            Err(e) => {
                self.vertices.free(vertex_offset, vertex_count)?;
                return Err(e.into());
            }
        };
        let (base_vertex, first_index, draw_count) =
            match draw_range(vertex_offset, index_offset, index_count) {
                Ok(range) => range,
                Err(e) => {
                    self.vertices.free(vertex_offset, vertex_count)?;
                    self.indices.free(index_offset, index_count)?;
                    return Err(e);
                }
            };

        self.device.write_buffer(
            self.vertex_buffer,
            vertex_offset * stride,
            bytemuck::cast_slice(vertices),
        )?;
        self.device.write_buffer(
            self.index_buffer,
            index_offset * INDEX_SIZE,
            bytemuck::cast_slice(indices),
        )?;

        let id = match self.free_ids.pop() {
            Some(id) => id,
            None => {
                self.meshes.push(None);
                (self.meshes.len() - 1) as u32
            }
        };
        self.meshes[id as usize] = Some(MeshAllocation {
            vertex_offset,
            vertex_count,
            index_offset,
            index_count,
        });

        self.infos.reserve(self.device.as_ref(), id + 1)?;
        self.infos.set(
            id,
            MeshInfo {
                first_index,
                index_count: draw_count,
                base_vertex,
                _padding: 0,
                bounds,
            },
        )?;

        log::debug!(
            "Uploaded mesh {id}: {vertex_count} vertices at {vertex_offset}, {index_count} indices at {index_offset}"
        );
        Ok(MeshId(id))
    }

    /// Frees a mesh's ranges; its id becomes available again.
    pub fn remove_mesh(&mut self, id: MeshId) -> Result<(), MeshPoolError> {
        let allocation = self
            .meshes
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .ok_or(MeshPoolError::UnknownMesh(id))?;

        self.vertices
            .free(allocation.vertex_offset, allocation.vertex_count)?;
        self.indices
            .free(allocation.index_offset, allocation.index_count)?;
        self.infos.set(id.0, MeshInfo::default())?;
        self.free_ids.push(id.0);
        Ok(())
    }

    /// Info record of a live mesh.
    pub fn mesh_info(&self, id: MeshId) -> Option<MeshInfo> {
        self.meshes.get(id.0 as usize)?.as_ref()?;
        self.infos.get(id.0).copied()
    }

    /// Number of live meshes.
    pub fn mesh_count(&self) -> usize {
        self.meshes.iter().filter(|mesh| mesh.is_some()).count()
    }

    /// Uploads pending info table edits.
    pub fn flush(&mut self) -> Result<usize, MeshPoolError> {
        Ok(self.infos.flush(self.device.as_ref())?)
    }

    /// The shared vertex buffer.
    pub fn vertex_buffer(&self) -> BufferId {
        self.vertex_buffer
    }

    /// The shared index buffer.
    pub fn index_buffer(&self) -> BufferId {
        self.index_buffer
    }

    /// The buffer holding one [`MeshInfo`] per mesh id.
    pub fn info_buffer(&self) -> BufferId {
        self.infos.gpu_buffer()
    }

    /// Vertex pool capacity, in vertices.
    pub fn vertex_capacity(&self) -> u64 {
        self.vertices.capacity()
    }

    /// Index pool capacity, in indices.
    pub fn index_capacity(&self) -> u64 {
        self.indices.capacity()
    }
}

impl std::fmt::Debug for MeshPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshPool")
            .field("vertex_stride", &self.vertex_stride)
            .field("vertices", &self.vertices)
            .field("indices", &self.indices)
            .field("meshes", &self.mesh_count())
            .finish()
    }
}

/// Converts pool offsets into the `(base_vertex, first_index, index_count)` of a draw command.
fn draw_range(
    vertex_offset: u64,
    index_offset: u64,
    index_count: u64,
) -> Result<(i32, u32, u32), MeshPoolError> {
    let overflow = |field, value| MeshPoolError::DrawRangeOverflow { field, value };
    Ok((
        i32::try_from(vertex_offset).map_err(|_| overflow("base vertex", vertex_offset))?,
        u32::try_from(index_offset).map_err(|_| overflow("first index", index_offset))?,
        u32::try_from(index_count).map_err(|_| overflow("index count", index_count))?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use lumen_infra::SoftwareDevice;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    struct Vertex {
        position: [f32; 3],
        normal: [f32; 3],
        uv: [f32; 2],
    }

    fn triangle() -> (Vec<Vertex>, Vec<u32>) {
        let vertex = |x: f32| Vertex {
            position: [x, 0.0, 0.0],
            normal: [0.0, 0.0, 1.0],
            uv: [0.0, 0.0],
        };
        (vec![vertex(0.0), vertex(1.0), vertex(2.0)], vec![0, 1, 2])
    }

    fn small_pool(device: &Arc<SoftwareDevice>) -> MeshPool {
        MeshPool::new(
            device.clone(),
            MeshPoolDescriptor {
                vertex_stride: 32,
                vertex_capacity: 4,
                index_capacity: 4,
                min_growth: 2,
            },
        )
        .unwrap()
    }

    #[test]
    fn meshes_are_packed_and_described() {
        let device = Arc::new(SoftwareDevice::new());
        let mut pool = MeshPool::new(device.clone(), MeshPoolDescriptor::default()).unwrap();
        let (vertices, indices) = triangle();
        let bounds = BoundingSphere::new(Vec3::ONE, 2.0);

        let a = pool.upload_mesh(&vertices, &indices, bounds).unwrap();
        let b = pool.upload_mesh(&vertices, &indices, bounds).unwrap();

        let info_b = pool.mesh_info(b).unwrap();
        assert_eq!(a, MeshId(0));
        assert_eq!(info_b.first_index, 3);
        assert_eq!(info_b.base_vertex, 3);
        assert_eq!(info_b.index_count, 3);
        assert_eq!(info_b.bounds, bounds);

        pool.flush().unwrap();
        let gpu: Vec<MeshInfo> = device.read_pod(pool.info_buffer()).unwrap();
        assert_eq!(gpu[1], info_b);
    }

    #[test]
    fn pools_grow_and_keep_earlier_meshes() {
        let device = Arc::new(SoftwareDevice::new());
        let mut pool = small_pool(&device);
        let (vertices, indices) = triangle();

        pool.upload_mesh(&vertices, &indices, BoundingSphere::default())
            .unwrap();
        pool.upload_mesh(&vertices, &indices, BoundingSphere::default())
            .unwrap();
        assert!(pool.vertex_capacity() >= 6);
        assert_eq!(
            device.buffer_size(pool.vertex_buffer()).unwrap(),
            pool.vertex_capacity() * 32
        );

        let stored: Vec<Vertex> = device.read_pod(pool.vertex_buffer()).unwrap();
        assert_eq!(stored[0], vertices[0]);
        assert_eq!(stored[5], vertices[2]);
        let stored: Vec<u32> = device.read_pod(pool.index_buffer()).unwrap();
        assert_eq!(&stored[..6], &[0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn removed_ids_and_ranges_are_reused() {
        let device = Arc::new(SoftwareDevice::new());
        let mut pool = MeshPool::new(device.clone(), MeshPoolDescriptor::default()).unwrap();
        let (vertices, indices) = triangle();

        let a = pool.upload_mesh(&vertices, &indices, BoundingSphere::default()).unwrap();
        pool.upload_mesh(&vertices, &indices, BoundingSphere::default()).unwrap();
        pool.remove_mesh(a).unwrap();
        assert!(pool.mesh_info(a).is_none());
        assert!(matches!(
            pool.remove_mesh(a),
            Err(MeshPoolError::UnknownMesh(_))
        ));

        let c = pool.upload_mesh(&vertices, &indices, BoundingSphere::default()).unwrap();
        assert_eq!(c, a);
        assert_eq!(pool.mesh_info(c).unwrap().first_index, 0);
        assert_eq!(pool.mesh_count(), 2);
    }

    #[test]
    fn offsets_past_the_command_range_are_rejected() {
        assert_eq!(draw_range(7, 12, 36).unwrap(), (7, 12, 36));
        assert!(matches!(
            draw_range(1 << 31, 0, 3),
            Err(MeshPoolError::DrawRangeOverflow {
                field: "base vertex",
                ..
            })
        ));
        assert!(matches!(
            draw_range(0, 1 << 32, 3),
            Err(MeshPoolError::DrawRangeOverflow {
                field: "first index",
                value,
            }) if value == 1 << 32
        ));
    }

    #[test]
    fn wrong_stride_is_rejected() {
        let device = Arc::new(SoftwareDevice::new());
        let mut pool = MeshPool::new(device, MeshPoolDescriptor::default()).unwrap();
        assert!(matches!(
            pool.upload_mesh(&[[0.0f32; 3]], &[0], BoundingSphere::default()),
            Err(MeshPoolError::StrideMismatch { expected: 32, actual: 12 })
        ));
    }
}
