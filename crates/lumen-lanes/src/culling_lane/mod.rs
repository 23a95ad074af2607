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

//! GPU visibility culling with a fence-gated count readback.
//!
//! Each frame and camera the lane tests every live entity against the view
//! frustum and, when available, last frame's depth pyramid. It then turns the
//! survivors into indexed indirect draw commands. Everything runs as ordinary
//! stages of the owning pipeline, see [`VisibilityCulling::register_stages`].

mod depth_pyramid;
mod kernels;
mod readback;
mod stages;
mod uniforms;

pub use depth_pyramid::{level_count, level_extent, level_offset, DepthPyramid};
pub use kernels::{CullKernel, DepthReduceKernel, GenerateDrawsKernel};
pub use readback::{CounterReadback, FenceSignaled};
pub use stages::{
    BUILD_DEPTH_PYRAMID, DISPATCH_VISIBILITY_CULLING, DRAW_VISIBLE_ENTITIES, FETCH_VISIBLE_COUNT,
    GENERATE_INDIRECT_DRAWS, READ_BACK_VISIBLE_COUNT, UPDATE_CULLING_DATA, UPLOAD_CAMERA_FRUSTUM,
};
pub use uniforms::{CullingUniforms, FLAG_OCCLUSION};

use lumen_core::renderer::{
    BufferDescriptor, BufferId, BufferUsage, DrawIndexedIndirectCommand, GpuDevice, ResourceError,
};
use lumen_core::stage::StageError;
use lumen_data::buffers::BufferError;
use lumen_data::mesh_pool::MeshPoolError;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Smallest capacity of the per-camera output buffers, in elements.
pub const MIN_OUTPUT_CAPACITY: u32 = 64;

/// Tuning of a [`VisibilityCulling`] lane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullingConfig {
    /// Invocations per work group of every culling dispatch.
    pub workgroup_size: u32,
    /// Longest the count readback may wait before forcing a full sync.
    pub fence_timeout: Duration,
    /// Enables the temporal occlusion test.
    pub occlusion: bool,
    /// Initial capacity of the per-camera output buffers.
    pub initial_capacity: u32,
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self {
            workgroup_size: 64,
            fence_timeout: Duration::from_millis(100),
            occlusion: true,
            initial_capacity: 1024,
        }
    }
}

/// Errors raised by the culling lane.
#[derive(Debug, thiserror::Error)]
pub enum CullingError {
    /// The device rejected a command.
    #[error("device error: {0}")]
    Resource(#[from] ResourceError),
    /// An entity attribute buffer failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),
    /// The mesh pool failed.
    #[error(transparent)]
    MeshPool(#[from] MeshPoolError),
    /// The visible count was fetched without a copy in flight.
    #[error("no visible-count readback is in flight")]
    NoPendingReadback,
    /// A work-group size of zero was configured.
    #[error("culling work groups need at least one invocation")]
    EmptyWorkgroup,
}

impl From<CullingError> for StageError {
    fn from(err: CullingError) -> Self {
        StageError::execution(err)
    }
}

/// Device buffers a pipeline exposes to its culling lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CullingInputs {
    /// Number of live entities; offsets `[0, entity_count)` are tested.
    pub entity_count: u32,
    /// One `Mat4` per entity offset.
    pub transforms: BufferId,
    /// One object-space bounding sphere per entity offset.
    pub bounds: BufferId,
    /// One mesh reference per entity offset.
    pub mesh_refs: BufferId,
    /// Mesh info table indexed by mesh id.
    pub mesh_infos: BufferId,
    /// Shared vertex pool.
    pub vertex_buffer: BufferId,
    /// Shared index pool.
    pub index_buffer: BufferId,
}

/// Implemented by pipelines whose entities the lane culls.
pub trait CullingSource {
    /// The buffers to read this frame.
    fn culling_inputs(&self) -> Result<CullingInputs, CullingError>;
}

/// A device buffer of `T`-sized elements that grows geometrically.
#[derive(Debug)]
pub(crate) struct OutputBuffer {
    buffer: BufferId,
    capacity: u32,
    stride: u64,
}

impl OutputBuffer {
    fn new(
        device: &dyn GpuDevice,
        label: &str,
        stride: u64,
        capacity: u32,
        usage: BufferUsage,
    ) -> Result<Self, ResourceError> {
        let capacity = capacity.max(MIN_OUTPUT_CAPACITY);
        let buffer = device.create_buffer(&BufferDescriptor::new(
            label,
            capacity as u64 * stride,
            usage,
        ))?;
        Ok(Self {
            buffer,
            capacity,
            stride,
        })
    }

    /// Grows to hold at least `required` elements, doubling at least.
    fn ensure(&mut self, device: &dyn GpuDevice, required: u32) -> Result<(), ResourceError> {
        if required <= self.capacity {
            return Ok(());
        }
        let capacity = required
            .max(self.capacity.saturating_mul(2))
            .max(MIN_OUTPUT_CAPACITY);
        device.resize_buffer(self.buffer, capacity as u64 * self.stride)?;
        log::debug!(
            "Grew culling output {:?} from {} to {} elements",
            self.buffer,
            self.capacity,
            capacity
        );
        self.capacity = capacity;
        Ok(())
    }
}

/// Culling results kept per camera across frames.
#[derive(Debug)]
pub(crate) struct CameraCulling {
    visible_ids: OutputBuffer,
    indirect: OutputBuffer,
    entity_count: u32,
    visible_count: u32,
    pyramid: Option<DepthPyramid>,
}

impl CameraCulling {
    fn new(device: &dyn GpuDevice, capacity: u32) -> Result<Self, ResourceError> {
        Ok(Self {
            visible_ids: OutputBuffer::new(
                device,
                "visible-ids",
                std::mem::size_of::<u32>() as u64,
                capacity,
                BufferUsage::STORAGE | BufferUsage::COPY_SRC,
            )?,
            indirect: OutputBuffer::new(
                device,
                "indirect-draws",
                std::mem::size_of::<DrawIndexedIndirectCommand>() as u64,
                capacity,
                BufferUsage::STORAGE | BufferUsage::INDIRECT | BufferUsage::COPY_SRC,
            )?,
            entity_count: 0,
            visible_count: 0,
            pyramid: None,
        })
    }
}

/// What the lane produced for one camera in the last frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleEntities {
    /// Offsets of the visible entities, `count` of them.
    pub visible_ids: BufferId,
    /// One draw command per visible entity.
    pub indirect: BufferId,
    /// Number of visible entities.
    pub count: u32,
}

pub(crate) struct CullingState {
    config: CullingConfig,
    uniforms: BufferId,
    readback: CounterReadback,
    cameras: Vec<Option<CameraCulling>>,
}

impl CullingState {
    fn camera_mut(
        &mut self,
        device: &dyn GpuDevice,
        index: usize,
    ) -> Result<&mut CameraCulling, ResourceError> {
        if self.cameras.len() <= index {
            self.cameras.resize_with(index + 1, || None);
        }
        let slot = &mut self.cameras[index];
        if slot.is_none() {
            log::debug!("Allocating culling outputs for camera {index}");
            *slot = Some(CameraCulling::new(device, self.config.initial_capacity)?);
        }
        slot.as_mut()
            .ok_or_else(|| ResourceError::BackendError(format!("camera {index} has no culling state")))
    }
}

/// Handle to a culling lane. Clones share the same state.
#[derive(Clone)]
pub struct VisibilityCulling {
    state: Rc<RefCell<CullingState>>,
}

impl VisibilityCulling {
    /// Creates the uniform buffer and counter readback on `device`.
    pub fn new(device: &dyn GpuDevice, config: CullingConfig) -> Result<Self, CullingError> {
        if config.workgroup_size == 0 {
            return Err(CullingError::EmptyWorkgroup);
        }
        let uniforms = device.create_buffer(&BufferDescriptor::new(
            "culling-uniforms",
            std::mem::size_of::<CullingUniforms>() as u64,
            BufferUsage::UNIFORM | BufferUsage::STORAGE | BufferUsage::COPY_DST,
        ))?;
        let readback = CounterReadback::new(device)?;
        Ok(Self {
            state: Rc::new(RefCell::new(CullingState {
                config,
                uniforms,
                readback,
                cameras: Vec::new(),
            })),
        })
    }

    /// The lane's configuration.
    pub fn config(&self) -> CullingConfig {
        self.state.borrow().config
    }

    /// Results of the last completed cull for `camera`, if it has been culled.
    pub fn visible_entities(&self, camera: usize) -> Option<VisibleEntities> {
        let state = self.state.borrow();
        let culling = state.cameras.get(camera)?.as_ref()?;
        Some(VisibleEntities {
            visible_ids: culling.visible_ids.buffer,
            indirect: culling.indirect.buffer,
            count: culling.visible_count,
        })
    }

    /// Number of entities that survived the last cull for `camera`.
    pub fn visible_count(&self, camera: usize) -> u32 {
        self.visible_entities(camera).map_or(0, |visible| visible.count)
    }

    /// Pyramid levels currently kept for `camera`.
    pub fn pyramid_levels(&self, camera: usize) -> u32 {
        let state = self.state.borrow();
        state
            .cameras
            .get(camera)
            .and_then(Option::as_ref)
            .and_then(|culling| culling.pyramid.as_ref())
            .map_or(0, DepthPyramid::levels)
    }

    /// Readback waits that ran out of budget so far.
    pub fn fence_timeouts(&self) -> u64 {
        self.state.borrow().readback.timeouts()
    }
}

impl std::fmt::Debug for VisibilityCulling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("VisibilityCulling")
            .field("config", &state.config)
            .field("cameras", &state.cameras.len())
            .finish()
    }
}
