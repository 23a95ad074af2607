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

use crate::renderer::api::*;
use crate::renderer::error::ResourceError;
use std::fmt::Debug;
use std::time::Duration;

/// The graphics-API wrapper as seen by the renderer core.
///
/// Every method takes `&self`; implementations use interior mutability so a
/// device can be shared behind an `Arc` by every pipeline. Commands are
/// asynchronous with respect to the CPU unless stated otherwise: the only
/// blocking calls are [`wait_fence`](GpuDevice::wait_fence) and
/// [`finish`](GpuDevice::finish).
pub trait GpuDevice: Send + Sync + Debug + 'static {
    /// Creates a new GPU buffer, zero-initialized.
    /// ## Arguments
    /// * `descriptor` - Label, size in bytes and usage flags.
    /// ## Returns
    /// The ID of the created buffer.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError>;

    /// Resizes a buffer, preserving the first `min(old, new)` bytes of content.
    /// Newly exposed bytes are zeroed.
    fn resize_buffer(&self, id: BufferId, new_size: u64) -> Result<(), ResourceError>;

    /// Destroys a GPU buffer.
    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError>;

    /// Current size of a buffer in bytes.
    fn buffer_size(&self, id: BufferId) -> Result<u64, ResourceError>;

    /// Uploads `data` into a buffer.
    /// ## Arguments
    /// * `id` - The ID of the buffer to write to.
    /// * `offset` - The byte offset in the buffer where the data will be written.
    /// * `data` - The bytes to upload.
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError>;

    /// Records a GPU-side copy between two buffers.
    fn copy_buffer_to_buffer(
        &self,
        source: BufferId,
        source_offset: u64,
        destination: BufferId,
        destination_offset: u64,
        size: u64,
    ) -> Result<(), ResourceError>;

    /// Maps a `MAP_READ` buffer persistently for CPU reads.
    fn map_persistent(&self, id: BufferId) -> Result<MappedBuffer, ResourceError>;

    /// Reads `dst.len()` bytes at `offset` of a persistently mapped buffer.
    ///
    /// The read is bounds-checked against the mapping. It returns whatever the
    /// memory currently holds; callers must have waited on the fence covering
    /// the writes they expect to see.
    fn read_mapped(
        &self,
        mapping: &MappedBuffer,
        offset: u64,
        dst: &mut [u8],
    ) -> Result<(), ResourceError>;

    /// Inserts a fence after every command submitted so far.
    fn insert_fence(&self) -> Result<FenceId, ResourceError>;

    /// Polls a fence without blocking.
    fn fence_status(&self, fence: FenceId) -> Result<FenceStatus, ResourceError>;

    /// Blocks for at most `timeout` waiting on a fence.
    /// ## Returns
    /// The fence state when the wait ended.
    fn wait_fence(&self, fence: FenceId, timeout: Duration) -> Result<FenceStatus, ResourceError>;

    /// Releases a fence.
    fn destroy_fence(&self, fence: FenceId) -> Result<(), ResourceError>;

    /// Blocks until every submitted command has completed.
    fn finish(&self);

    /// Dispatches `workgroups` work groups of `kernel`.
    fn dispatch_compute(
        &self,
        kernel: &dyn ComputeKernel,
        workgroups: u32,
    ) -> Result<(), ResourceError>;

    /// Makes every prior shader write visible to every later command.
    fn memory_barrier(&self);

    /// Binds a framebuffer for the following draws; `None` binds the default target.
    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>);

    /// Issues an indexed multi-draw-indirect.
    fn draw_indexed_indirect(&self, draw: &IndirectDraw) -> Result<(), ResourceError>;
}
