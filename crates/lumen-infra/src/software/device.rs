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

use super::memory::{SoftwareBufferEntry, SoftwareKernelMemory};
use bytemuck::Pod;
use lumen_core::renderer::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct SoftwareFenceEntry {
    /// Polls left before the fence reports signaled.
    remaining_polls: u32,
    /// Set by `finish` and successful waits.
    forced: bool,
}

/// A draw issued through [`GpuDevice::draw_indexed_indirect`].
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    /// The draw parameters.
    pub draw: IndirectDraw,
    /// Framebuffer bound when the draw was issued.
    pub framebuffer: Option<FramebufferId>,
    /// The commands consumed, read back at submission.
    pub commands: Vec<DrawIndexedIndirectCommand>,
}

/// Counters describing the work a [`SoftwareDevice`] has executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Calls to `write_buffer`.
    pub buffer_writes: u64,
    /// Bytes uploaded through `write_buffer`.
    pub bytes_written: u64,
    /// Buffer-to-buffer copies.
    pub copies: u64,
    /// Compute dispatches.
    pub dispatches: u64,
    /// Work groups executed across all dispatches.
    pub workgroups: u64,
    /// Fences inserted.
    pub fences_inserted: u64,
    /// Full synchronizations through `finish`.
    pub finishes: u64,
    /// Memory barriers.
    pub memory_barriers: u64,
    /// Indirect draws.
    pub draws: u64,
    /// Buffers currently alive.
    pub live_buffers: usize,
    /// Bytes currently allocated.
    pub allocated_bytes: usize,
    /// Highest value `allocated_bytes` has reached.
    pub peak_allocated_bytes: u64,
}

struct SoftwareDeviceInternal {
    buffers: Mutex<HashMap<BufferId, SoftwareBufferEntry>>,
    fences: Mutex<HashMap<FenceId, SoftwareFenceEntry>>,
    bound_framebuffer: Mutex<Option<FramebufferId>>,
    draw_log: Mutex<Vec<DrawRecord>>,

    next_buffer_id: AtomicUsize,
    next_fence_id: AtomicU64,

    fence_latency: AtomicU32,
    stalled: AtomicBool,

    allocated_bytes: AtomicUsize,
    peak_allocated_bytes: AtomicU64,
    buffer_writes: AtomicU64,
    bytes_written: AtomicU64,
    copies: AtomicU64,
    dispatches: AtomicU64,
    workgroups: AtomicU64,
    fences_inserted: AtomicU64,
    finishes: AtomicU64,
    memory_barriers: AtomicU64,
    draws: AtomicU64,
}

/// A [`GpuDevice`] that executes everything in host memory.
///
/// Commands run synchronously on the calling thread, but fences keep GPU-like
/// timing: a new fence reports [`FenceStatus::Pending`] for a configurable
/// number of polls before it signals. A stalled device never signals fences on
/// its own; only [`GpuDevice::finish`] releases them.
///
/// Cloning yields another handle to the same device.
#[derive(Clone)]
pub struct SoftwareDevice {
    internal: Arc<SoftwareDeviceInternal>,
}

impl SoftwareDevice {
    /// Creates a device whose fences signal on first poll.
    pub fn new() -> Self {
        Self {
            internal: Arc::new(SoftwareDeviceInternal {
                buffers: Mutex::new(HashMap::new()),
                fences: Mutex::new(HashMap::new()),
                bound_framebuffer: Mutex::new(None),
                draw_log: Mutex::new(Vec::new()),
                next_buffer_id: AtomicUsize::new(0),
                next_fence_id: AtomicU64::new(1),
                fence_latency: AtomicU32::new(0),
                stalled: AtomicBool::new(false),
                allocated_bytes: AtomicUsize::new(0),
                peak_allocated_bytes: AtomicU64::new(0),
                buffer_writes: AtomicU64::new(0),
                bytes_written: AtomicU64::new(0),
                copies: AtomicU64::new(0),
                dispatches: AtomicU64::new(0),
                workgroups: AtomicU64::new(0),
                fences_inserted: AtomicU64::new(0),
                finishes: AtomicU64::new(0),
                memory_barriers: AtomicU64::new(0),
                draws: AtomicU64::new(0),
            }),
        }
    }

    /// Makes new fences stay pending for `polls` status queries.
    pub fn with_fence_latency(self, polls: u32) -> Self {
        self.set_fence_latency(polls);
        self
    }

    /// Changes the latency applied to fences inserted from now on.
    pub fn set_fence_latency(&self, polls: u32) {
        self.internal.fence_latency.store(polls, Ordering::Relaxed);
    }

    /// Simulates a hung GPU: fences stop signaling until `finish`.
    pub fn set_stalled(&self, stalled: bool) {
        self.internal.stalled.store(stalled, Ordering::Relaxed);
    }

    /// Snapshot of the work counters.
    pub fn stats(&self) -> DeviceStats {
        let internal = &self.internal;
        DeviceStats {
            buffer_writes: internal.buffer_writes.load(Ordering::Relaxed),
            bytes_written: internal.bytes_written.load(Ordering::Relaxed),
            copies: internal.copies.load(Ordering::Relaxed),
            dispatches: internal.dispatches.load(Ordering::Relaxed),
            workgroups: internal.workgroups.load(Ordering::Relaxed),
            fences_inserted: internal.fences_inserted.load(Ordering::Relaxed),
            finishes: internal.finishes.load(Ordering::Relaxed),
            memory_barriers: internal.memory_barriers.load(Ordering::Relaxed),
            draws: internal.draws.load(Ordering::Relaxed),
            live_buffers: internal.buffers.lock().len(),
            allocated_bytes: internal.allocated_bytes.load(Ordering::Relaxed),
            peak_allocated_bytes: internal.peak_allocated_bytes.load(Ordering::Relaxed),
        }
    }

    /// Framebuffer currently bound.
    pub fn bound_framebuffer(&self) -> Option<FramebufferId> {
        *self.internal.bound_framebuffer.lock()
    }

    /// Removes and returns every draw recorded so far.
    pub fn take_draw_log(&self) -> Vec<DrawRecord> {
        std::mem::take(&mut *self.internal.draw_log.lock())
    }

    /// Copies a buffer's entire content, regardless of usage flags.
    pub fn read_buffer(&self, id: BufferId) -> Result<Vec<u8>, ResourceError> {
        self.internal
            .buffers
            .lock()
            .get(&id)
            .map(|entry| entry.data.clone())
            .ok_or(ResourceError::InvalidBuffer(id))
    }

    /// Reads a buffer as an array of `T`.
    pub fn read_pod<T: Pod>(&self, id: BufferId) -> Result<Vec<T>, ResourceError> {
        let bytes = self.read_buffer(id)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    /// Label a buffer was created with.
    pub fn buffer_label(&self, id: BufferId) -> Option<String> {
        self.internal
            .buffers
            .lock()
            .get(&id)
            .map(|entry| entry.label.clone())
    }

    fn track_allocation(&self, added: usize, removed: usize) {
        let internal = &self.internal;
        internal.allocated_bytes.fetch_add(added, Ordering::Relaxed);
        internal.allocated_bytes.fetch_sub(removed, Ordering::Relaxed);
        let current = internal.allocated_bytes.load(Ordering::Relaxed) as u64;
        internal
            .peak_allocated_bytes
            .fetch_max(current, Ordering::Relaxed);
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SoftwareDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareDevice")
            .field("stats", &self.stats())
            .field(
                "fence_latency",
                &self.internal.fence_latency.load(Ordering::Relaxed),
            )
            .field("stalled", &self.internal.stalled.load(Ordering::Relaxed))
            .finish()
    }
}

impl GpuDevice for SoftwareDevice {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        let id = BufferId(
            self.internal
                .next_buffer_id
                .fetch_add(1, Ordering::Relaxed),
        );
        let label = descriptor.label.as_deref().unwrap_or_default().to_owned();
        log::debug!(
            "SoftwareDevice: Created buffer '{}' with ID: {:?}, size: {} bytes",
            label,
            id,
            descriptor.size
        );

        self.internal.buffers.lock().insert(
            id,
            SoftwareBufferEntry {
                label,
                usage: descriptor.usage,
                data: vec![0; descriptor.size as usize],
            },
        );
        self.track_allocation(descriptor.size as usize, 0);
        Ok(id)
    }

    fn resize_buffer(&self, id: BufferId, new_size: u64) -> Result<(), ResourceError> {
        let mut buffers = self.internal.buffers.lock();
        let entry = buffers.get_mut(&id).ok_or(ResourceError::InvalidBuffer(id))?;
        let old_size = entry.data.len();
        entry.data.resize(new_size as usize, 0);
        drop(buffers);

        self.track_allocation(new_size as usize, old_size);
        log::debug!("SoftwareDevice: Resized buffer {id:?} from {old_size} to {new_size} bytes");
        Ok(())
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        let entry = self
            .internal
            .buffers
            .lock()
            .remove(&id)
            .ok_or(ResourceError::InvalidBuffer(id))?;
        self.track_allocation(0, entry.data.len());
        Ok(())
    }

    fn buffer_size(&self, id: BufferId) -> Result<u64, ResourceError> {
        self.internal
            .buffers
            .lock()
            .get(&id)
            .map(SoftwareBufferEntry::size)
            .ok_or(ResourceError::InvalidBuffer(id))
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let mut buffers = self.internal.buffers.lock();
        let entry = buffers.get_mut(&id).ok_or(ResourceError::InvalidBuffer(id))?;
        entry.require(id, BufferUsage::COPY_DST, "COPY_DST")?;
        let span = entry.span(id, offset, data.len() as u64)?;
        entry.data[span].copy_from_slice(data);

        self.internal.buffer_writes.fetch_add(1, Ordering::Relaxed);
        self.internal
            .bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn copy_buffer_to_buffer(
        &self,
        source: BufferId,
        source_offset: u64,
        destination: BufferId,
        destination_offset: u64,
        size: u64,
    ) -> Result<(), ResourceError> {
        let mut buffers = self.internal.buffers.lock();

        let src = buffers
            .get(&source)
            .ok_or(ResourceError::InvalidBuffer(source))?;
        src.require(source, BufferUsage::COPY_SRC, "COPY_SRC")?;
        let bytes = src.data[src.span(source, source_offset, size)?].to_vec();

        let dst = buffers
            .get_mut(&destination)
            .ok_or(ResourceError::InvalidBuffer(destination))?;
        dst.require(destination, BufferUsage::COPY_DST, "COPY_DST")?;
        let span = dst.span(destination, destination_offset, size)?;
        dst.data[span].copy_from_slice(&bytes);

        self.internal.copies.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn map_persistent(&self, id: BufferId) -> Result<MappedBuffer, ResourceError> {
        let buffers = self.internal.buffers.lock();
        let entry = buffers.get(&id).ok_or(ResourceError::InvalidBuffer(id))?;
        entry.require(id, BufferUsage::MAP_READ, "MAP_READ")?;
        Ok(MappedBuffer::new(id, entry.size()))
    }

    fn read_mapped(
        &self,
        mapping: &MappedBuffer,
        offset: u64,
        dst: &mut [u8],
    ) -> Result<(), ResourceError> {
        let id = mapping.buffer();
        let len = dst.len() as u64;
        if offset.checked_add(len).map_or(true, |end| end > mapping.size()) {
            return Err(ResourceError::OutOfBounds {
                buffer: id,
                offset,
                len,
                size: mapping.size(),
            });
        }

        let buffers = self.internal.buffers.lock();
        let entry = buffers.get(&id).ok_or(ResourceError::InvalidBuffer(id))?;
        let span = entry.span(id, offset, len)?;
        dst.copy_from_slice(&entry.data[span]);
        Ok(())
    }

    fn insert_fence(&self) -> Result<FenceId, ResourceError> {
        let id = FenceId(self.internal.next_fence_id.fetch_add(1, Ordering::Relaxed));
        self.internal.fences.lock().insert(
            id,
            SoftwareFenceEntry {
                remaining_polls: self.internal.fence_latency.load(Ordering::Relaxed),
                forced: false,
            },
        );
        self.internal.fences_inserted.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn fence_status(&self, fence: FenceId) -> Result<FenceStatus, ResourceError> {
        let mut fences = self.internal.fences.lock();
        let entry = fences
            .get_mut(&fence)
            .ok_or(ResourceError::InvalidFence(fence))?;

        if entry.forced {
            return Ok(FenceStatus::Signaled);
        }
        if self.internal.stalled.load(Ordering::Relaxed) {
            return Ok(FenceStatus::Pending);
        }
        if entry.remaining_polls == 0 {
            Ok(FenceStatus::Signaled)
        } else {
            entry.remaining_polls -= 1;
            Ok(FenceStatus::Pending)
        }
    }

    fn wait_fence(&self, fence: FenceId, timeout: Duration) -> Result<FenceStatus, ResourceError> {
        {
            let mut fences = self.internal.fences.lock();
            let entry = fences
                .get_mut(&fence)
                .ok_or(ResourceError::InvalidFence(fence))?;
            if entry.forced || !self.internal.stalled.load(Ordering::Relaxed) {
                entry.forced = true;
                return Ok(FenceStatus::Signaled);
            }
        }

        // A stalled device never completes; the caller gets the full timeout.
        std::thread::sleep(timeout);
        Ok(FenceStatus::Pending)
    }

    fn destroy_fence(&self, fence: FenceId) -> Result<(), ResourceError> {
        self.internal
            .fences
            .lock()
            .remove(&fence)
            .map(|_| ())
            .ok_or(ResourceError::InvalidFence(fence))
    }

    fn finish(&self) {
        for entry in self.internal.fences.lock().values_mut() {
            entry.forced = true;
        }
        self.internal.finishes.fetch_add(1, Ordering::Relaxed);
        log::debug!("SoftwareDevice: Full synchronization");
    }

    fn dispatch_compute(
        &self,
        kernel: &dyn ComputeKernel,
        workgroups: u32,
    ) -> Result<(), ResourceError> {
        let mut buffers = self.internal.buffers.lock();
        let mut memory = SoftwareKernelMemory {
            buffers: &mut *buffers,
        };
        for workgroup in 0..workgroups {
            kernel.run_workgroup(workgroup, &mut memory)?;
        }

        self.internal.dispatches.fetch_add(1, Ordering::Relaxed);
        self.internal
            .workgroups
            .fetch_add(u64::from(workgroups), Ordering::Relaxed);
        log::trace!(
            "SoftwareDevice: Dispatched '{}' x{}",
            kernel.label(),
            workgroups
        );
        Ok(())
    }

    fn memory_barrier(&self) {
        self.internal.memory_barriers.fetch_add(1, Ordering::Relaxed);
    }

    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>) {
        *self.internal.bound_framebuffer.lock() = framebuffer;
    }

    fn draw_indexed_indirect(&self, draw: &IndirectDraw) -> Result<(), ResourceError> {
        let commands = {
            let buffers = self.internal.buffers.lock();
            for (id, usage, name) in [
                (draw.vertex_buffer, BufferUsage::VERTEX, "VERTEX"),
                (draw.index_buffer, BufferUsage::INDEX, "INDEX"),
                (draw.commands, BufferUsage::INDIRECT, "INDIRECT"),
            ] {
                buffers
                    .get(&id)
                    .ok_or(ResourceError::InvalidBuffer(id))?
                    .require(id, usage, name)?;
            }

            let entry = buffers
                .get(&draw.commands)
                .ok_or(ResourceError::InvalidBuffer(draw.commands))?;
            let stride = std::mem::size_of::<DrawIndexedIndirectCommand>() as u64;
            let span = entry.span(draw.commands, 0, u64::from(draw.draw_count) * stride)?;
            bytemuck::pod_collect_to_vec::<u8, DrawIndexedIndirectCommand>(&entry.data[span])
        };

        self.internal.draw_log.lock().push(DrawRecord {
            draw: *draw,
            framebuffer: self.bound_framebuffer(),
            commands,
        });
        self.internal.draws.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(device: &SoftwareDevice, size: u64, usage: BufferUsage) -> BufferId {
        device
            .create_buffer(&BufferDescriptor::new("test", size, usage))
            .unwrap()
    }

    #[test]
    fn resize_preserves_content_and_zeroes_the_tail() {
        let device = SoftwareDevice::new();
        let id = buffer(&device, 4, BufferUsage::COPY_DST);
        device.write_buffer(id, 0, &[1, 2, 3, 4]).unwrap();
        device.resize_buffer(id, 8).unwrap();
        assert_eq!(device.read_buffer(id).unwrap(), vec![1, 2, 3, 4, 0, 0, 0, 0]);
        assert_eq!(device.stats().allocated_bytes, 8);
    }

    #[test]
    fn usage_and_bounds_are_validated() {
        let device = SoftwareDevice::new();
        let id = buffer(&device, 4, BufferUsage::STORAGE);
        assert!(matches!(
            device.write_buffer(id, 0, &[0]),
            Err(ResourceError::MissingUsage { .. })
        ));
        assert!(matches!(
            device.map_persistent(id),
            Err(ResourceError::MissingUsage { .. })
        ));

        let writable = buffer(&device, 4, BufferUsage::COPY_DST);
        assert!(matches!(
            device.write_buffer(writable, 2, &[0, 0, 0]),
            Err(ResourceError::OutOfBounds { offset: 2, len: 3, size: 4, .. })
        ));
    }

    #[test]
    fn mapped_reads_see_copied_data() {
        let device = SoftwareDevice::new();
        let src = buffer(&device, 8, BufferUsage::COPY_SRC | BufferUsage::COPY_DST);
        let dst = buffer(&device, 4, BufferUsage::COPY_DST | BufferUsage::MAP_READ);
        device.write_buffer(src, 4, &7u32.to_ne_bytes()).unwrap();
        device.copy_buffer_to_buffer(src, 4, dst, 0, 4).unwrap();

        let mapping = device.map_persistent(dst).unwrap();
        let mut out = [0u8; 4];
        device.read_mapped(&mapping, 0, &mut out).unwrap();
        assert_eq!(u32::from_ne_bytes(out), 7);
        assert!(device.read_mapped(&mapping, 2, &mut out).is_err());
    }

    #[test]
    fn fences_signal_after_latency() {
        let device = SoftwareDevice::new().with_fence_latency(2);
        let fence = device.insert_fence().unwrap();
        assert_eq!(device.fence_status(fence).unwrap(), FenceStatus::Pending);
        assert_eq!(device.fence_status(fence).unwrap(), FenceStatus::Pending);
        assert_eq!(device.fence_status(fence).unwrap(), FenceStatus::Signaled);
        device.destroy_fence(fence).unwrap();
        assert!(device.fence_status(fence).is_err());
    }

    #[test]
    fn stalled_fences_time_out_until_finish() {
        let device = SoftwareDevice::new();
        device.set_stalled(true);
        let fence = device.insert_fence().unwrap();
        assert_eq!(
            device.wait_fence(fence, Duration::from_millis(1)).unwrap(),
            FenceStatus::Pending
        );
        device.finish();
        assert!(device.fence_status(fence).unwrap().is_signaled());
        assert_eq!(device.stats().finishes, 1);
    }

    struct CountKernel {
        counter: BufferId,
    }

    impl ComputeKernel for CountKernel {
        fn label(&self) -> &str {
            "count"
        }

        fn workgroup_size(&self) -> u32 {
            1
        }

        fn run_workgroup(
            &self,
            workgroup: u32,
            memory: &mut dyn KernelMemory,
        ) -> Result<(), ResourceError> {
            memory.atomic_add_u32(self.counter, 0, workgroup + 1)?;
            Ok(())
        }
    }

    #[test]
    fn dispatch_runs_every_workgroup() {
        let device = SoftwareDevice::new();
        let counter = buffer(&device, 4, BufferUsage::STORAGE);
        device
            .dispatch_compute(&CountKernel { counter }, 4)
            .unwrap();
        let values: Vec<u32> = device.read_pod(counter).unwrap();
        assert_eq!(values, vec![10]);
        assert_eq!(device.stats().workgroups, 4);
    }
}
