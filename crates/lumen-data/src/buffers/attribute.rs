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

//! Per-entity attribute storage mirrored between CPU and GPU.

use super::BufferError;
use crate::allocators::SlotMove;
use bytemuck::Pod;
use lumen_core::renderer::{BufferDescriptor, BufferId, BufferUsage, GpuDevice};
use std::any::Any;
use std::collections::BTreeSet;

/// Smallest capacity, in elements, of a GPU attribute buffer.
pub const MIN_ATTRIBUTE_CAPACITY: u32 = 64;

/// The capability set every attribute buffer offers to the entity buffer manager.
///
/// All buffers registered with one manager share the entity offset space: the
/// manager calls [`reserve`](Self::reserve) before handing out a new offset,
/// and [`relocate`](Self::relocate) followed by [`resize`](Self::resize) after
/// each compaction.
pub trait AttributeBuffer: Any {
    /// Debug label.
    fn label(&self) -> &str;

    /// Number of elements, one per dense entity offset.
    fn len(&self) -> u32;

    /// Whether the buffer holds no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements the GPU buffer can hold without growing.
    fn capacity(&self) -> u32;

    /// The device buffer shaders read from.
    fn gpu_buffer(&self) -> BufferId;

    /// Ensures room for `count` elements and extends the length to at least `count`.
    fn reserve(&mut self, device: &dyn GpuDevice, count: u32) -> Result<(), BufferError>;

    /// Sets the length to `count`, truncating or zero-extending.
    fn resize(&mut self, count: u32);

    /// Replays compaction moves, in order.
    ///
    /// A move outside the current length leaves the buffer misaligned with
    /// the slot table and fails with [`BufferError::CompactionInconsistency`].
    fn relocate(&mut self, moves: &[SlotMove]) -> Result<(), BufferError>;

    /// Uploads pending CPU edits. Returns the number of uploads issued.
    fn flush(&mut self, device: &dyn GpuDevice) -> Result<usize, BufferError>;

    /// Upcast for typed access.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for typed access.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// An [`AttributeBuffer`] of plain-old-data elements.
///
/// Edits land in a CPU mirror and mark their offset dirty; [`flush`](AttributeBuffer::flush)
/// merges dirty offsets into contiguous runs and issues one upload per run.
#[derive(Debug)]
pub struct GpuAttributeBuffer<T: Pod> {
    label: String,
    buffer: BufferId,
    capacity: u32,
    data: Vec<T>,
    dirty: BTreeSet<u32>,
}

impl<T: Pod> GpuAttributeBuffer<T> {
    const STRIDE: u64 = std::mem::size_of::<T>() as u64;

    /// Creates a storage buffer with room for `capacity` elements (at least 64).
    pub fn new(
        device: &dyn GpuDevice,
        label: impl Into<String>,
        capacity: u32,
    ) -> Result<Self, BufferError> {
        let label = label.into();
        let capacity = capacity.max(MIN_ATTRIBUTE_CAPACITY);
        let buffer = device.create_buffer(&BufferDescriptor::new(
            &label,
            u64::from(capacity) * Self::STRIDE,
            BufferUsage::STORAGE | BufferUsage::COPY_DST | BufferUsage::COPY_SRC,
        ))?;
        Ok(Self {
            label,
            buffer,
            capacity,
            data: Vec::new(),
            dirty: BTreeSet::new(),
        })
    }

    /// Element at `offset`.
    pub fn get(&self, offset: u32) -> Option<&T> {
        self.data.get(offset as usize)
    }

    /// Overwrites the element at `offset` and queues it for upload.
    pub fn set(&mut self, offset: u32, value: T) -> Result<(), BufferError> {
        let len = self.len();
        let slot = self
            .data
            .get_mut(offset as usize)
            .ok_or_else(|| BufferError::OutOfRange {
                label: self.label.clone(),
                offset,
                len,
            })?;
        *slot = value;
        self.dirty.insert(offset);
        Ok(())
    }

    /// The CPU mirror.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Offsets waiting for upload.
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Releases the device buffer.
    pub fn destroy(self, device: &dyn GpuDevice) -> Result<(), BufferError> {
        device.destroy_buffer(self.buffer)?;
        Ok(())
    }

    fn grow_to(&mut self, device: &dyn GpuDevice, count: u32) -> Result<(), BufferError> {
        let new_capacity = count
            .max(self.capacity.saturating_mul(2))
            .max(MIN_ATTRIBUTE_CAPACITY);
        device.resize_buffer(self.buffer, u64::from(new_capacity) * Self::STRIDE)?;
        log::debug!(
            "Attribute buffer '{}' grew from {} to {} elements",
            self.label,
            self.capacity,
            new_capacity
        );
        self.capacity = new_capacity;
        Ok(())
    }
}

impl<T: Pod> AttributeBuffer for GpuAttributeBuffer<T> {
    fn label(&self) -> &str {
        &self.label
    }

    fn len(&self) -> u32 {
        self.data.len() as u32
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn gpu_buffer(&self) -> BufferId {
        self.buffer
    }

    fn reserve(&mut self, device: &dyn GpuDevice, count: u32) -> Result<(), BufferError> {
        if count > self.capacity {
            self.grow_to(device, count)?;
        }
        let len = self.len();
        if count > len {
            self.data.resize(count as usize, T::zeroed());
            self.dirty.extend(len..count);
        }
        Ok(())
    }

    fn resize(&mut self, count: u32) {
        let len = self.len();
        self.data.resize(count as usize, T::zeroed());
        if count < len {
            self.dirty.retain(|offset| *offset < count);
        } else {
            self.dirty.extend(len..count);
        }
    }

    fn relocate(&mut self, moves: &[SlotMove]) -> Result<(), BufferError> {
        let len = self.len();
        if let Some(bad) = moves.iter().find(|m| m.from >= len || m.to >= len) {
            return Err(BufferError::CompactionInconsistency {
                label: self.label.clone(),
                len,
                expected: bad.from.max(bad.to) + 1,
            });
        }
        for m in moves {
            self.data[m.to as usize] = self.data[m.from as usize];
            self.dirty.insert(m.to);
        }
        Ok(())
    }

    fn flush(&mut self, device: &dyn GpuDevice) -> Result<usize, BufferError> {
        if self.dirty.is_empty() {
            return Ok(0);
        }
        if self.len() > self.capacity {
            self.grow_to(device, self.len())?;
        }

        let mut uploads = 0;
        let mut offsets = self.dirty.iter().copied().peekable();
        while let Some(start) = offsets.next() {
            let mut end = start + 1;
            while offsets.peek() == Some(&end) {
                offsets.next();
                end += 1;
            }
            let run = &self.data[start as usize..end as usize];
            device.write_buffer(
                self.buffer,
                u64::from(start) * Self::STRIDE,
                bytemuck::cast_slice(run),
            )?;
            uploads += 1;
        }
        self.dirty.clear();
        Ok(uploads)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_infra::SoftwareDevice;

    #[test]
    fn flush_merges_dirty_offsets_into_runs() {
        let device = SoftwareDevice::new();
        let mut buffer = GpuAttributeBuffer::<u32>::new(&device, "ids", 0).unwrap();
        buffer.reserve(&device, 10).unwrap();
        buffer.flush(&device).unwrap();

        for offset in [1, 2, 3, 7, 8] {
            buffer.set(offset, offset * 10).unwrap();
        }
        let before = device.stats().buffer_writes;
        assert_eq!(buffer.flush(&device).unwrap(), 2);
        assert_eq!(device.stats().buffer_writes - before, 2);

        let gpu: Vec<u32> = device.read_pod(buffer.gpu_buffer()).unwrap();
        assert_eq!(&gpu[..10], &[0, 10, 20, 30, 0, 0, 0, 70, 80, 0]);
        assert_eq!(buffer.flush(&device).unwrap(), 0);
    }

    #[test]
    fn destroy_releases_the_device_buffer() {
        let device = SoftwareDevice::new();
        let buffer = GpuAttributeBuffer::<u32>::new(&device, "ids", 4).unwrap();
        let id = buffer.gpu_buffer();
        buffer.destroy(&device).unwrap();
        assert!(device.read_buffer(id).is_err());
    }

    #[test]
    fn capacity_doubles_and_keeps_content() {
        let device = SoftwareDevice::new();
        let mut buffer = GpuAttributeBuffer::<u32>::new(&device, "ids", 0).unwrap();
        assert_eq!(buffer.capacity(), MIN_ATTRIBUTE_CAPACITY);

        buffer.reserve(&device, 64).unwrap();
        buffer.set(63, 7).unwrap();
        buffer.flush(&device).unwrap();

        buffer.reserve(&device, 65).unwrap();
        assert_eq!(buffer.capacity(), 128);
        assert_eq!(
            device.buffer_size(buffer.gpu_buffer()).unwrap(),
            128 * std::mem::size_of::<u32>() as u64
        );
        let gpu: Vec<u32> = device.read_pod(buffer.gpu_buffer()).unwrap();
        assert_eq!(gpu[63], 7);
    }

    #[test]
    fn relocate_copies_in_order_and_marks_destinations() {
        let device = SoftwareDevice::new();
        let mut buffer = GpuAttributeBuffer::<u32>::new(&device, "ids", 0).unwrap();
        buffer.reserve(&device, 5).unwrap();
        for offset in 0..5 {
            buffer.set(offset, offset).unwrap();
        }
        buffer.flush(&device).unwrap();

        buffer
            .relocate(&[SlotMove { from: 4, to: 1 }, SlotMove { from: 3, to: 0 }])
            .unwrap();
        buffer.resize(3);
        assert_eq!(buffer.as_slice(), &[3, 4, 2]);
        assert_eq!(buffer.dirty_len(), 2);
    }

    #[test]
    fn relocate_rejects_moves_past_the_end() {
        let device = SoftwareDevice::new();
        let mut buffer = GpuAttributeBuffer::<u32>::new(&device, "ids", 0).unwrap();
        buffer.reserve(&device, 3).unwrap();
        for offset in 0..3 {
            buffer.set(offset, 100 + offset).unwrap();
        }
        buffer.flush(&device).unwrap();

        let error = buffer
            .relocate(&[SlotMove { from: 7, to: 1 }])
            .unwrap_err();
        assert!(matches!(
            error,
            BufferError::CompactionInconsistency {
                len: 3,
                expected: 8,
                ..
            }
        ));
        assert_eq!(buffer.as_slice(), &[100, 101, 102]);
        assert_eq!(buffer.dirty_len(), 0);
    }

    #[test]
    fn out_of_range_set_fails() {
        let device = SoftwareDevice::new();
        let mut buffer = GpuAttributeBuffer::<u32>::new(&device, "ids", 0).unwrap();
        assert!(matches!(
            buffer.set(0, 1),
            Err(BufferError::OutOfRange { offset: 0, len: 0, .. })
        ));
    }
}
