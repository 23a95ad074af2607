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

//! The dense entity table and the attribute buffers aligned with it.

use super::{AttributeBuffer, BufferError, GpuAttributeBuffer};
use crate::allocators::{EntityHandle, SlotAllocator};
use bytemuck::Pod;
use lumen_core::renderer::GpuDevice;
use std::cell::Cell;
use std::rc::Rc;

/// Index of a buffer registered with an [`EntityBufferManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeSlot(usize);

/// Which half of the per-frame buffer update to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    /// Apply pending deletions: compact the slot table and replay the moves
    /// into every buffer.
    Compact,
    /// Upload every buffer's queued CPU edits.
    Flush,
}

/// Counts entities created over the lifetime of the owning context.
///
/// Cloning shares the count; the context that owns the renderer hands a clone
/// to every buffer manager it creates.
#[derive(Debug, Clone, Default)]
pub struct EntityCounter(Rc<Cell<u64>>);

impl EntityCounter {
    /// A counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entities created so far.
    pub fn get(&self) -> u64 {
        self.0.get()
    }

    fn increment(&self) {
        self.0.set(self.0.get() + 1);
    }
}

/// Owns the slot table of one pipeline and keeps its attribute buffers in lockstep.
pub struct EntityBufferManager {
    slots: SlotAllocator,
    buffers: Vec<Box<dyn AttributeBuffer>>,
    counter: EntityCounter,
    uploads: u64,
}

impl EntityBufferManager {
    /// Creates an empty manager reporting creations to `counter`.
    pub fn new(counter: EntityCounter) -> Self {
        Self {
            slots: SlotAllocator::new(),
            buffers: Vec::new(),
            counter,
            uploads: 0,
        }
    }

    /// Attaches a buffer. It is sized to the current dense range right away.
    pub fn register_buffer(
        &mut self,
        device: &dyn GpuDevice,
        mut buffer: Box<dyn AttributeBuffer>,
    ) -> Result<AttributeSlot, BufferError> {
        buffer.reserve(device, self.slots.dense_len())?;
        log::debug!("Registered attribute buffer '{}'", buffer.label());
        self.buffers.push(buffer);
        Ok(AttributeSlot(self.buffers.len() - 1))
    }

    /// Allocates an entity after making room for it in every buffer.
    pub fn create_entity(&mut self, device: &dyn GpuDevice) -> Result<EntityHandle, BufferError> {
        let dense = self.slots.dense_len();
        for reserved in 0..self.buffers.len() {
            if let Err(e) = self.buffers[reserved].reserve(device, dense + 1) {
                for buffer in &mut self.buffers[..=reserved] {
                    buffer.resize(dense);
                }
                return Err(e);
            }
        }
        let handle = self.slots.new_entity().inspect_err(|_| {
            for buffer in &mut self.buffers {
                buffer.resize(dense);
            }
        })?;
        self.counter.increment();
        Ok(handle)
    }

    /// Marks an entity for removal at the next [`UpdatePhase::Compact`].
    pub fn delete_entity(&mut self, handle: EntityHandle) -> Result<(), BufferError> {
        self.slots.free_entity(handle)?;
        Ok(())
    }

    /// Current offset of a live entity.
    pub fn offset_of(&self, handle: EntityHandle) -> Result<u32, BufferError> {
        Ok(self.slots.offset_of(handle)?)
    }

    /// Number of live entities.
    pub fn live_count(&self) -> u32 {
        self.slots.live_count()
    }

    /// The slot table.
    pub fn slots(&self) -> &SlotAllocator {
        &self.slots
    }

    /// Shared entity creation counter.
    pub fn counter(&self) -> &EntityCounter {
        &self.counter
    }

    /// Uploads issued by every flush so far.
    pub fn upload_count(&self) -> u64 {
        self.uploads
    }

    /// Runs one phase of the per-frame update.
    ///
    /// Returns the number of moves replayed for [`UpdatePhase::Compact`] and
    /// the number of uploads issued for [`UpdatePhase::Flush`]. Running a phase
    /// twice in a row does no further work.
    pub fn update_buffers(
        &mut self,
        device: &dyn GpuDevice,
        phase: UpdatePhase,
    ) -> Result<usize, BufferError> {
        match phase {
            UpdatePhase::Compact => {
                let dense = self.slots.dense_len();
                if let Some(buffer) = self.buffers.iter().find(|b| b.len() != dense) {
                    return Err(misaligned(buffer.label(), buffer.len(), dense));
                }

                let moves = self.slots.compact();
                let live = self.slots.live_count();
                for buffer in &mut self.buffers {
                    buffer.relocate(&moves).inspect_err(|e| {
                        log::error!("Compaction of '{}' failed: {e}", buffer.label());
                    })?;
                    buffer.resize(live);
                }
                Ok(moves.len())
            }
            UpdatePhase::Flush => {
                let mut uploads = 0;
                for buffer in &mut self.buffers {
                    uploads += buffer.flush(device)?;
                }
                self.uploads += uploads as u64;
                Ok(uploads)
            }
        }
    }

    /// Typed access to a registered buffer.
    pub fn buffer<B: AttributeBuffer>(&self, slot: AttributeSlot) -> Result<&B, BufferError> {
        self.buffers
            .get(slot.0)
            .ok_or(BufferError::UnknownAttribute(slot))?
            .as_any()
            .downcast_ref::<B>()
            .ok_or(BufferError::TypeMismatch {
                slot,
                expected: std::any::type_name::<B>(),
            })
    }

    /// Mutable typed access to a registered buffer.
    pub fn buffer_mut<B: AttributeBuffer>(
        &mut self,
        slot: AttributeSlot,
    ) -> Result<&mut B, BufferError> {
        self.buffers
            .get_mut(slot.0)
            .ok_or(BufferError::UnknownAttribute(slot))?
            .as_any_mut()
            .downcast_mut::<B>()
            .ok_or(BufferError::TypeMismatch {
                slot,
                expected: std::any::type_name::<B>(),
            })
    }

    /// Untyped access to a registered buffer.
    pub fn attribute(&self, slot: AttributeSlot) -> Result<&dyn AttributeBuffer, BufferError> {
        self.buffers
            .get(slot.0)
            .map(|buffer| buffer.as_ref())
            .ok_or(BufferError::UnknownAttribute(slot))
    }

    /// Writes one entity's element in a [`GpuAttributeBuffer`].
    pub fn set_attribute<T: Pod>(
        &mut self,
        slot: AttributeSlot,
        handle: EntityHandle,
        value: T,
    ) -> Result<(), BufferError> {
        let offset = self.slots.offset_of(handle)?;
        self.buffer_mut::<GpuAttributeBuffer<T>>(slot)?
            .set(offset, value)
    }

    /// Reads one entity's element from a [`GpuAttributeBuffer`].
    pub fn get_attribute<T: Pod>(
        &self,
        slot: AttributeSlot,
        handle: EntityHandle,
    ) -> Result<T, BufferError> {
        let offset = self.slots.offset_of(handle)?;
        let buffer = self.buffer::<GpuAttributeBuffer<T>>(slot)?;
        buffer
            .get(offset)
            .copied()
            .ok_or_else(|| BufferError::OutOfRange {
                label: buffer.label().to_owned(),
                offset,
                len: buffer.len(),
            })
    }
}

impl std::fmt::Debug for EntityBufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityBufferManager")
            .field("slots", &self.slots)
            .field(
                "buffers",
                &self.buffers.iter().map(|b| b.label()).collect::<Vec<_>>(),
            )
            .field("uploads", &self.uploads)
            .finish()
    }
}

fn misaligned(label: &str, len: u32, expected: u32) -> BufferError {
    log::error!("Attribute buffer '{label}' is misaligned before compaction ({len} != {expected})");
    BufferError::CompactionInconsistency {
        label: label.to_owned(),
        len,
        expected,
    }
}
