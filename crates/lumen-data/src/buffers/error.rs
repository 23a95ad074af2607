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


use super::AttributeSlot;
use crate::allocators::SlotError;
use lumen_core::renderer::ResourceError;

/// Errors raised by attribute buffers and the [`EntityBufferManager`](super::EntityBufferManager).
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// A handle lookup failed.
    #[error(transparent)]
    Slot(#[from] SlotError),
    /// The device rejected a buffer operation.
    #[error("device error: {0}")]
    Resource(#[from] ResourceError),
    /// An attribute buffer is out of step with the slot table it is compacted
    /// against. The frame cannot continue.
    #[error("attribute buffer '{label}' holds {len} elements, compaction needs {expected}")]
    CompactionInconsistency {
        /// Label of the offending buffer.
        label: String,
        /// Its length.
        len: u32,
        /// The length the compaction moves require.
        expected: u32,
    },
    /// No buffer is registered in this slot.
    #[error("no attribute buffer registered in {0:?}")]
    UnknownAttribute(AttributeSlot),
    /// The buffer in this slot is not of the requested type.
    #[error("attribute buffer in {slot:?} is not a {expected}")]
    TypeMismatch {
        /// The slot that was accessed.
        slot: AttributeSlot,
        /// Requested type name.
        expected: &'static str,
    },
    /// An element access went past the buffer's length.
    #[error("offset {offset} is out of range for attribute buffer '{label}' of length {len}")]
    OutOfRange {
        /// Label of the buffer.
        label: String,
        /// Offending offset.
        offset: u32,
        /// Buffer length.
        len: u32,
    },
}
