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

//! CPU/GPU synchronization primitives.

use super::buffer::BufferId;

/// An opaque handle to a GPU fence inserted after previously submitted commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceId(pub u64);

/// The state of a fence as seen by the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// Every command submitted before the fence has completed.
    Signaled,
    /// The GPU has not reached the fence yet.
    Pending,
}

impl FenceStatus {
    /// Convenience check for [`FenceStatus::Signaled`].
    pub fn is_signaled(self) -> bool {
        self == FenceStatus::Signaled
    }
}

/// A persistently mapped, client-visible buffer.
///
/// The mapping is acquired once with
/// [`GpuDevice::map_persistent`](crate::renderer::GpuDevice::map_persistent) and
/// stays valid for the lifetime of the buffer. Reads go through
/// [`GpuDevice::read_mapped`](crate::renderer::GpuDevice::read_mapped), which is
/// bounds-checked against [`MappedBuffer::size`]. Callers are responsible for
/// waiting on the fence that guards the data they read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedBuffer {
    buffer: BufferId,
    size: u64,
}

impl MappedBuffer {
    /// Describes a mapping of `size` bytes over `buffer`. Intended for device implementations.
    pub fn new(buffer: BufferId, size: u64) -> Self {
        Self { buffer, size }
    }

    /// The mapped buffer.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Size of the mapped region in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}
