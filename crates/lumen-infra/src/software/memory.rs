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

use lumen_core::renderer::{BufferId, BufferUsage, KernelMemory, ResourceError};
use std::collections::HashMap;
use std::ops::Range;

pub(crate) struct SoftwareBufferEntry {
    pub(crate) label: String,
    pub(crate) usage: BufferUsage,
    pub(crate) data: Vec<u8>,
}

impl SoftwareBufferEntry {
    pub(crate) fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Byte range of an access, bounds-checked.
    pub(crate) fn span(
        &self,
        id: BufferId,
        offset: u64,
        len: u64,
    ) -> Result<Range<usize>, ResourceError> {
        let size = self.size();
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(offset as usize..end as usize),
            _ => Err(ResourceError::OutOfBounds {
                buffer: id,
                offset,
                len,
                size,
            }),
        }
    }

    pub(crate) fn require(
        &self,
        id: BufferId,
        usage: BufferUsage,
        name: &'static str,
    ) -> Result<(), ResourceError> {
        if self.usage.contains(usage) {
            Ok(())
        } else {
            Err(ResourceError::MissingUsage {
                buffer: id,
                usage: name,
            })
        }
    }
}

/// Storage view handed to kernels for the duration of a dispatch.
pub(crate) struct SoftwareKernelMemory<'a> {
    pub(crate) buffers: &'a mut HashMap<BufferId, SoftwareBufferEntry>,
}

impl SoftwareKernelMemory<'_> {
    fn entry_mut(&mut self, id: BufferId) -> Result<&mut SoftwareBufferEntry, ResourceError> {
        self.buffers.get_mut(&id).ok_or(ResourceError::InvalidBuffer(id))
    }
}

impl KernelMemory for SoftwareKernelMemory<'_> {
    fn load(&self, buffer: BufferId, offset: u64, dst: &mut [u8]) -> Result<(), ResourceError> {
        let entry = self
            .buffers
            .get(&buffer)
            .ok_or(ResourceError::InvalidBuffer(buffer))?;
        let span = entry.span(buffer, offset, dst.len() as u64)?;
        dst.copy_from_slice(&entry.data[span]);
        Ok(())
    }

    fn store(&mut self, buffer: BufferId, offset: u64, src: &[u8]) -> Result<(), ResourceError> {
        let entry = self.entry_mut(buffer)?;
        let span = entry.span(buffer, offset, src.len() as u64)?;
        entry.data[span].copy_from_slice(src);
        Ok(())
    }

    fn atomic_add_u32(
        &mut self,
        buffer: BufferId,
        offset: u64,
        value: u32,
    ) -> Result<u32, ResourceError> {
        let entry = self.entry_mut(buffer)?;
        let span = entry.span(buffer, offset, 4)?;
        let bytes = &mut entry.data[span];
        let previous: u32 = bytemuck::pod_read_unaligned(bytes);
        bytes.copy_from_slice(&previous.wrapping_add(value).to_ne_bytes());
        Ok(previous)
    }
}
