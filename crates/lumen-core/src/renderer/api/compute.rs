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

//! Defines the compute dispatch contract.
//!
//! A [`ComputeKernel`] is a compute program together with its bound buffers.
//! Devices run it one work group at a time against a [`KernelMemory`] view of
//! their buffers, which only offers the operations a shader has: loads, stores
//! and 32-bit atomic adds.

use super::buffer::BufferId;
use crate::renderer::error::ResourceError;
use bytemuck::Pod;

/// Storage access granted to a kernel while one of its work groups runs.
pub trait KernelMemory {
    /// Copies `dst.len()` bytes starting at `offset` of `buffer` into `dst`.
    fn load(&self, buffer: BufferId, offset: u64, dst: &mut [u8]) -> Result<(), ResourceError>;

    /// Writes `src` into `buffer` starting at `offset`.
    fn store(&mut self, buffer: BufferId, offset: u64, src: &[u8]) -> Result<(), ResourceError>;

    /// Atomically adds `value` to the `u32` at `offset` and returns the previous value.
    fn atomic_add_u32(
        &mut self,
        buffer: BufferId,
        offset: u64,
        value: u32,
    ) -> Result<u32, ResourceError>;
}

/// A compute program bound to its resources.
pub trait ComputeKernel {
    /// Debug label, used by backends for pipeline lookup and by logs.
    fn label(&self) -> &str;

    /// Number of invocations per work group.
    fn workgroup_size(&self) -> u32;

    /// Runs every invocation of work group `workgroup`.
    ///
    /// Work-group-shared state lives on the stack of this call; it is the
    /// equivalent of `var<workgroup>` storage in a shader.
    fn run_workgroup(
        &self,
        workgroup: u32,
        memory: &mut dyn KernelMemory,
    ) -> Result<(), ResourceError>;
}

/// Loads element `index` of a buffer viewed as an array of `T`.
pub fn load_pod<T: Pod>(
    memory: &dyn KernelMemory,
    buffer: BufferId,
    index: u64,
) -> Result<T, ResourceError> {
    let mut value = T::zeroed();
    let stride = std::mem::size_of::<T>() as u64;
    memory.load(buffer, index * stride, bytemuck::bytes_of_mut(&mut value))?;
    Ok(value)
}

/// Stores `value` as element `index` of a buffer viewed as an array of `T`.
pub fn store_pod<T: Pod>(
    memory: &mut dyn KernelMemory,
    buffer: BufferId,
    index: u64,
    value: &T,
) -> Result<(), ResourceError> {
    let stride = std::mem::size_of::<T>() as u64;
    memory.store(buffer, index * stride, bytemuck::bytes_of(value))
}
