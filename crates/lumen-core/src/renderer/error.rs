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

//! Defines the error type returned by [`GpuDevice`](crate::renderer::GpuDevice) operations.

use crate::renderer::api::{BufferId, FenceId};
use std::fmt;

/// An error related to the creation or use of a GPU resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// The buffer handle does not refer to a live buffer.
    InvalidBuffer(BufferId),
    /// The fence handle does not refer to a live fence.
    InvalidFence(FenceId),
    /// An access went past the end of a buffer.
    OutOfBounds {
        /// The buffer being accessed.
        buffer: BufferId,
        /// First byte of the access.
        offset: u64,
        /// Length of the access in bytes.
        len: u64,
        /// Size of the buffer in bytes.
        size: u64,
    },
    /// The buffer was not created with a usage the operation requires.
    MissingUsage {
        /// The buffer being used.
        buffer: BufferId,
        /// Human-readable name of the missing usage.
        usage: &'static str,
    },
    /// An error originating from the specific graphics backend implementation.
    BackendError(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::InvalidBuffer(id) => write!(f, "Invalid buffer handle {id:?}"),
            ResourceError::InvalidFence(id) => write!(f, "Invalid fence handle {id:?}"),
            ResourceError::OutOfBounds {
                buffer,
                offset,
                len,
                size,
            } => write!(
                f,
                "Access of {len} bytes at offset {offset} is out of bounds for {buffer:?} ({size} bytes)"
            ),
            ResourceError::MissingUsage { buffer, usage } => {
                write!(f, "Buffer {buffer:?} was not created with {usage} usage")
            }
            ResourceError::BackendError(msg) => {
                write!(f, "Backend-specific resource error: {msg}")
            }
        }
    }
}

impl std::error::Error for ResourceError {}
