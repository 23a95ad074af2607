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

//! Backend-agnostic rendering API.
//!
//! - **[`buffer`]**: GPU buffer handles, descriptors and usage flags.
//! - **[`sync`]**: fences and persistently mapped readback regions.
//! - **[`compute`]**: compute kernels and the memory view they run against.
//! - **[`draw`]**: indirect draw commands and framebuffer handles.
//! - **[`camera`]**: the camera interface consumed by per-camera stages.

pub mod buffer;
pub mod camera;
pub mod compute;
pub mod draw;
pub mod sync;

pub use buffer::{BufferDescriptor, BufferId, BufferUsage};
pub use camera::{CameraSnapshot, CameraView, DepthSource};
pub use compute::{load_pod, store_pod, ComputeKernel, KernelMemory};
pub use draw::{DrawIndexedIndirectCommand, FramebufferId, IndirectDraw};
pub use sync::{FenceId, FenceStatus, MappedBuffer};
