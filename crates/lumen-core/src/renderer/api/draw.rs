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

//! Indirect drawing types.

use super::buffer::BufferId;
use bytemuck::{Pod, Zeroable};

/// GPU-resident indexed indirect draw command.
///
/// Matches the layout shared by Vulkan, D3D12, Metal and WebGPU for indexed
/// indirect draws.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectCommand {
    /// Number of indices to draw.
    pub index_count: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
    /// First index in the index buffer.
    pub first_index: u32,
    /// Value added to each index before fetching the vertex.
    pub base_vertex: i32,
    /// First instance index; carries the entity offset.
    pub first_instance: u32,
}

/// An opaque handle to a framebuffer owned by the camera layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u64);

/// Parameters of an indexed multi-draw-indirect call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectDraw {
    /// Buffer holding [`DrawIndexedIndirectCommand`]s.
    pub commands: BufferId,
    /// Number of commands to consume from the start of `commands`.
    pub draw_count: u32,
    /// Vertex pool the commands index into.
    pub vertex_buffer: BufferId,
    /// Index pool the commands index into.
    pub index_buffer: BufferId,
}
