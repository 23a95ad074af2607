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


//! # Lumen Data
//!
//! CPU-side bookkeeping for GPU-resident data:
//!
//! - [`allocators`]: the entity [`SlotAllocator`](allocators::SlotAllocator)
//!   and the first-fit [`RangeAllocator`](allocators::RangeAllocator).
//! - [`buffers`]: attribute buffers kept aligned with the entity table.
//! - [`mesh_pool`]: shared vertex and index pools plus the per-mesh info table.

#![warn(missing_docs)]

pub mod allocators;
pub mod buffers;
pub mod mesh_pool;

pub use allocators::{EntityHandle, SlotMove};
pub use buffers::{EntityBufferManager, EntityCounter, UpdatePhase};
