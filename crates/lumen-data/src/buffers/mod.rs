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


//! GPU attribute buffers and the entity buffer manager.
//!
//! Every drawable entity owns one element in each registered
//! [`AttributeBuffer`], at the entity's dense offset. The
//! [`EntityBufferManager`] keeps the buffers aligned with its slot table
//! through creation, deletion and the once-per-frame compaction.

mod attribute;
mod error;
mod manager;

pub use attribute::{AttributeBuffer, GpuAttributeBuffer, MIN_ATTRIBUTE_CAPACITY};
pub use error::BufferError;
pub use manager::{AttributeSlot, EntityBufferManager, EntityCounter, UpdatePhase};
