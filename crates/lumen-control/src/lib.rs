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


//! # Lumen Control
//!
//! The frame driver. A [`FrameComposer`] owns one
//! [`StageScheduler`](lumen_core::stage::StageScheduler) per render pipeline
//! and advances all of them cooperatively: each tick runs at most one ready
//! stage per pipeline, honouring cross-pipeline barriers, until every
//! pipeline has finished its frame.

#![warn(missing_docs)]

pub mod composer;
pub mod timing;

pub use composer::{FrameComposer, FrameReport, TickReport};
pub use timing::FrameTimings;
