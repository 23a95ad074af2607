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

//! Hot-path pipelines built from stages: GPU visibility culling and the
//! indirect mesh pipeline that drives it.

pub mod culling_lane;
pub mod mesh_pipeline;

pub use culling_lane::{CullingConfig, CullingError, VisibilityCulling, VisibleEntities};
pub use mesh_pipeline::{MeshPipeline, MeshPipelineConfig, MeshPipelineError, MeshRef};
