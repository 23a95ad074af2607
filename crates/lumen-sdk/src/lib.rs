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

//! Public entry point: configuration, logging and the [`RenderEngine`].

mod config;
mod engine;

pub use config::EngineConfig;
pub use engine::RenderEngine;

/// Types most applications need.
pub mod prelude {
    pub use crate::{init_logging, EngineConfig, RenderEngine};
    pub use lumen_control::{FrameReport, FrameTimings};
    pub use lumen_core::math::{BoundingSphere, Mat4, UVec2, Vec3};
    pub use lumen_core::renderer::{
        CameraSnapshot, CameraView, DepthSource, FramebufferId, GpuDevice,
    };
    pub use lumen_core::stage::PipelineId;
    pub use lumen_data::mesh_pool::MeshId;
    pub use lumen_data::EntityHandle;
    pub use lumen_infra::SoftwareDevice;
    pub use lumen_lanes::{MeshPipeline, VisibleEntities};
}

/// Installs `env_logger`, honouring `RUST_LOG` and falling back to `default_filter`.
///
/// Calling it again after a logger is installed has no effect.
pub fn init_logging(default_filter: &str) {
    use env_logger::{Builder, Env};

    let _ = Builder::from_env(Env::default().default_filter_or(default_filter)).try_init();
}
