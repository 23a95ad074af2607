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

use anyhow::{ensure, Context, Result};
use lumen_data::mesh_pool::MeshPoolDescriptor;
use lumen_lanes::{CullingConfig, MeshPipelineConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine-wide settings, loadable from a RON file.
///
/// Every field has a default, so a file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Budget of the visible-count fence wait, in milliseconds.
    pub fence_timeout_ms: u64,
    /// Invocations per work group of the culling dispatches.
    pub workgroup_size: u32,
    /// Initial capacity of the per-entity buffers.
    pub initial_entity_capacity: u32,
    /// Smallest growth step of the vertex and index pools, in elements.
    pub min_range_growth: u64,
    /// Size of one vertex in the mesh pools, in bytes.
    pub vertex_stride: u64,
    /// Enables occlusion culling against the previous frame's depth.
    pub occlusion: bool,
    /// Default `env_logger` filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fence_timeout_ms: 100,
            workgroup_size: 64,
            initial_entity_capacity: 1024,
            min_range_growth: 1024,
            vertex_stride: 32,
            occlusion: true,
            log_filter: "info".to_owned(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a RON document.
    pub fn from_ron_str(source: &str) -> Result<Self> {
        let config: Self = ron::from_str(source).context("Invalid engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine configuration {}", path.display()))?;
        Self::from_ron_str(&source)
            .with_context(|| format!("Failed to load engine configuration {}", path.display()))
    }

    /// Serializes to human-readable RON.
    pub fn to_ron_string(&self) -> Result<String> {
        let pretty = ron::ser::PrettyConfig::default().indentor("  ".to_string());
        ron::ser::to_string_pretty(self, pretty).context("Failed to serialize engine configuration")
    }

    /// Rejects values the pipelines cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.workgroup_size > 0, "workgroup_size must be at least 1");
        ensure!(self.vertex_stride > 0, "vertex_stride must be at least 1");
        ensure!(self.min_range_growth > 0, "min_range_growth must be at least 1");
        Ok(())
    }

    /// Fence wait budget as a duration.
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// Settings for one mesh pipeline.
    pub fn mesh_pipeline_config(&self) -> MeshPipelineConfig {
        MeshPipelineConfig {
            culling: CullingConfig {
                workgroup_size: self.workgroup_size,
                fence_timeout: self.fence_timeout(),
                occlusion: self.occlusion,
                initial_capacity: self.initial_entity_capacity,
            },
            initial_entity_capacity: self.initial_entity_capacity,
            mesh_pool: MeshPoolDescriptor {
                vertex_stride: self.vertex_stride,
                min_growth: self.min_range_growth,
                ..MeshPoolDescriptor::default()
            },
        }
    }
}
