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

use crate::config::EngineConfig;
use anyhow::{Context, Result};
use lumen_control::{FrameComposer, FrameReport, FrameTimings};
use lumen_core::renderer::{CameraView, GpuDevice};
use lumen_core::stage::PipelineId;
use lumen_data::buffers::EntityCounter;
use lumen_lanes::MeshPipeline;
use std::sync::Arc;

/// Owns the device, the frame composer and every mesh pipeline.
pub struct RenderEngine {
    config: EngineConfig,
    device: Arc<dyn GpuDevice>,
    composer: FrameComposer,
    counter: EntityCounter,
    pipelines: Vec<(PipelineId, MeshPipeline)>,
    frames: u64,
}

impl RenderEngine {
    /// Creates an engine with no pipelines and no cameras.
    pub fn new(device: Arc<dyn GpuDevice>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        log::info!("Render engine starting with {config:?}");
        Ok(Self {
            composer: FrameComposer::new(device.clone()),
            device,
            config,
            counter: EntityCounter::new(),
            pipelines: Vec::new(),
            frames: 0,
        })
    }

    /// Adds a mesh pipeline and registers its stages.
    pub fn add_mesh_pipeline(&mut self, name: &str) -> Result<PipelineId> {
        let pipeline = MeshPipeline::new(
            self.device.clone(),
            self.counter.clone(),
            self.config.mesh_pipeline_config(),
        )
        .with_context(|| format!("Failed to create mesh pipeline '{name}'"))?;

        let id = self.composer.create_pipeline(name);
        let scheduler = self
            .composer
            .pipeline_mut(id)
            .with_context(|| format!("Pipeline '{name}' vanished after creation"))?;
        pipeline
            .register(scheduler)
            .with_context(|| format!("Failed to register the stages of '{name}'"))?;

        self.pipelines.push((id, pipeline));
        Ok(id)
    }

    /// The mesh pipeline created under `id`.
    pub fn mesh_pipeline(&self, id: PipelineId) -> Option<&MeshPipeline> {
        self.pipelines
            .iter()
            .find(|(pipeline_id, _)| *pipeline_id == id)
            .map(|(_, pipeline)| pipeline)
    }

    /// Replaces the cameras rendered from the next frame on.
    pub fn set_cameras(&mut self, cameras: Vec<Box<dyn CameraView>>) {
        self.composer.set_cameras(cameras);
    }

    /// Runs every pipeline through one frame.
    pub fn render_frame(&mut self) -> Result<FrameReport> {
        let report = self
            .composer
            .run_frame()
            .with_context(|| format!("Frame {} failed", self.frames))?;
        self.frames += 1;
        Ok(report)
    }

    /// Logs the per-stage timings of the last frame.
    pub fn log_frame_summary(&self, report: &FrameReport) {
        log::info!(
            "--- Frame {} ({} stages, {} ticks, {} idle) in {:?} ---",
            self.frames.saturating_sub(1),
            report.stages_executed,
            report.ticks,
            report.idle_ticks,
            report.elapsed
        );
        for (stage, duration) in self.composer.timings().per_stage() {
            log::info!("  {stage:<28} {:>9.3} ms", duration.as_secs_f64() * 1000.0);
        }
        for (id, pipeline) in &self.pipelines {
            let name = self
                .composer
                .pipeline(*id)
                .map_or("<unknown>", |scheduler| scheduler.name());
            for camera in 0..self.composer.cameras().len() {
                log::info!(
                    "  '{name}' camera {camera}: {} of {} entities visible",
                    pipeline.entities_count(camera),
                    pipeline.live_count()
                );
            }
        }
    }

    /// Timings recorded during the last frame.
    pub fn timings(&self) -> &FrameTimings {
        self.composer.timings()
    }

    /// Entities created across every pipeline since startup.
    pub fn entities_created(&self) -> u64 {
        self.counter.get()
    }

    /// Frames rendered so far.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// The configuration the engine was created with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The device every pipeline renders with.
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    /// The frame composer, for custom pipelines.
    pub fn composer_mut(&mut self) -> &mut FrameComposer {
        &mut self.composer
    }
}

impl std::fmt::Debug for RenderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEngine")
            .field("composer", &self.composer)
            .field("pipelines", &self.pipelines.len())
            .field("frames", &self.frames)
            .finish()
    }
}
