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

//! The frame composer: cooperative round-robin over every pipeline's stages.

use crate::timing::FrameTimings;
use lumen_core::renderer::{CameraView, GpuDevice};
use lumen_core::stage::{
    ExecutionClass, FrameResources, PipelineId, StageBarrier, StageError, StageScheduler,
};
use lumen_core::Stopwatch;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one [`FrameComposer::continue_stages`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Stages executed during the tick.
    pub executed: usize,
    /// Whether any pipeline still has stages this frame.
    pub has_remaining: bool,
}

impl TickReport {
    /// Whether the tick made progress.
    pub fn executed_any(&self) -> bool {
        self.executed > 0
    }
}

/// Summary of a full [`FrameComposer::run_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// Ticks taken to drain every pipeline.
    pub ticks: usize,
    /// Ticks in which no stage was ready.
    pub idle_ticks: usize,
    /// Stages executed.
    pub stages_executed: usize,
    /// Wall-clock duration of the frame.
    pub elapsed: Duration,
}

/// Barrier view over the composer's pipelines.
struct PipelineBarrier<'a> {
    pipelines: &'a [StageScheduler],
}

impl StageBarrier for PipelineBarrier<'_> {
    fn others_reached(&self, pipeline: PipelineId, camera: usize, class: ExecutionClass) -> bool {
        self.pipelines
            .iter()
            .filter(|other| other.id() != pipeline)
            .all(|other| other.position().has_reached(camera, class))
    }
}

/// Drives every registered pipeline through its stages each frame.
///
/// The composer never blocks on a stage: each tick it offers every pipeline
/// the chance to run its next stage, skipping pipelines whose stage is not
/// ready, and the caller keeps ticking until nothing is left.
pub struct FrameComposer {
    device: Arc<dyn GpuDevice>,
    pipelines: Vec<StageScheduler>,
    cameras: Vec<Box<dyn CameraView>>,
    timings: FrameTimings,
}

impl FrameComposer {
    /// Creates a composer with no pipelines and no cameras.
    pub fn new(device: Arc<dyn GpuDevice>) -> Self {
        Self {
            device,
            pipelines: Vec::new(),
            cameras: Vec::new(),
            timings: FrameTimings::default(),
        }
    }

    /// Adds an empty pipeline and returns its id.
    pub fn create_pipeline(&mut self, name: impl Into<String>) -> PipelineId {
        let id = PipelineId(self.pipelines.len() as u32);
        let scheduler = StageScheduler::new(id, name);
        log::info!("Created render pipeline '{}' ({:?})", scheduler.name(), id);
        self.pipelines.push(scheduler);
        id
    }

    /// The scheduler of a pipeline.
    pub fn pipeline(&self, id: PipelineId) -> Option<&StageScheduler> {
        self.pipelines.get(id.0 as usize)
    }

    /// The scheduler of a pipeline, for stage registration.
    pub fn pipeline_mut(&mut self, id: PipelineId) -> Option<&mut StageScheduler> {
        self.pipelines.get_mut(id.0 as usize)
    }

    /// Every pipeline, in creation order.
    pub fn pipelines(&self) -> &[StageScheduler] {
        &self.pipelines
    }

    /// Replaces the cameras rendered from the next [`reset_execution`](Self::reset_execution) on.
    pub fn set_cameras(&mut self, cameras: Vec<Box<dyn CameraView>>) {
        self.cameras = cameras;
    }

    /// The cameras of the current frame.
    pub fn cameras(&self) -> &[Box<dyn CameraView>] {
        &self.cameras
    }

    /// The device stages run against.
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    /// Timing records of the current frame.
    pub fn timings(&self) -> &FrameTimings {
        &self.timings
    }

    /// Starts a new frame: rewinds every pipeline and clears the timings.
    pub fn reset_execution(&mut self) {
        let camera_count = self.cameras.len();
        for pipeline in &mut self.pipelines {
            pipeline.restart_execution(camera_count);
        }
        self.timings.clear();
        log::trace!(
            "Frame reset: {} pipelines, {} cameras",
            self.pipelines.len(),
            camera_count
        );
    }

    /// Whether any pipeline still has stages this frame.
    pub fn has_any_stages_left(&self) -> bool {
        self.pipelines
            .iter()
            .any(|pipeline| pipeline.has_more_stages())
    }

    /// Runs at most one ready stage per pipeline.
    pub fn continue_stages(&mut self) -> Result<TickReport, StageError> {
        let frame = FrameResources {
            device: self.device.as_ref(),
            cameras: &self.cameras,
        };

        let mut executed = 0;
        for index in 0..self.pipelines.len() {
            let ready = {
                let barrier = PipelineBarrier {
                    pipelines: &self.pipelines,
                };
                self.pipelines[index].can_execute_next_stage(&frame, &barrier)
            };
            if !ready {
                continue;
            }

            let record = self.pipelines[index].execute_next_stage(&frame)?;
            self.timings.push(record);
            executed += 1;
        }

        Ok(TickReport {
            executed,
            has_remaining: self.has_any_stages_left(),
        })
    }

    /// Resets and ticks until every pipeline is done, yielding the thread on idle ticks.
    pub fn run_frame(&mut self) -> Result<FrameReport, StageError> {
        let stopwatch = Stopwatch::new();
        self.reset_execution();

        let mut report = FrameReport {
            ticks: 0,
            idle_ticks: 0,
            stages_executed: 0,
            elapsed: Duration::ZERO,
        };
        while self.has_any_stages_left() {
            let tick = self.continue_stages()?;
            report.ticks += 1;
            report.stages_executed += tick.executed;
            if !tick.executed_any() {
                report.idle_ticks += 1;
                std::thread::yield_now();
            }
        }

        report.elapsed = stopwatch.elapsed();
        Ok(report)
    }
}

impl std::fmt::Debug for FrameComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameComposer")
            .field("pipelines", &self.pipelines)
            .field("cameras", &self.cameras.len())
            .field("timings", &self.timings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, UVec2};
    use lumen_core::renderer::{CameraSnapshot, FramebufferId};
    use lumen_core::stage::{StageDescriptor, StageFlags};
    use lumen_data::buffers::{
        AttributeBuffer, BufferError, EntityBufferManager, EntityCounter, GpuAttributeBuffer,
        UpdatePhase,
    };
    use lumen_infra::SoftwareDevice;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<(String, Option<usize>)>>>;

    fn composer(camera_count: usize) -> FrameComposer {
        let mut composer = FrameComposer::new(Arc::new(SoftwareDevice::new()));
        composer.set_cameras(
            (0..camera_count)
                .map(|i| {
                    Box::new(
                        CameraSnapshot::new(Mat4::IDENTITY, UVec2::new(16, 16))
                            .with_framebuffer(FramebufferId(i as u64)),
                    ) as Box<dyn CameraView>
                })
                .collect(),
        );
        composer
    }

    fn logged(name: &str, class: ExecutionClass, log: &Log) -> StageDescriptor {
        let log = Rc::clone(log);
        let label = name.to_owned();
        StageDescriptor::new(name.to_owned(), class, move |ctx| {
            log.borrow_mut().push((label.clone(), ctx.camera_index));
            Ok(())
        })
    }

    #[test]
    fn synchronized_stage_waits_for_slower_pipeline() {
        let mut composer = composer(3);
        let log: Log = Rc::default();

        let fast = composer.create_pipeline("fast");
        let slow = composer.create_pipeline("slow");
        {
            let pipeline = composer.pipeline_mut(fast).unwrap();
            pipeline
                .register_stage(logged("fast-work", ExecutionClass::PerCamera, &log))
                .unwrap();
            pipeline
                .register_stage(
                    logged("fast-sync", ExecutionClass::PerCamera, &log)
                        .with_flags(StageFlags::SYNCHRONIZE_PIPELINES),
                )
                .unwrap();
        }

        let gate_open = Rc::new(Cell::new(false));
        {
            let gate = Rc::clone(&gate_open);
            composer
                .pipeline_mut(slow)
                .unwrap()
                .register_stage(
                    logged("slow-work", ExecutionClass::PerCamera, &log)
                        .with_readiness(move |ctx| ctx.camera_index != Some(0) || gate.get()),
                )
                .unwrap();
        }

        composer.reset_execution();
        // The fast pipeline gets through camera 0 and the work of camera 1,
        // then stops at its synchronized stage.
        for _ in 0..6 {
            composer.continue_stages().unwrap();
        }
        assert_eq!(composer.pipeline(slow).unwrap().current_camera(), Some(0));
        assert_eq!(composer.pipeline(fast).unwrap().current_camera(), Some(1));
        assert_eq!(
            composer.pipeline(fast).unwrap().next_stage_name(),
            Some("fast-sync")
        );

        gate_open.set(true);
        let tick = composer.continue_stages().unwrap();
        // Slow runs camera 0; fast is still held because slow was on camera 0
        // when fast was polled.
        assert_eq!(tick.executed, 1);

        while composer.has_any_stages_left() {
            composer.continue_stages().unwrap();
        }

        // Every synchronized stage for camera C ran after slow reached camera C.
        let log = log.borrow();
        for camera in 0..3 {
            let sync_at = log
                .iter()
                .position(|e| *e == ("fast-sync".to_owned(), Some(camera)))
                .unwrap();
            if camera > 0 {
                let slow_previous = log
                    .iter()
                    .position(|e| *e == ("slow-work".to_owned(), Some(camera - 1)))
                    .unwrap();
                assert!(slow_previous < sync_at);
            }
        }
    }

    fn next_stage_ready(composer: &FrameComposer, id: PipelineId) -> bool {
        let frame = FrameResources {
            device: composer.device.as_ref(),
            cameras: &composer.cameras,
        };
        let barrier = PipelineBarrier {
            pipelines: &composer.pipelines,
        };
        composer.pipelines[id.0 as usize].can_execute_next_stage(&frame, &barrier)
    }

    #[test]
    fn barrier_blocks_until_other_pipeline_reaches_the_camera() {
        let mut composer = composer(3);
        let log: Log = Rc::default();
        let a = composer.create_pipeline("a");
        let b = composer.create_pipeline("b");
        composer
            .pipeline_mut(a)
            .unwrap()
            .register_stage(
                logged("a-sync", ExecutionClass::PerCamera, &log)
                    .with_flags(StageFlags::SYNCHRONIZE_PIPELINES),
            )
            .unwrap();
        let released = Rc::new(Cell::new(1));
        {
            let released = Rc::clone(&released);
            composer
                .pipeline_mut(b)
                .unwrap()
                .register_stage(
                    logged("b-work", ExecutionClass::PerCamera, &log)
                        .with_readiness(move |ctx| {
                            ctx.camera_index.is_some_and(|camera| camera < released.get())
                        }),
                )
                .unwrap();
        }
        composer.reset_execution();

        // Both run camera 0, then A runs camera 1 while B is held there.
        assert_eq!(composer.continue_stages().unwrap().executed, 2);
        assert_eq!(composer.continue_stages().unwrap().executed, 1);
        assert_eq!(composer.pipeline(a).unwrap().current_camera(), Some(2));
        assert_eq!(composer.pipeline(b).unwrap().current_camera(), Some(1));

        assert!(!next_stage_ready(&composer, a));
        assert_eq!(composer.continue_stages().unwrap().executed, 0);
        assert_eq!(composer.pipeline(a).unwrap().current_camera(), Some(2));

        released.set(2);
        // A is polled before B advances, so only B runs this tick.
        assert_eq!(composer.continue_stages().unwrap().executed, 1);
        assert_eq!(composer.pipeline(b).unwrap().current_camera(), Some(2));
        assert!(next_stage_ready(&composer, a));

        composer.continue_stages().unwrap();
        assert_eq!(
            log.borrow().last().cloned(),
            Some(("a-sync".to_owned(), Some(2)))
        );
    }

    #[test]
    fn executed_order_is_a_subsequence_of_registration_order() {
        let mut composer = composer(2);
        let log: Log = Rc::default();
        let id = composer.create_pipeline("ordered");
        let names = [
            ("g0", ExecutionClass::Global),
            ("g1", ExecutionClass::Global),
            ("c0", ExecutionClass::PerCamera),
            ("c1", ExecutionClass::PerCamera),
            ("f0", ExecutionClass::PerCameraWithFramebuffer),
        ];
        for (name, class) in names {
            composer
                .pipeline_mut(id)
                .unwrap()
                .register_stage(logged(name, class, &log))
                .unwrap();
        }

        let report = composer.run_frame().unwrap();
        assert_eq!(report.stages_executed, 2 + 3 * 2);
        assert_eq!(composer.timings().len(), 8);

        let log = log.borrow();
        let last_global = log.iter().rposition(|(_, cam)| cam.is_none()).unwrap();
        let first_camera = log.iter().position(|(_, cam)| cam.is_some()).unwrap();
        assert!(last_global < first_camera);

        for camera in 0..2 {
            let executed: Vec<&str> = log
                .iter()
                .filter(|(_, cam)| *cam == Some(camera))
                .map(|(name, _)| name.as_str())
                .collect();
            assert_eq!(executed, vec!["c0", "c1", "f0"]);
        }
    }

    #[test]
    fn idle_ticks_do_not_block_other_pipelines() {
        let mut composer = composer(1);
        let log: Log = Rc::default();
        let waiting = composer.create_pipeline("waiting");
        let busy = composer.create_pipeline("busy");

        let polls = Rc::new(Cell::new(0));
        {
            let polls = Rc::clone(&polls);
            composer
                .pipeline_mut(waiting)
                .unwrap()
                .register_stage(logged("poll", ExecutionClass::PerCamera, &log).with_readiness(
                    move |_| {
                        polls.set(polls.get() + 1);
                        polls.get() > 3
                    },
                ))
                .unwrap();
        }
        for name in ["b0", "b1", "b2"] {
            composer
                .pipeline_mut(busy)
                .unwrap()
                .register_stage(logged(name, ExecutionClass::PerCamera, &log))
                .unwrap();
        }

        let report = composer.run_frame().unwrap();
        assert_eq!(report.stages_executed, 4);
        assert_eq!(log.borrow()[0].0, "b0");
        assert_eq!(log.borrow().last().unwrap().0, "poll");
        assert!(!composer.has_any_stages_left());
    }

    #[test]
    fn reset_clears_timings() {
        let mut composer = composer(1);
        let log: Log = Rc::default();
        let id = composer.create_pipeline("p");
        composer
            .pipeline_mut(id)
            .unwrap()
            .register_stage(logged("only", ExecutionClass::Global, &log))
            .unwrap();

        composer.run_frame().unwrap();
        assert_eq!(composer.timings().len(), 1);
        composer.reset_execution();
        assert!(composer.timings().is_empty());
        assert!(composer.has_any_stages_left());
    }

    #[test]
    fn failing_stage_surfaces_from_the_tick() {
        let mut composer = composer(0);
        let id = composer.create_pipeline("broken");
        composer
            .pipeline_mut(id)
            .unwrap()
            .register_stage(StageDescriptor::new(
                "fails",
                ExecutionClass::Global,
                |_| Err(StageError::execution("compaction inconsistency")),
            ))
            .unwrap();
        assert!(composer.run_frame().is_err());
    }

    #[test]
    fn compaction_inconsistency_stops_the_frame() {
        let device = SoftwareDevice::new();
        let mut composer = FrameComposer::new(Arc::new(device.clone()));
        let mut entities = EntityBufferManager::new(EntityCounter::new());
        let transforms = entities
            .register_buffer(
                &device,
                Box::new(GpuAttributeBuffer::<Mat4>::new(&device, "transforms", 0).unwrap()),
            )
            .unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| entities.create_entity(&device).unwrap())
            .collect();
        entities
            .buffer_mut::<GpuAttributeBuffer<Mat4>>(transforms)
            .unwrap()
            .resize(2);
        entities.delete_entity(handles[1]).unwrap();

        let entities = Rc::new(RefCell::new(entities));
        let id = composer.create_pipeline("entities");
        {
            let entities = Rc::clone(&entities);
            composer
                .pipeline_mut(id)
                .unwrap()
                .register_stage(StageDescriptor::new(
                    "compact-entity-buffers",
                    ExecutionClass::Global,
                    move |ctx| {
                        entities
                            .borrow_mut()
                            .update_buffers(ctx.device, UpdatePhase::Compact)
                            .map_err(StageError::execution)?;
                        Ok(())
                    },
                ))
                .unwrap();
        }

        composer.reset_execution();
        let error = composer.continue_stages().unwrap_err();
        let StageError::ExecutionFailed(source) = &error else {
            panic!("unexpected error: {error}");
        };
        assert!(matches!(
            source.downcast_ref::<BufferError>(),
            Some(BufferError::CompactionInconsistency { len: 2, expected: 4, .. })
        ));
        assert_eq!(entities.borrow().slots().dense_len(), 4);
    }
}
