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

//! Per-pipeline stage state machine.

use super::{
    ExecutionClass, FrameResources, PipelineId, StageAction, StageBarrier, StageContext,
    StageDescriptor, StageError, StageFlags, StageId, StagePosition, StageReadiness,
    TimingRecord,
};
use crate::renderer::CameraView;
use crate::utils::timer::Stopwatch;
use std::borrow::Cow;
use std::fmt;

/// A barrier with no other pipelines to wait for.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBarrier;

impl StageBarrier for NoBarrier {
    fn others_reached(&self, _: PipelineId, _: usize, _: ExecutionClass) -> bool {
        true
    }
}

struct Stage {
    id: StageId,
    name: Cow<'static, str>,
    class: ExecutionClass,
    flags: StageFlags,
    action: StageAction,
    readiness: Option<StageReadiness>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    next_global: usize,
    next_per_camera: usize,
    camera: usize,
    camera_count: usize,
}

/// Ordered stages of one pipeline and the cursor walking them during a frame.
///
/// The cursor visits every global stage once, then every per-camera stage for
/// camera 0, then for camera 1, and so on. A fresh scheduler has nothing to
/// run until [`restart_execution`](Self::restart_execution) is called.
pub struct StageScheduler {
    id: PipelineId,
    name: String,
    global_stages: Vec<Stage>,
    per_camera_stages: Vec<Stage>,
    cursor: Option<Cursor>,
}

impl StageScheduler {
    /// Creates an empty scheduler for pipeline `id`.
    pub fn new(id: PipelineId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            global_stages: Vec::new(),
            per_camera_stages: Vec::new(),
            cursor: None,
        }
    }

    /// The pipeline this scheduler belongs to.
    pub fn id(&self) -> PipelineId {
        self.id
    }

    /// Human-readable pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total number of registered stages.
    pub fn stage_count(&self) -> usize {
        self.global_stages.len() + self.per_camera_stages.len()
    }

    /// Names and classes of every stage, in execution order within a camera.
    pub fn stages(&self) -> impl Iterator<Item = (&str, ExecutionClass)> {
        self.global_stages
            .iter()
            .chain(self.per_camera_stages.iter())
            .map(|stage| (stage.name.as_ref(), stage.class))
    }

    /// Appends a stage.
    ///
    /// Fails with [`StageError::OrderingViolation`] when the stage's class is
    /// lower than that of the last registered stage.
    pub fn register_stage(&mut self, descriptor: StageDescriptor) -> Result<StageId, StageError> {
        let previous = self
            .per_camera_stages
            .last()
            .or_else(|| self.global_stages.last())
            .map(|stage| stage.class);

        if let Some(previous) = previous {
            if descriptor.class < previous {
                return Err(StageError::OrderingViolation {
                    stage: descriptor.name.into_owned(),
                    class: descriptor.class,
                    previous,
                });
            }
        }

        let id = StageId {
            pipeline: self.id,
            index: self.stage_count() as u32,
        };
        log::debug!(
            "Pipeline '{}' registered stage '{}' ({})",
            self.name,
            descriptor.name,
            descriptor.class
        );

        let stage = Stage {
            id,
            name: descriptor.name,
            class: descriptor.class,
            flags: descriptor.flags,
            action: descriptor.action,
            readiness: descriptor.readiness,
        };
        if stage.class.is_per_camera() {
            self.per_camera_stages.push(stage);
        } else {
            self.global_stages.push(stage);
        }
        Ok(id)
    }

    /// Rewinds the cursor to the first stage for a frame with `camera_count` cameras.
    pub fn restart_execution(&mut self, camera_count: usize) {
        self.cursor = Some(Cursor {
            next_global: 0,
            next_per_camera: 0,
            camera: 0,
            camera_count,
        });
        self.settle();
    }

    /// Whether any stage remains this frame.
    pub fn has_more_stages(&self) -> bool {
        self.cursor.is_some()
    }

    /// Camera of the next stage, `None` while global stages remain.
    pub fn current_camera(&self) -> Option<usize> {
        let cursor = self.cursor?;
        (cursor.next_global >= self.global_stages.len()).then_some(cursor.camera)
    }

    /// Name of the next stage.
    pub fn next_stage_name(&self) -> Option<&str> {
        self.next_stage().map(|stage| stage.name.as_ref())
    }

    /// Where this pipeline stands, for cross-pipeline barriers.
    pub fn position(&self) -> StagePosition {
        match self.next_stage() {
            Some(stage) => StagePosition::Pending {
                camera: self.current_camera(),
                class: stage.class,
            },
            None => StagePosition::Finished,
        }
    }

    /// Whether the next stage may run now.
    ///
    /// A synchronized stage first waits on `barrier`; then the stage's
    /// readiness predicate, if any, decides.
    pub fn can_execute_next_stage(
        &self,
        frame: &FrameResources<'_>,
        barrier: &dyn StageBarrier,
    ) -> bool {
        let Some(stage) = self.next_stage() else {
            return false;
        };
        let camera_index = self.current_camera();

        if stage.flags.contains(StageFlags::SYNCHRONIZE_PIPELINES) {
            if let Some(camera) = camera_index {
                if !barrier.others_reached(self.id, camera, stage.class) {
                    return false;
                }
            }
        }

        match &stage.readiness {
            None => true,
            Some(readiness) => {
                let camera = match camera_index {
                    Some(index) => match lookup_camera(frame, index) {
                        Ok(camera) => Some(camera),
                        Err(_) => return false,
                    },
                    None => None,
                };
                readiness(&StageContext {
                    pipeline: self.id,
                    stage: stage.id,
                    camera_index,
                    camera,
                    device: frame.device,
                })
            }
        }
    }

    /// Runs the next stage and advances the cursor.
    ///
    /// The cursor only advances when the action succeeds.
    pub fn execute_next_stage(
        &mut self,
        frame: &FrameResources<'_>,
    ) -> Result<TimingRecord, StageError> {
        let cursor = self.cursor.ok_or(StageError::NoStagesLeft)?;
        let camera_index = self.current_camera();
        let camera = camera_index
            .map(|index| lookup_camera(frame, index))
            .transpose()?;

        let stage = match camera_index {
            None => &mut self.global_stages[cursor.next_global],
            Some(_) => &mut self.per_camera_stages[cursor.next_per_camera],
        };

        if stage.class == ExecutionClass::PerCameraWithFramebuffer {
            frame
                .device
                .bind_framebuffer(camera.and_then(|camera| camera.framebuffer()));
        }

        let context = StageContext {
            pipeline: self.id,
            stage: stage.id,
            camera_index,
            camera,
            device: frame.device,
        };

        log::trace!(
            "Pipeline '{}' running stage '{}' (camera {:?})",
            self.name,
            stage.name,
            camera_index
        );
        let stopwatch = Stopwatch::new();
        if let Err(e) = (stage.action)(&context) {
            log::error!(
                "Stage '{}' of pipeline '{}' failed: {}",
                stage.name,
                self.name,
                e
            );
            return Err(e);
        }

        let record = TimingRecord {
            stage: stage.id,
            stage_name: stage.name.clone(),
            camera: camera_index,
            duration: stopwatch.elapsed(),
        };
        self.advance();
        Ok(record)
    }

    fn next_stage(&self) -> Option<&Stage> {
        let cursor = self.cursor?;
        self.global_stages
            .get(cursor.next_global)
            .or_else(|| self.per_camera_stages.get(cursor.next_per_camera))
    }

    fn advance(&mut self) {
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        if cursor.next_global < self.global_stages.len() {
            cursor.next_global += 1;
        } else {
            cursor.next_per_camera += 1;
            if cursor.next_per_camera >= self.per_camera_stages.len() {
                cursor.next_per_camera = 0;
                cursor.camera += 1;
            }
        }
        self.settle();
    }

    /// Drops the cursor once nothing is left to run.
    fn settle(&mut self) {
        if let Some(cursor) = self.cursor {
            let globals_done = cursor.next_global >= self.global_stages.len();
            let cameras_done =
                self.per_camera_stages.is_empty() || cursor.camera >= cursor.camera_count;
            if globals_done && cameras_done {
                self.cursor = None;
            }
        }
    }
}

fn lookup_camera<'a>(
    frame: &FrameResources<'a>,
    index: usize,
) -> Result<&'a dyn CameraView, StageError> {
    frame
        .cameras
        .get(index)
        .map(|camera| camera.as_ref())
        .ok_or(StageError::MissingCamera { index })
}

impl fmt::Debug for StageScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageScheduler")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("global_stages", &self.global_stages.len())
            .field("per_camera_stages", &self.per_camera_stages.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::api::*;
    use crate::renderer::{GpuDevice, ResourceError};
    use glam::{Mat4, UVec2};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records framebuffer bindings; every other call is a no-op.
    #[derive(Debug, Default)]
    struct RecordingDevice {
        bound: Mutex<Vec<Option<FramebufferId>>>,
    }

    impl GpuDevice for RecordingDevice {
        fn create_buffer(&self, _: &BufferDescriptor) -> Result<BufferId, ResourceError> {
            Ok(BufferId(0))
        }
        fn resize_buffer(&self, _: BufferId, _: u64) -> Result<(), ResourceError> {
            Ok(())
        }
        fn destroy_buffer(&self, _: BufferId) -> Result<(), ResourceError> {
            Ok(())
        }
        fn buffer_size(&self, _: BufferId) -> Result<u64, ResourceError> {
            Ok(0)
        }
        fn write_buffer(&self, _: BufferId, _: u64, _: &[u8]) -> Result<(), ResourceError> {
            Ok(())
        }
        fn copy_buffer_to_buffer(
            &self,
            _: BufferId,
            _: u64,
            _: BufferId,
            _: u64,
            _: u64,
        ) -> Result<(), ResourceError> {
            Ok(())
        }
        fn map_persistent(&self, id: BufferId) -> Result<MappedBuffer, ResourceError> {
            Ok(MappedBuffer::new(id, 0))
        }
        fn read_mapped(&self, _: &MappedBuffer, _: u64, _: &mut [u8]) -> Result<(), ResourceError> {
            Ok(())
        }
        fn insert_fence(&self) -> Result<FenceId, ResourceError> {
            Ok(FenceId(0))
        }
        fn fence_status(&self, _: FenceId) -> Result<FenceStatus, ResourceError> {
            Ok(FenceStatus::Signaled)
        }
        fn wait_fence(&self, _: FenceId, _: Duration) -> Result<FenceStatus, ResourceError> {
            Ok(FenceStatus::Signaled)
        }
        fn destroy_fence(&self, _: FenceId) -> Result<(), ResourceError> {
            Ok(())
        }
        fn finish(&self) {}
        fn dispatch_compute(&self, _: &dyn ComputeKernel, _: u32) -> Result<(), ResourceError> {
            Ok(())
        }
        fn memory_barrier(&self) {}
        fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>) {
            self.bound.lock().unwrap().push(framebuffer);
        }
        fn draw_indexed_indirect(&self, _: &IndirectDraw) -> Result<(), ResourceError> {
            Ok(())
        }
    }

    fn cameras(count: usize) -> Vec<Box<dyn CameraView>> {
        (0..count)
            .map(|i| {
                Box::new(
                    CameraSnapshot::new(Mat4::IDENTITY, UVec2::new(8, 8))
                        .with_framebuffer(FramebufferId(i as u64 + 10)),
                ) as Box<dyn CameraView>
            })
            .collect()
    }

    fn logging_stage(
        name: &'static str,
        class: ExecutionClass,
        log: &Rc<RefCell<Vec<(&'static str, Option<usize>)>>>,
    ) -> StageDescriptor {
        let log = Rc::clone(log);
        StageDescriptor::new(name, class, move |ctx| {
            log.borrow_mut().push((name, ctx.camera_index));
            Ok(())
        })
    }

    fn drain(scheduler: &mut StageScheduler, frame: &FrameResources<'_>) -> Vec<TimingRecord> {
        let mut records = Vec::new();
        while scheduler.has_more_stages() {
            assert!(scheduler.can_execute_next_stage(frame, &NoBarrier));
            records.push(scheduler.execute_next_stage(frame).unwrap());
        }
        records
    }

    #[test]
    fn globals_run_once_then_per_camera_stages_per_camera() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut scheduler = StageScheduler::new(PipelineId(0), "test");
        scheduler
            .register_stage(logging_stage("g0", ExecutionClass::Global, &log))
            .unwrap();
        scheduler
            .register_stage(logging_stage("g1", ExecutionClass::Global, &log))
            .unwrap();
        scheduler
            .register_stage(logging_stage("c0", ExecutionClass::PerCamera, &log))
            .unwrap();
        scheduler
            .register_stage(logging_stage(
                "f0",
                ExecutionClass::PerCameraWithFramebuffer,
                &log,
            ))
            .unwrap();

        let device = RecordingDevice::default();
        let cameras = cameras(2);
        let frame = FrameResources {
            device: &device,
            cameras: &cameras,
        };

        assert!(!scheduler.has_more_stages());
        scheduler.restart_execution(cameras.len());
        let records = drain(&mut scheduler, &frame);

        assert_eq!(
            *log.borrow(),
            vec![
                ("g0", None),
                ("g1", None),
                ("c0", Some(0)),
                ("f0", Some(0)),
                ("c0", Some(1)),
                ("f0", Some(1)),
            ]
        );
        assert_eq!(records.len(), 6);
        assert_eq!(records[3].stage_name, "f0");
        assert_eq!(records[3].camera, Some(0));
        assert_eq!(
            *device.bound.lock().unwrap(),
            vec![Some(FramebufferId(10)), Some(FramebufferId(11))]
        );
    }

    #[test]
    fn zero_cameras_runs_only_globals() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut scheduler = StageScheduler::new(PipelineId(0), "test");
        scheduler
            .register_stage(logging_stage("g0", ExecutionClass::Global, &log))
            .unwrap();
        scheduler
            .register_stage(logging_stage("c0", ExecutionClass::PerCamera, &log))
            .unwrap();

        let device = RecordingDevice::default();
        let frame = FrameResources {
            device: &device,
            cameras: &[],
        };
        scheduler.restart_execution(0);
        drain(&mut scheduler, &frame);
        assert_eq!(*log.borrow(), vec![("g0", None)]);
    }

    #[test]
    fn lower_class_after_higher_is_rejected() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut scheduler = StageScheduler::new(PipelineId(3), "test");
        scheduler
            .register_stage(logging_stage(
                "draw",
                ExecutionClass::PerCameraWithFramebuffer,
                &log,
            ))
            .unwrap();

        let err = scheduler
            .register_stage(logging_stage("cull", ExecutionClass::PerCamera, &log))
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::OrderingViolation {
                class: ExecutionClass::PerCamera,
                previous: ExecutionClass::PerCameraWithFramebuffer,
                ..
            }
        ));

        let err = scheduler
            .register_stage(logging_stage("late-global", ExecutionClass::Global, &log))
            .unwrap_err();
        assert!(matches!(err, StageError::OrderingViolation { .. }));
        assert_eq!(scheduler.stage_count(), 1);
    }

    #[test]
    fn readiness_gates_without_advancing() {
        let ready = Rc::new(Cell::new(false));
        let gate = Rc::clone(&ready);
        let mut scheduler = StageScheduler::new(PipelineId(0), "test");
        scheduler
            .register_stage(
                StageDescriptor::new("wait", ExecutionClass::PerCamera, |_| Ok(()))
                    .with_readiness(move |_| gate.get()),
            )
            .unwrap();

        let device = RecordingDevice::default();
        let cameras = cameras(1);
        let frame = FrameResources {
            device: &device,
            cameras: &cameras,
        };
        scheduler.restart_execution(1);

        assert!(!scheduler.can_execute_next_stage(&frame, &NoBarrier));
        assert_eq!(scheduler.next_stage_name(), Some("wait"));
        ready.set(true);
        assert!(scheduler.can_execute_next_stage(&frame, &NoBarrier));
        scheduler.execute_next_stage(&frame).unwrap();
        assert!(!scheduler.has_more_stages());
        assert_eq!(scheduler.position(), StagePosition::Finished);
    }

    #[test]
    fn failed_action_keeps_the_cursor() {
        let mut scheduler = StageScheduler::new(PipelineId(0), "test");
        scheduler
            .register_stage(StageDescriptor::new(
                "broken",
                ExecutionClass::Global,
                |_| Err(StageError::execution("boom")),
            ))
            .unwrap();

        let device = RecordingDevice::default();
        let frame = FrameResources {
            device: &device,
            cameras: &[],
        };
        scheduler.restart_execution(0);
        assert!(scheduler.execute_next_stage(&frame).is_err());
        assert_eq!(scheduler.next_stage_name(), Some("broken"));
    }

    #[test]
    fn synchronized_stage_waits_for_barrier() {
        struct Closed;
        impl StageBarrier for Closed {
            fn others_reached(&self, _: PipelineId, _: usize, _: ExecutionClass) -> bool {
                false
            }
        }

        let mut scheduler = StageScheduler::new(PipelineId(0), "test");
        scheduler
            .register_stage(
                StageDescriptor::new("sync", ExecutionClass::PerCamera, |_| Ok(()))
                    .with_flags(StageFlags::SYNCHRONIZE_PIPELINES),
            )
            .unwrap();

        let device = RecordingDevice::default();
        let cameras = cameras(1);
        let frame = FrameResources {
            device: &device,
            cameras: &cameras,
        };
        scheduler.restart_execution(1);
        assert!(!scheduler.can_execute_next_stage(&frame, &Closed));
        assert!(scheduler.can_execute_next_stage(&frame, &NoBarrier));
    }
}
