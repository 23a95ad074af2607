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

//! # Stage Abstraction
//!
//! A **stage** is one schedulable unit of rendering work. Every render pipeline
//! registers its stages once, at initialization, into its own
//! [`StageScheduler`]; the frame composer then walks all schedulers
//! cooperatively each frame.
//!
//! ## Execution classes
//!
//! Stages are tagged with an [`ExecutionClass`]:
//!
//! 1. `Global`: runs once per frame, before any per-camera work.
//! 2. `PerCamera`: runs once per camera.
//! 3. `PerCameraWithFramebuffer`: runs once per camera with the camera's
//!    framebuffer bound.
//!
//! Within one pipeline the class never decreases along the registration order;
//! a descriptor that would break this is rejected by
//! [`StageScheduler::register_stage`].
//!
//! ## Readiness and barriers
//!
//! A stage may carry a readiness predicate (e.g. "has the GPU fence
//! signaled?"). A stage that is not ready is simply skipped for the current
//! composer tick; nothing blocks. Stages flagged
//! [`StageFlags::SYNCHRONIZE_PIPELINES`] additionally wait until every other
//! pipeline has caught up with them for the current camera.
//!
//! ```rust,ignore
//! let mut scheduler = StageScheduler::new(PipelineId(0), "meshes");
//! scheduler.register_stage(StageDescriptor::new(
//!     "flush-entity-buffers",
//!     ExecutionClass::Global,
//!     move |_ctx| Ok(()),
//! ))?;
//! ```

use crate::renderer::{CameraView, GpuDevice, ResourceError};
use bitflags::bitflags;
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

mod scheduler;

pub use scheduler::{NoBarrier, StageScheduler};

/// Ordering tier of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExecutionClass {
    /// Once per frame, before per-camera work.
    Global,
    /// Once per camera.
    PerCamera,
    /// Once per camera, with the camera's framebuffer bound.
    PerCameraWithFramebuffer,
}

impl ExecutionClass {
    /// Whether stages of this class run once per camera.
    pub fn is_per_camera(self) -> bool {
        self != ExecutionClass::Global
    }
}

impl fmt::Display for ExecutionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionClass::Global => write!(f, "Global"),
            ExecutionClass::PerCamera => write!(f, "PerCamera"),
            ExecutionClass::PerCameraWithFramebuffer => write!(f, "PerCameraWithFramebuffer"),
        }
    }
}

bitflags! {
    /// Synchronization flags of a stage.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StageFlags: u32 {
        /// Wait for every other pipeline to reach this camera and class first.
        const SYNCHRONIZE_PIPELINES = 1 << 0;
    }
}

/// Identifies a pipeline within a frame composer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub u32);

/// Identifies a stage: its pipeline and its registration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId {
    /// Owning pipeline.
    pub pipeline: PipelineId,
    /// Position in the pipeline's registration order.
    pub index: u32,
}

/// Error type for stage registration and execution.
#[derive(Debug)]
pub enum StageError {
    /// A stage was registered with a lower execution class than its predecessor.
    OrderingViolation {
        /// Name of the rejected stage.
        stage: String,
        /// Class of the rejected stage.
        class: ExecutionClass,
        /// Class of the last stage already registered.
        previous: ExecutionClass,
    },
    /// `execute_next_stage` was called on a pipeline with nothing left to run.
    NoStagesLeft,
    /// A per-camera stage addressed a camera that was not supplied.
    MissingCamera {
        /// Index of the missing camera.
        index: usize,
    },
    /// A stage action touched a GPU resource and the device refused.
    Resource(ResourceError),
    /// A domain-specific error occurred inside a stage action.
    ExecutionFailed(Box<dyn std::error::Error + Send + Sync>),
}

impl StageError {
    /// Wraps a domain error raised by a stage action.
    pub fn execution(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StageError::ExecutionFailed(error.into())
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::OrderingViolation {
                stage,
                class,
                previous,
            } => write!(
                f,
                "Stage '{stage}' of class {class} cannot follow a {previous} stage"
            ),
            StageError::NoStagesLeft => write!(f, "No stages left to execute this frame"),
            StageError::MissingCamera { index } => write!(f, "Camera {index} was not supplied"),
            StageError::Resource(e) => write!(f, "Stage resource error: {e}"),
            StageError::ExecutionFailed(e) => write!(f, "Stage execution failed: {e}"),
        }
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StageError::Resource(e) => Some(e),
            StageError::ExecutionFailed(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<ResourceError> for StageError {
    fn from(err: ResourceError) -> Self {
        StageError::Resource(err)
    }
}

/// Everything a stage action or readiness predicate can see while it runs.
pub struct StageContext<'a> {
    /// The pipeline the stage belongs to.
    pub pipeline: PipelineId,
    /// The stage being evaluated.
    pub stage: StageId,
    /// Index of the current camera, `None` for global stages.
    pub camera_index: Option<usize>,
    /// The current camera, `None` for global stages.
    pub camera: Option<&'a dyn CameraView>,
    /// The device all GPU work goes through.
    pub device: &'a dyn GpuDevice,
}

impl<'a> StageContext<'a> {
    /// Returns the current camera and its index, failing for global stages.
    pub fn current_camera(&self) -> Result<(usize, &'a dyn CameraView), StageError> {
        match (self.camera_index, self.camera) {
            (Some(index), Some(camera)) => Ok((index, camera)),
            (index, _) => Err(StageError::MissingCamera {
                index: index.unwrap_or(0),
            }),
        }
    }
}

/// The per-frame inputs shared by every pipeline.
pub struct FrameResources<'a> {
    /// The device stages dispatch to.
    pub device: &'a dyn GpuDevice,
    /// Cameras rendered this frame, in execution order.
    pub cameras: &'a [Box<dyn CameraView>],
}

/// Executable body of a stage.
pub type StageAction = Box<dyn FnMut(&StageContext<'_>) -> Result<(), StageError>>;

/// Readiness predicate of a stage.
pub type StageReadiness = Box<dyn Fn(&StageContext<'_>) -> bool>;

/// Registration-time description of a stage.
pub struct StageDescriptor {
    pub(crate) name: Cow<'static, str>,
    pub(crate) class: ExecutionClass,
    pub(crate) flags: StageFlags,
    pub(crate) action: StageAction,
    pub(crate) readiness: Option<StageReadiness>,
}

impl StageDescriptor {
    /// Creates a descriptor with no flags and no readiness predicate.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        class: ExecutionClass,
        action: impl FnMut(&StageContext<'_>) -> Result<(), StageError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            class,
            flags: StageFlags::empty(),
            action: Box::new(action),
            readiness: None,
        }
    }

    /// Sets the synchronization flags.
    pub fn with_flags(mut self, flags: StageFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Gates execution on `readiness` returning `true`.
    pub fn with_readiness(
        mut self,
        readiness: impl Fn(&StageContext<'_>) -> bool + 'static,
    ) -> Self {
        self.readiness = Some(Box::new(readiness));
        self
    }

    /// Name of the stage.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execution class of the stage.
    pub fn class(&self) -> ExecutionClass {
        self.class
    }
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("flags", &self.flags)
            .field("has_readiness", &self.readiness.is_some())
            .finish()
    }
}

/// Where a pipeline stands in its frame, used by cross-pipeline barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePosition {
    /// The pipeline's next stage is `class`, for `camera` (`None` while global).
    Pending {
        /// Camera of the next stage.
        camera: Option<usize>,
        /// Class of the next stage.
        class: ExecutionClass,
    },
    /// The pipeline has nothing left this frame.
    Finished,
}

impl StagePosition {
    /// Whether this position is at or past `class` for `camera`.
    pub fn has_reached(&self, camera: usize, class: ExecutionClass) -> bool {
        match *self {
            StagePosition::Finished => true,
            StagePosition::Pending { camera: None, .. } => false,
            StagePosition::Pending {
                camera: Some(current),
                class: current_class,
            } => current > camera || (current == camera && current_class >= class),
        }
    }
}

/// Cross-pipeline barrier consulted before synchronized stages.
pub trait StageBarrier {
    /// Whether every pipeline other than `pipeline` has reached `class` for `camera`.
    fn others_reached(&self, pipeline: PipelineId, camera: usize, class: ExecutionClass) -> bool;
}

/// One executed stage.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingRecord {
    /// The stage that ran.
    pub stage: StageId,
    /// Its name.
    pub stage_name: Cow<'static, str>,
    /// The camera it ran for, `None` for global stages.
    pub camera: Option<usize>,
    /// Wall-clock time spent in the stage action.
    pub duration: Duration,
}
