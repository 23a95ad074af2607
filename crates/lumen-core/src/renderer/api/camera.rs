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

//! The camera interface consumed by per-camera stages.
//!
//! Projection math and camera controllers live outside the core; stages only
//! need the matrices, planes and targets exposed by [`CameraView`].

use super::{buffer::BufferId, draw::FramebufferId};
use crate::math::{clip_planes, CLIP_PLANE_COUNT};
use glam::{Mat4, UVec2, Vec4};

/// A depth buffer the camera rendered into, stored as one `f32` per texel,
/// row-major with row 0 at the top of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthSource {
    /// Buffer holding the depth values.
    pub buffer: BufferId,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
}

/// What a per-camera stage can ask of a camera.
pub trait CameraView {
    /// Projection-view matrix for this frame.
    fn view_projection(&self) -> Mat4;

    /// Projection-view matrix of the previous frame.
    fn previous_view_projection(&self) -> Mat4;

    /// Left, right, bottom, top and far clip planes of this frame.
    fn clip_planes(&self) -> [Vec4; CLIP_PLANE_COUNT];

    /// Viewport size in pixels.
    fn viewport(&self) -> UVec2;

    /// Framebuffer bound before `PerCameraWithFramebuffer` stages.
    fn framebuffer(&self) -> Option<FramebufferId>;

    /// Depth written by this camera's draws, if the camera exposes it.
    fn depth_source(&self) -> Option<DepthSource> {
        None
    }
}

/// A plain-data [`CameraView`] captured once per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSnapshot {
    view_projection: Mat4,
    previous_view_projection: Mat4,
    planes: [Vec4; CLIP_PLANE_COUNT],
    viewport: UVec2,
    framebuffer: Option<FramebufferId>,
    depth_source: Option<DepthSource>,
}

impl CameraSnapshot {
    /// A camera whose previous frame matches the current one.
    pub fn new(view_projection: Mat4, viewport: UVec2) -> Self {
        Self {
            view_projection,
            previous_view_projection: view_projection,
            planes: clip_planes(&view_projection),
            viewport,
            framebuffer: None,
            depth_source: None,
        }
    }

    /// Overrides the previous frame's projection-view matrix.
    pub fn with_previous(mut self, previous_view_projection: Mat4) -> Self {
        self.previous_view_projection = previous_view_projection;
        self
    }

    /// Sets the framebuffer bound for framebuffer stages.
    pub fn with_framebuffer(mut self, framebuffer: FramebufferId) -> Self {
        self.framebuffer = Some(framebuffer);
        self
    }

    /// Sets the depth buffer used to build the occlusion pyramid.
    pub fn with_depth_source(mut self, depth: DepthSource) -> Self {
        self.depth_source = Some(depth);
        self
    }

    /// Moves to a new frame: the current matrix becomes the previous one.
    pub fn advance(&mut self, view_projection: Mat4) {
        self.previous_view_projection = self.view_projection;
        self.view_projection = view_projection;
        self.planes = clip_planes(&view_projection);
    }
}

impl CameraView for CameraSnapshot {
    fn view_projection(&self) -> Mat4 {
        self.view_projection
    }

    fn previous_view_projection(&self) -> Mat4 {
        self.previous_view_projection
    }

    fn clip_planes(&self) -> [Vec4; CLIP_PLANE_COUNT] {
        self.planes
    }

    fn viewport(&self) -> UVec2 {
        self.viewport
    }

    fn framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    fn depth_source(&self) -> Option<DepthSource> {
        self.depth_source
    }
}
