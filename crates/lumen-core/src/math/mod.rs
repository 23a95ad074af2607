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

//! Math types used by the culling pipeline.
//!
//! Vector and matrix types come from `glam`; this module only adds the
//! bounding-volume and frustum helpers the renderer needs on top of them.

mod bounds;
mod frustum;

pub use bounds::{max_axis_scale, BoundingSphere};
pub use frustum::{clip_planes, project_sphere, sphere_outside_planes, ScreenRect, CLIP_PLANE_COUNT};
pub use glam::{Mat4, UVec2, Vec2, Vec3, Vec4};
