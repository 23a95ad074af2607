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

//! Frustum plane extraction and sphere projection.
//!
//! Clip space follows the `[0, 1]` depth convention. Only five planes are
//! tested: the near plane is left out because anything straddling it is caught
//! by the side planes or treated as visible.

use glam::{Mat4, Vec2, Vec3, Vec4};

/// Number of clip planes handed to the culling kernel.
pub const CLIP_PLANE_COUNT: usize = 5;

const MIN_CLIP_W: f32 = 1e-5;

/// Extracts the left, right, bottom, top and far planes of `view_projection`.
///
/// Each plane is `(normal, distance)` with a unit normal pointing into the
/// frustum, so `dot(normal, p) + distance >= 0` for points inside.
pub fn clip_planes(view_projection: &Mat4) -> [Vec4; CLIP_PLANE_COUNT] {
    let r0 = view_projection.row(0);
    let r1 = view_projection.row(1);
    let r2 = view_projection.row(2);
    let r3 = view_projection.row(3);

    [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r3 - r2].map(normalize_plane)
}

fn normalize_plane(plane: Vec4) -> Vec4 {
    let length = plane.truncate().length();
    if length > 0.0 {
        plane / length
    } else {
        plane
    }
}

/// Returns `true` when the sphere lies entirely on the outer side of any plane.
pub fn sphere_outside_planes(center: Vec3, radius: f32, planes: &[Vec4]) -> bool {
    planes
        .iter()
        .any(|plane| plane.truncate().dot(center) + plane.w < -radius)
}

/// Normalized-device-coordinate footprint of a projected sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    /// Lower-left corner in NDC.
    pub min: Vec2,
    /// Upper-right corner in NDC.
    pub max: Vec2,
    /// Smallest projected depth of the sphere's bounding box.
    pub nearest_depth: f32,
}

impl ScreenRect {
    /// Whether the rectangle overlaps the `[-1, 1]` viewport square.
    pub fn overlaps_viewport(&self) -> bool {
        self.max.x >= -1.0 && self.min.x <= 1.0 && self.max.y >= -1.0 && self.min.y <= 1.0
    }
}

/// Projects the bounding box of a sphere through `view_projection`.
///
/// Returns `None` when part of the box lies behind the eye, in which case no
/// meaningful screen rectangle exists.
pub fn project_sphere(center: Vec3, radius: f32, view_projection: &Mat4) -> Option<ScreenRect> {
    let mut min = Vec2::splat(f32::MAX);
    let mut max = Vec2::splat(f32::MIN);
    let mut nearest_depth = f32::MAX;

    for corner in 0..8u32 {
        let offset = Vec3::new(
            if corner & 1 == 0 { -radius } else { radius },
            if corner & 2 == 0 { -radius } else { radius },
            if corner & 4 == 0 { -radius } else { radius },
        );
        let clip = *view_projection * (center + offset).extend(1.0);
        if clip.w <= MIN_CLIP_W {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        min = min.min(ndc.truncate());
        max = max.max(ndc.truncate());
        nearest_depth = nearest_depth.min(ndc.z);
    }

    Some(ScreenRect {
        min,
        max,
        nearest_depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Mat4 {
        let projection = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        projection * view
    }

    #[test]
    fn sphere_in_front_of_camera_is_inside() {
        let planes = clip_planes(&camera());
        assert!(!sphere_outside_planes(Vec3::new(0.0, 0.0, -10.0), 1.0, &planes));
    }

    #[test]
    fn sphere_beyond_far_plane_is_outside() {
        let planes = clip_planes(&camera());
        assert!(sphere_outside_planes(Vec3::new(0.0, 0.0, -200.0), 1.0, &planes));
    }

    #[test]
    fn sphere_straddling_far_plane_is_kept() {
        let planes = clip_planes(&camera());
        assert!(!sphere_outside_planes(Vec3::new(0.0, 0.0, -100.5), 1.0, &planes));
    }

    #[test]
    fn sphere_far_to_the_side_is_outside() {
        let planes = clip_planes(&camera());
        assert!(sphere_outside_planes(Vec3::new(50.0, 0.0, -10.0), 1.0, &planes));
    }

    #[test]
    fn projection_of_centered_sphere_is_centered() {
        let rect = project_sphere(Vec3::new(0.0, 0.0, -10.0), 1.0, &camera())
            .expect("sphere is in front of the camera");
        assert!(rect.min.x < 0.0 && rect.max.x > 0.0);
        assert!(rect.min.y < 0.0 && rect.max.y > 0.0);
        assert!(rect.nearest_depth > 0.0 && rect.nearest_depth < 1.0);
        assert!(rect.overlaps_viewport());
    }

    #[test]
    fn projection_behind_the_eye_is_rejected() {
        assert!(project_sphere(Vec3::new(0.0, 0.0, 5.0), 1.0, &camera()).is_none());
    }
}
