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

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// A bounding sphere in the GPU layout used by the culling kernels.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct BoundingSphere {
    /// Center of the sphere.
    pub center: [f32; 3],
    /// Radius of the sphere.
    pub radius: f32,
}

impl BoundingSphere {
    /// Creates a sphere from a center and a radius.
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self {
            center: center.to_array(),
            radius,
        }
    }

    /// Returns the center as a vector.
    pub fn center(&self) -> Vec3 {
        Vec3::from_array(self.center)
    }

    /// Moves the sphere into the space described by `transform`.
    ///
    /// The radius is inflated by the largest axis scale, which is exact for
    /// uniform scale and conservative for non-uniform scale.
    pub fn transformed(&self, transform: &Mat4) -> Self {
        Self::new(
            transform.transform_point3(self.center()),
            self.radius * max_axis_scale(transform),
        )
    }
}

/// Length of the longest basis vector of the upper 3x3 of `transform`.
pub fn max_axis_scale(transform: &Mat4) -> f32 {
    let x = transform.x_axis.truncate().length_squared();
    let y = transform.y_axis.truncate().length_squared();
    let z = transform.z_axis.truncate().length_squared();
    x.max(y).max(z).sqrt()
}
