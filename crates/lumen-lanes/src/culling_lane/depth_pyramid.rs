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

//! Max-depth mip chain used by the temporal occlusion test.
//!
//! All levels live in one `f32` buffer, level 0 first, each level stored row
//! by row with row 0 at the top of the image.

use super::kernels::DepthReduceKernel;
use lumen_core::renderer::{BufferDescriptor, BufferId, BufferUsage, DepthSource, GpuDevice, ResourceError};

const TEXEL_SIZE: u64 = std::mem::size_of::<f32>() as u64;

/// Number of levels of a full chain for a `width` x `height` image.
pub fn level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height);
    if largest == 0 {
        0
    } else {
        u32::BITS - largest.leading_zeros()
    }
}

/// Size of `level`, never smaller than one texel per axis.
pub fn level_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

/// Index of the first texel of `level` in the pyramid buffer.
pub fn level_offset(width: u32, height: u32, level: u32) -> u64 {
    (0..level)
        .map(|l| {
            let (w, h) = level_extent(width, height, l);
            w as u64 * h as u64
        })
        .sum()
}

/// A depth pyramid built from a camera's depth buffer.
#[derive(Debug)]
pub struct DepthPyramid {
    buffer: BufferId,
    width: u32,
    height: u32,
    levels: u32,
}

impl DepthPyramid {
    /// Allocates the pyramid for a `width` x `height` depth image.
    pub fn new(device: &dyn GpuDevice, width: u32, height: u32) -> Result<Self, ResourceError> {
        let levels = level_count(width, height);
        if levels == 0 {
            return Err(ResourceError::BackendError(
                "depth pyramid needs a non-empty depth image".to_owned(),
            ));
        }
        let texels = level_offset(width, height, levels);
        let buffer = device.create_buffer(&BufferDescriptor::new(
            "depth-pyramid",
            texels * TEXEL_SIZE,
            BufferUsage::STORAGE | BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
        ))?;
        log::debug!("Created {width}x{height} depth pyramid with {levels} levels");
        Ok(Self {
            buffer,
            width,
            height,
            levels,
        })
    }

    /// The buffer holding every level.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Width of level 0.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height of level 0.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of levels.
    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// Whether this pyramid can be built from `source` without reallocating.
    pub fn matches(&self, source: &DepthSource) -> bool {
        self.width == source.width && self.height == source.height
    }

    /// Copies `source` into level 0 and reduces every following level.
    pub fn build(
        &self,
        device: &dyn GpuDevice,
        source: &DepthSource,
        workgroup_size: u32,
    ) -> Result<(), ResourceError> {
        let base_size = self.width as u64 * self.height as u64 * TEXEL_SIZE;
        device.copy_buffer_to_buffer(source.buffer, 0, self.buffer, 0, base_size)?;

        for level in 1..self.levels {
            device.memory_barrier();
            let kernel = DepthReduceKernel {
                pyramid: self.buffer,
                width: self.width,
                height: self.height,
                level,
                workgroup_size,
            };
            let (w, h) = level_extent(self.width, self.height, level);
            device.dispatch_compute(&kernel, (w * h).div_ceil(workgroup_size))?;
        }
        device.memory_barrier();
        Ok(())
    }

    /// Releases the pyramid buffer.
    pub fn destroy(self, device: &dyn GpuDevice) -> Result<(), ResourceError> {
        device.destroy_buffer(self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_count_covers_down_to_one_texel() {
        assert_eq!(level_count(1, 1), 1);
        assert_eq!(level_count(64, 64), 7);
        assert_eq!(level_count(100, 30), 7);
        assert_eq!(level_count(0, 0), 0);
    }

    #[test]
    fn levels_are_packed_back_to_back() {
        assert_eq!(level_offset(8, 4, 0), 0);
        assert_eq!(level_offset(8, 4, 1), 32);
        assert_eq!(level_offset(8, 4, 2), 40);
        assert_eq!(level_extent(8, 4, 3), (1, 1));
        assert_eq!(level_offset(8, 4, 4), 43);
    }
}
