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

use super::CullingError;
use lumen_core::renderer::{
    BufferDescriptor, BufferId, BufferUsage, FenceId, GpuDevice, MappedBuffer, ResourceError,
};
use std::time::{Duration, Instant};

const COUNTER_SIZE: u64 = std::mem::size_of::<u32>() as u64;

#[derive(Debug, Clone, Copy)]
struct PendingReadback {
    fence: FenceId,
    submitted: Instant,
}

/// The visible-entity counter and its CPU readback path.
///
/// The counter lives in device memory; [`submit`](Self::submit) copies it into
/// a persistently mapped buffer and fences the copy. The mapped value may only
/// be read through a [`FenceSignaled`] token.
#[derive(Debug)]
pub struct CounterReadback {
    counter: BufferId,
    staging: BufferId,
    mapping: MappedBuffer,
    pending: Option<PendingReadback>,
    timeouts: u64,
}

impl CounterReadback {
    /// Creates the counter and its mapped staging buffer.
    pub fn new(device: &dyn GpuDevice) -> Result<Self, ResourceError> {
        let counter = device.create_buffer(&BufferDescriptor::new(
            "visible-counter",
            COUNTER_SIZE,
            BufferUsage::STORAGE | BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
        ))?;
        let staging = device.create_buffer(&BufferDescriptor::new(
            "visible-counter-readback",
            COUNTER_SIZE,
            BufferUsage::MAP_READ | BufferUsage::COPY_DST,
        ))?;
        let mapping = device.map_persistent(staging)?;
        Ok(Self {
            counter,
            staging,
            mapping,
            pending: None,
            timeouts: 0,
        })
    }

    /// The device-side counter the culling kernel appends through.
    pub fn counter(&self) -> BufferId {
        self.counter
    }

    /// Number of waits that ran out of budget.
    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    /// Whether a copy is in flight.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Zeroes the device counter.
    pub fn reset(&self, device: &dyn GpuDevice) -> Result<(), ResourceError> {
        device.write_buffer(self.counter, 0, &0u32.to_ne_bytes())
    }

    /// Copies the counter into the mapped buffer and fences the copy.
    pub fn submit(&mut self, device: &dyn GpuDevice) -> Result<(), ResourceError> {
        device.copy_buffer_to_buffer(self.counter, 0, self.staging, 0, COUNTER_SIZE)?;
        let fence = device.insert_fence()?;
        if let Some(stale) = self.pending.replace(PendingReadback {
            fence,
            submitted: Instant::now(),
        }) {
            device.destroy_fence(stale.fence)?;
        }
        Ok(())
    }

    /// Non-blocking check: the fence signaled or `budget` has run out.
    ///
    /// With nothing in flight this is `true`, so the consumer runs and reports
    /// the missing readback.
    pub fn poll(&self, device: &dyn GpuDevice, budget: Duration) -> bool {
        let Some(pending) = self.pending else {
            return true;
        };
        match device.fence_status(pending.fence) {
            Ok(status) => status.is_signaled() || pending.submitted.elapsed() >= budget,
            Err(_) => true,
        }
    }

    /// Waits for the in-flight copy, at most for what is left of `budget`.
    ///
    /// When the budget runs out the device is drained with
    /// [`GpuDevice::finish`], which always makes the copy visible.
    pub fn wait(
        &mut self,
        device: &dyn GpuDevice,
        budget: Duration,
    ) -> Result<FenceSignaled<'_>, CullingError> {
        let pending = self.pending.ok_or(CullingError::NoPendingReadback)?;
        let remaining = budget.saturating_sub(pending.submitted.elapsed());

        // The readback stays pending, fence included, until the wait succeeds.
        let status = device.wait_fence(pending.fence, remaining)?;
        self.pending = None;
        if !status.is_signaled() {
            self.timeouts += 1;
            log::warn!(
                "Fence timeout after {:?} waiting for the visible count; forcing a full sync",
                budget
            );
            device.finish();
        }
        device.destroy_fence(pending.fence)?;
        Ok(FenceSignaled { readback: self })
    }
}

/// Proof that the last counter copy has completed.
///
/// Only [`CounterReadback::wait`] creates one, so a mapped read can never
/// race the copy it depends on.
#[derive(Debug)]
pub struct FenceSignaled<'a> {
    readback: &'a CounterReadback,
}

impl FenceSignaled<'_> {
    /// Reads the copied counter value.
    pub fn read_count(self, device: &dyn GpuDevice) -> Result<u32, ResourceError> {
        let mut bytes = [0u8; COUNTER_SIZE as usize];
        device.read_mapped(&self.readback.mapping, 0, &mut bytes)?;
        Ok(u32::from_ne_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_infra::SoftwareDevice;

    #[test]
    fn wait_consumes_the_fence() {
        let device = SoftwareDevice::new().with_fence_latency(2);
        let mut readback = CounterReadback::new(&device).unwrap();
        device
            .write_buffer(readback.counter(), 0, &9u32.to_ne_bytes())
            .unwrap();
        readback.submit(&device).unwrap();
        let fence = readback.pending.unwrap().fence;

        let count = readback
            .wait(&device, Duration::from_millis(5))
            .unwrap()
            .read_count(&device)
            .unwrap();
        assert_eq!(count, 9);
        assert!(!readback.is_pending());
        assert!(device.fence_status(fence).is_err());
    }

    #[test]
    fn failed_wait_keeps_the_readback_pending() {
        let device = SoftwareDevice::new();
        let mut readback = CounterReadback::new(&device).unwrap();
        readback.submit(&device).unwrap();
        let fence = readback.pending.unwrap().fence;
        device.destroy_fence(fence).unwrap();

        assert!(matches!(
            readback.wait(&device, Duration::from_millis(5)),
            Err(CullingError::Resource(ResourceError::InvalidFence(_)))
        ));
        assert!(readback.is_pending());
        assert_eq!(readback.timeouts(), 0);
    }

    #[test]
    fn wait_without_submit_is_an_error() {
        let device = SoftwareDevice::new();
        let mut readback = CounterReadback::new(&device).unwrap();
        assert!(matches!(
            readback.wait(&device, Duration::from_millis(1)),
            Err(CullingError::NoPendingReadback)
        ));
    }
}
