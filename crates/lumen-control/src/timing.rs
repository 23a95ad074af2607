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


//! Frame-scoped stage timing records.

use lumen_core::stage::{PipelineId, TimingRecord};
use std::time::Duration;

/// Every stage executed during the current frame, in execution order.
///
/// Cleared by [`FrameComposer::reset_execution`](crate::FrameComposer::reset_execution).
#[derive(Debug, Clone, Default)]
pub struct FrameTimings {
    records: Vec<TimingRecord>,
}

impl FrameTimings {
    pub(crate) fn push(&mut self, record: TimingRecord) {
        self.records.push(record);
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    /// All records of the frame.
    pub fn records(&self) -> &[TimingRecord] {
        &self.records
    }

    /// Number of stages executed.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no stage has run yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of one pipeline.
    pub fn for_pipeline(&self, pipeline: PipelineId) -> impl Iterator<Item = &TimingRecord> {
        self.records
            .iter()
            .filter(move |record| record.stage.pipeline == pipeline)
    }

    /// Sum of every stage duration.
    pub fn total(&self) -> Duration {
        self.records.iter().map(|record| record.duration).sum()
    }

    /// Durations summed per stage name, in first-execution order.
    pub fn per_stage(&self) -> Vec<(&str, Duration)> {
        let mut totals: Vec<(&str, Duration)> = Vec::new();
        for record in &self.records {
            match totals
                .iter_mut()
                .find(|(name, _)| *name == &*record.stage_name)
            {
                Some((_, total)) => *total += record.duration,
                None => totals.push((&*record.stage_name, record.duration)),
            }
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::stage::StageId;
    use std::borrow::Cow;

    fn record(pipeline: u32, name: &'static str, camera: Option<usize>, ms: u64) -> TimingRecord {
        TimingRecord {
            stage: StageId {
                pipeline: PipelineId(pipeline),
                index: 0,
            },
            stage_name: Cow::Borrowed(name),
            camera,
            duration: Duration::from_millis(ms),
        }
    }

    #[test]
    fn per_stage_sums_across_cameras() {
        let mut timings = FrameTimings::default();
        timings.push(record(0, "upload", Some(0), 2));
        timings.push(record(0, "dispatch", Some(0), 5));
        timings.push(record(1, "upload", Some(1), 3));

        assert_eq!(
            timings.per_stage(),
            vec![
                ("upload", Duration::from_millis(5)),
                ("dispatch", Duration::from_millis(5)),
            ]
        );
        assert_eq!(timings.total(), Duration::from_millis(10));
        assert_eq!(timings.for_pipeline(PipelineId(1)).count(), 1);

        timings.clear();
        assert!(timings.is_empty());
    }
}
