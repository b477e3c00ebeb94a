//! Per-context segmentation of the sample stream

use oatrace_gpu::{read_context_id, MetricSet};
use oatrace_shared::{ContextId, CpuTimestamp, GpuTimestamp, IDLE_CONTEXT_ID};
use serde::Serialize;

use crate::correlation::GpuClock;
use crate::parse::ParsedRecording;

/// Consecutive samples of one hardware context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineItem {
    pub gpu_start: GpuTimestamp,
    pub gpu_end: GpuTimestamp,
    pub cpu_start: Option<CpuTimestamp>,
    pub cpu_end: Option<CpuTimestamp>,
    /// First sample index
    pub record_start: usize,
    /// One past the last sample index
    pub record_end: usize,
    pub context_id: ContextId,
}

impl TimelineItem {
    pub fn len(&self) -> usize {
        self.record_end - self.record_start
    }

    pub fn is_empty(&self) -> bool {
        self.record_end == self.record_start
    }

    pub fn is_idle(&self) -> bool {
        self.context_id == IDLE_CONTEXT_ID
    }
}

/// Splits the samples of `parsed` at every context id change.
pub fn build_timeline(parsed: &ParsedRecording<'_>, metric_set: &MetricSet) -> Vec<TimelineItem> {
    let clock = GpuClock::new(parsed, metric_set);
    build_timeline_with(parsed, metric_set, &clock)
}

/// Same as [`build_timeline`] with an already unwrapped clock.
pub fn build_timeline_with(
    parsed: &ParsedRecording<'_>,
    metric_set: &MetricSet,
    clock: &GpuClock,
) -> Vec<TimelineItem> {
    let mut items = Vec::new();
    let mut start = 0;

    for end in 1..=parsed.samples.len() {
        let ctx = read_context_id(metric_set, parsed.samples[start].report);
        let boundary = end == parsed.samples.len()
            || read_context_id(metric_set, parsed.samples[end].report) != ctx;
        if !boundary {
            continue;
        }

        let gpu_start = clock.sample_timestamps[start];
        let gpu_end = clock.sample_timestamps[end - 1];
        items.push(TimelineItem {
            gpu_start,
            gpu_end,
            cpu_start: clock.table.gpu_to_cpu(gpu_start),
            cpu_end: clock.table.gpu_to_cpu(gpu_end),
            record_start: start,
            record_end: end,
            context_id: ctx,
        });
        start = end;
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{CorrelationRef, SampleRef};
    use crate::parse::tests::device_info;
    use oatrace_gpu::layout::REASON_TIMER;
    use oatrace_gpu::{raw_timestamp_for, Catalog, DeviceDescriptor};
    use oatrace_shared::{CorrelationPoint, Topology};

    fn render_basic() -> MetricSet {
        let descriptor = DeviceDescriptor {
            device_id: 0x9a49,
            revision: 0,
            timestamp_frequency: 19_200_000,
            gt_min_frequency: 300,
            gt_max_frequency: 1300,
            topology: Topology::fully_populated(1, 6, 16),
        };
        Catalog::load(&descriptor)
            .unwrap()
            .metric_set("RenderBasic")
            .unwrap()
            .clone()
    }

    fn reports(set: &MetricSet, contexts: &[u32]) -> Vec<Vec<u8>> {
        contexts
            .iter()
            .enumerate()
            .map(|(i, &ctx)| {
                let mut report = vec![0u8; set.report_size()];
                let ts = raw_timestamp_for(set, 1000 + i as u64 * 100);
                set.layout.write_header(&mut report, REASON_TIMER, ts, ctx);
                report
            })
            .collect()
    }

    fn parsed<'a>(set: &MetricSet, reports: &'a [Vec<u8>]) -> ParsedRecording<'a> {
        ParsedRecording {
            version: 1,
            device_info: device_info(set.layout.format_id),
            topology: Topology::default(),
            samples: reports
                .iter()
                .enumerate()
                .map(|(i, r)| SampleRef {
                    offset: 100 + i * 300,
                    report: r,
                })
                .collect(),
            correlations: vec![
                CorrelationRef {
                    offset: 0,
                    point: CorrelationPoint::new(50_000, 1000),
                },
                CorrelationRef {
                    offset: 100_000,
                    point: CorrelationPoint::new(60_000, 2000),
                },
            ],
            losses: Vec::new(),
            stopped_at: None,
        }
    }

    fn assert_covers(items: &[TimelineItem], samples: usize) {
        let mut next = 0;
        for item in items {
            assert_eq!(item.record_start, next);
            assert!(!item.is_empty());
            next = item.record_end;
        }
        assert_eq!(next, samples);
    }

    #[test]
    fn test_context_changes_split_segments() {
        let set = render_basic();
        let reports = reports(&set, &[1, 1, 2, 2, 2, IDLE_CONTEXT_ID, 1]);
        let items = build_timeline(&parsed(&set, &reports), &set);

        let ranges: Vec<_> = items.iter().map(|i| (i.record_start, i.record_end)).collect();
        assert_eq!(ranges, vec![(0, 2), (2, 5), (5, 6), (6, 7)]);
        assert!(items[2].is_idle());
        assert_eq!(items[1].context_id, 2);
        assert_eq!(items[1].gpu_start, 1200);
        assert_eq!(items[1].gpu_end, 1400);
        assert_covers(&items, 7);
    }

    #[test]
    fn test_cpu_times_are_interpolated() {
        let set = render_basic();
        let reports = reports(&set, &[1, 1, 1]);
        let items = build_timeline(&parsed(&set, &reports), &set);

        assert_eq!(items.len(), 1);
        // 10ns per cycle between the two points
        assert_eq!(items[0].cpu_start, Some(50_000));
        assert_eq!(items[0].cpu_end, Some(52_000));
    }

    #[test]
    fn test_empty_recording_has_no_items() {
        let set = render_basic();
        assert!(build_timeline(&parsed(&set, &[]), &set).is_empty());
    }

    #[test]
    fn test_segments_cover_every_sample() {
        let set = render_basic();
        // xorshift context sequences with long and short runs
        let mut state = 0x9e37_79b9_u32;
        for round in 0..50 {
            let count = 1 + round % 23;
            let contexts: Vec<u32> = (0..count)
                .map(|_| {
                    state ^= state << 13;
                    state ^= state >> 17;
                    state ^= state << 5;
                    state % 3
                })
                .collect();
            let reports = reports(&set, &contexts);
            let items = build_timeline(&parsed(&set, &reports), &set);
            assert_covers(&items, count);
            for pair in items.windows(2) {
                assert_ne!(pair[0].context_id, pair[1].context_id);
            }
        }
    }
}
