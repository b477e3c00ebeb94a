//! A parsed recording bound to its metric set

use oatrace_gpu::{Catalog, CounterValue, DeviceDescriptor, LogicalCounter, MetricSet};
use oatrace_shared::{GpuTimestamp, OaError};
use tracing::debug;

use crate::correlation::{CorrelationTable, GpuClock};
use crate::counters::evaluate;
use crate::parse::{parse, ParsedRecording};
use crate::timeline::{build_timeline_with, TimelineItem};

pub struct Recording<'a> {
    pub parsed: ParsedRecording<'a>,
    pub catalog: Catalog,
    pub metric_set: MetricSet,
    pub clock: GpuClock,
}

impl<'a> Recording<'a> {
    /// Parses `data` and looks up the metric set it was recorded with.
    pub fn open(data: &'a [u8]) -> Result<Self, OaError> {
        let parsed = parse(data)?;
        let info = &parsed.device_info;

        let descriptor = DeviceDescriptor::from_recording(info, &parsed.topology);
        let catalog = Catalog::load(&descriptor)?;
        let metric_set = catalog.metric_set(&info.metric_set_name)?.clone();
        if metric_set.layout.format_id != info.oa_format {
            return Err(OaError::malformed(
                0,
                format!(
                    "metric set {} uses format {}, recording says {}",
                    metric_set.symbol_name, metric_set.layout.format_id, info.oa_format
                ),
            ));
        }

        let clock = GpuClock::new(&parsed, &metric_set);
        debug!(
            "Opened recording of {} on device 0x{:04x}",
            metric_set.symbol_name, info.device_id
        );
        Ok(Self {
            parsed,
            catalog,
            metric_set,
            clock,
        })
    }

    pub fn correlation(&self) -> &CorrelationTable {
        &self.clock.table
    }

    /// Whether the metric set was recorded with the configuration the
    /// catalog knows about.
    pub fn uuid_matches_catalog(&self) -> bool {
        self.parsed.device_info.metric_set_uuid == self.metric_set.hw_config_uuid
    }

    /// First and last unwrapped report timestamps.
    pub fn oa_timestamp_range(&self) -> Option<(GpuTimestamp, GpuTimestamp)> {
        let ts = &self.clock.sample_timestamps;
        Some((*ts.first()?, *ts.last()?))
    }

    pub fn timeline(&self) -> Vec<TimelineItem> {
        build_timeline_with(&self.parsed, &self.metric_set, &self.clock)
    }

    pub fn evaluate(&self, item: &TimelineItem, counters: &[&LogicalCounter]) -> Vec<CounterValue> {
        evaluate(
            &self.parsed,
            &self.metric_set,
            self.catalog.params(),
            item,
            counters,
        )
    }

    /// Whether a loss marker falls inside `item` or right before it.
    pub fn item_lost_data(&self, item: &TimelineItem) -> bool {
        self.parsed
            .losses_within(item.record_start, item.record_end)
            .next()
            .is_some()
    }
}
