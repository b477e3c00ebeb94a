//! JSON export of a recording's timeline and counter values

use oatrace_gpu::{CounterValue, LogicalCounter};
use oatrace_shared::{CpuTimestamp, GpuTimestamp, OaError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::recording::Recording;
use crate::timeline::TimelineItem;

#[derive(Debug, Clone, Serialize)]
pub struct RecordingSummary {
    pub device_id: String,
    pub family: String,
    pub metric_set: String,
    pub metric_set_uuid: String,
    pub uuid_matches_catalog: bool,
    pub reports: usize,
    pub timeline_items: usize,
    /// Context id changes between consecutive timeline items
    pub context_switches: usize,
    pub correlation_points: usize,
    pub cpu_range: Option<(CpuTimestamp, CpuTimestamp)>,
    pub gpu_correlation_range: Option<(GpuTimestamp, GpuTimestamp)>,
    pub oa_timestamp_range: Option<(GpuTimestamp, GpuTimestamp)>,
    pub report_lost: usize,
    pub buffer_lost: usize,
    pub items: Vec<ItemSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemSummary {
    #[serde(flatten)]
    pub item: TimelineItem,
    pub idle: bool,
    pub lost_data: bool,
    pub counters: BTreeMap<String, CounterValue>,
}

/// Builds the summary of `recording`, evaluating `counters` for every
/// timeline item.
pub fn summarize(recording: &Recording<'_>, counters: &[&LogicalCounter]) -> RecordingSummary {
    let info = &recording.parsed.device_info;
    let timeline = recording.timeline();
    let table = recording.correlation();

    let items = timeline
        .into_iter()
        .map(|item| {
            let values = recording.evaluate(&item, counters);
            ItemSummary {
                idle: item.is_idle(),
                lost_data: recording.item_lost_data(&item),
                counters: counters
                    .iter()
                    .zip(values)
                    .map(|(c, v)| (c.symbol_name.to_string(), v))
                    .collect(),
                item,
            }
        })
        .collect::<Vec<_>>();

    let lost = |kind| {
        recording
            .parsed
            .losses
            .iter()
            .filter(|l| l.kind == kind)
            .count()
    };

    RecordingSummary {
        device_id: format!("0x{:04x}", info.device_id),
        family: recording.catalog.family_name().to_string(),
        metric_set: info.metric_set_name.clone(),
        metric_set_uuid: info.metric_set_uuid.clone(),
        uuid_matches_catalog: recording.uuid_matches_catalog(),
        reports: recording.parsed.samples.len(),
        timeline_items: items.len(),
        context_switches: items.len().saturating_sub(1),
        correlation_points: table.len(),
        cpu_range: table.cpu_range(),
        gpu_correlation_range: table.gpu_range(),
        oa_timestamp_range: recording.oa_timestamp_range(),
        report_lost: lost(oatrace_shared::AnomalyKind::ReportLost),
        buffer_lost: lost(oatrace_shared::AnomalyKind::BufferLost),
        items,
    }
}

pub fn to_json(summary: &RecordingSummary) -> Result<String, OaError> {
    serde_json::to_string_pretty(summary)
        .map_err(|e| OaError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

pub fn write_json(summary: &RecordingSummary, path: &Path) -> Result<(), OaError> {
    std::fs::write(path, to_json(summary)?)?;
    Ok(())
}
