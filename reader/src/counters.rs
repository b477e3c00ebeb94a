//! Counter selection and evaluation

use oatrace_gpu::{accumulate, DeviceParams, LogicalCounter, MetricSet};
use oatrace_gpu::{CounterValue, ReportLayout};
use oatrace_shared::OaError;
use tracing::warn;

use crate::parse::ParsedRecording;
use crate::timeline::TimelineItem;

/// Which counters the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterSelection {
    All,
    /// Print the available counters instead of evaluating
    List,
    Named(Vec<String>),
}

impl std::str::FromStr for CounterSelection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(CounterSelection::All),
            "list" => Ok(CounterSelection::List),
            names => {
                let names: Vec<String> = names
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect();
                if names.is_empty() {
                    anyhow::bail!("No counter names given");
                }
                Ok(CounterSelection::Named(names))
            }
        }
    }
}

/// Resolves `selection` against `metric_set`.
///
/// Unknown names are returned as `CounterNotFound` errors alongside the
/// counters that were found. `List` resolves to nothing.
pub fn select_counters(
    metric_set: &MetricSet,
    selection: &CounterSelection,
) -> (Vec<&'static LogicalCounter>, Vec<OaError>) {
    match selection {
        CounterSelection::All => (metric_set.resolve_all(), Vec::new()),
        CounterSelection::List => (Vec::new(), Vec::new()),
        CounterSelection::Named(names) => {
            let mut found = Vec::new();
            let mut missing = Vec::new();
            for name in names {
                match metric_set.find_counter(name) {
                    Some(counter) => found.push(counter),
                    None => {
                        warn!("Counter {} not in metric set {}", name, metric_set.symbol_name);
                        missing.push(OaError::CounterNotFound(name.clone()));
                    }
                }
            }
            (found, missing)
        }
    }
}

/// Values of `counters` over `item`, accumulated between its first and last
/// samples.
pub fn evaluate(
    parsed: &ParsedRecording<'_>,
    metric_set: &MetricSet,
    params: &DeviceParams,
    item: &TimelineItem,
    counters: &[&LogicalCounter],
) -> Vec<CounterValue> {
    let first = parsed.samples[item.record_start].report;
    let last = parsed.samples[item.record_end.max(item.record_start + 1) - 1].report;
    let acc = accumulate(metric_set, first, last);
    counters
        .iter()
        .map(|c| c.evaluate(params, acc.deltas()))
        .collect()
}

/// Deltas between sample `index - 1` and sample `index`.
pub fn report_deltas(parsed: &ParsedRecording<'_>, metric_set: &MetricSet, index: usize) -> Vec<u64> {
    if index == 0 || index >= parsed.samples.len() {
        return Vec::new();
    }
    let acc = accumulate(
        metric_set,
        parsed.samples[index - 1].report,
        parsed.samples[index].report,
    );
    acc.deltas().to_vec()
}

/// Reason bits of a report.
pub fn report_reason(layout: &ReportLayout, report: &[u8]) -> u32 {
    layout.read_reason(report)
}
