//! Offline reader for oatrace recordings
//!
//! Parses a recording, maps GPU timestamps to CPU time through the
//! correlation points, splits the samples into per-context timeline items
//! and evaluates logical counters over each item.

pub mod correlation;
pub mod counters;
pub mod export;
pub mod parse;
pub mod recording;
pub mod timeline;

pub use correlation::{CorrelationTable, GpuClock, TimestampUnwrapper};
pub use counters::{evaluate, report_deltas, select_counters, CounterSelection};
pub use export::{summarize, write_json, RecordingSummary};
pub use parse::{parse, LostMarker, ParsedRecording};
pub use recording::Recording;
pub use timeline::{build_timeline, TimelineItem};
