//! GPU OA metric catalog
//!
//! Describes the report formats produced by the OA unit, the metric sets each
//! chip family exposes, and turns pairs of raw reports into counter deltas.

pub mod accumulator;
pub mod catalog;
pub mod counter;
mod families;
pub mod layout;

pub use accumulator::{
    accumulate, raw_timestamp_for, read_context_id, read_timestamp, read_timestamp_raw, Accumulator,
};
pub use catalog::{load_catalog, Catalog, DeviceDescriptor, DeviceParams, MetricSet};
pub use counter::{CounterStorage, CounterUnit, CounterValue, LogicalCounter};
pub use layout::{reason_names, ReportLayout};

/// Period in nanoseconds of the OA sampling timer for `exponent`.
///
/// The hardware samples every `2^(exponent + 1)` timestamp ticks.
pub fn oa_exponent_to_period_ns(exponent: u32, timestamp_frequency: u64) -> u64 {
    let ticks = 2u64.saturating_pow(exponent + 1);
    oatrace_shared::utils::time::cycles_to_ns(ticks, timestamp_frequency)
}

/// Smallest exponent whose sampling period is at least `period_ns`.
///
/// Exponents are capped at 31.
pub fn oa_exponent_for_period(period_ns: u64, timestamp_frequency: u64) -> u32 {
    (0..31)
        .find(|&e| oa_exponent_to_period_ns(e, timestamp_frequency) >= period_ns)
        .unwrap_or(31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oa_exponent_for_period() {
        // 2^(e+1) ticks at 19.2MHz, 52.08ns per tick
        assert_eq!(oa_exponent_to_period_ns(0, 19_200_000), 104);
        assert_eq!(oa_exponent_for_period(100, 19_200_000), 0);
        // 1ms needs >= 19200 ticks: 2^15 = 32768
        assert_eq!(oa_exponent_for_period(1_000_000, 19_200_000), 14);
        assert_eq!(oa_exponent_for_period(u64::MAX, 19_200_000), 31);
    }
}
