//! Time-related utilities

const NSEC_PER_SEC: u128 = 1_000_000_000;

/// Convert GPU cycles at `frequency` Hz into nanoseconds.
///
/// Returns 0 when the frequency is unknown.
pub fn cycles_to_ns(cycles: u64, frequency: u64) -> u64 {
    if frequency == 0 {
        return 0;
    }
    (cycles as u128 * NSEC_PER_SEC / frequency as u128) as u64
}

/// Convert nanoseconds into GPU cycles at `frequency` Hz.
pub fn ns_to_cycles(ns: u64, frequency: u64) -> u64 {
    (ns as u128 * frequency as u128 / NSEC_PER_SEC) as u64
}

/// Render nanoseconds as fractional seconds (e.g. `1.250000s`).
pub fn format_ns(ns: u64) -> String {
    format!("{}.{:06}s", ns / 1_000_000_000, (ns % 1_000_000_000) / 1000)
}
