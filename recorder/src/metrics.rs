//! Prometheus metrics for the recorder

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec, TextEncoder};

pub static SAMPLES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("oatrace_samples_total", "OA reports written as Sample records").unwrap()
});

pub static ANOMALIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "oatrace_stream_anomalies_total",
        "Loss markers written to the recording",
        &["kind"]
    )
    .unwrap()
});

pub static CORRELATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "oatrace_correlation_points_total",
        "CPU/GPU correlation points sampled"
    )
    .unwrap()
});

pub static BYTES_EVICTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "oatrace_circular_evicted_bytes_total",
        "Bytes evicted from the circular buffer"
    )
    .unwrap()
});

pub static DUMPS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("oatrace_dumps_total", "Recordings dumped on request").unwrap()
});

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
