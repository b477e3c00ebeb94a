//! Record command implementation

use anyhow::{Context, Result};
use clap::Args;
use oatrace_recorder::metrics::encode_metrics;
use oatrace_recorder::{recorder_from_config, ConfigOverrides, CorrelationClock, RecorderConfig};
use oatrace_shared::utils::parse_duration;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::info;

use crate::commands::list;
use crate::output;

#[derive(Args, Debug)]
pub struct RecordArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Device selector, e.g. "synthetic" or "synthetic:0x5690"
    #[arg(short, long)]
    pub device: Option<String>,

    /// Metric set name, or "list" to show the available ones
    #[arg(short, long)]
    pub metric: Option<String>,

    /// OA sampling period (e.g., "500us", "1ms")
    #[arg(short, long)]
    pub period: Option<String>,

    /// Correlation period (e.g., "1s", "250ms")
    #[arg(long)]
    pub correlation_period: Option<String>,

    /// Correlation clock: boot, mono or mono_raw
    #[arg(long)]
    pub clock: Option<CorrelationClock>,

    /// Output file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Circular buffer size in KiB
    #[arg(short, long)]
    pub size: Option<u64>,

    /// Command fifo path
    #[arg(short = 'f', long)]
    pub command_fifo: Option<PathBuf>,

    /// Write prometheus metrics here on exit
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
}

fn overrides(args: &RecordArgs) -> Result<ConfigOverrides> {
    let sampling_period_us = args
        .period
        .as_deref()
        .map(parse_duration)
        .transpose()
        .context("Failed to parse sampling period")?
        .map(|d| d.as_micros() as u64);
    let correlation_period_ms = args
        .correlation_period
        .as_deref()
        .map(parse_duration)
        .transpose()
        .context("Failed to parse correlation period")?
        .map(|d| d.as_millis() as u64);

    Ok(ConfigOverrides {
        device: args.device.clone(),
        metric_set: args.metric.clone(),
        sampling_period_us,
        correlation_period_ms,
        correlation_clock: args.clock,
        output: args.output.clone(),
        circular_size_kib: args.size,
        command_fifo: args.command_fifo.clone(),
    })
}

pub async fn run(args: RecordArgs) -> Result<()> {
    if args.metric.as_deref() == Some("list") {
        let device = args.device.as_deref().unwrap_or("synthetic");
        list::print_metric_sets(&list::load_catalog(device)?);
        return Ok(());
    }

    let config = RecorderConfig::load(args.config.as_deref(), &overrides(&args)?)?;
    let mut recorder = recorder_from_config(&config)?;

    let quit = recorder.quit_handle();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping");
            quit.store(true, Ordering::Relaxed);
        }
    });

    let stats = tokio::task::spawn_blocking(move || recorder.run())
        .await
        .context("Recorder thread panicked")??;
    signal.abort();

    output::success(&format!(
        "Recorded {} samples, {} correlation points, {} dumps",
        stats.samples, stats.correlations, stats.dumps
    ));
    if stats.report_lost + stats.buffer_lost > 0 {
        output::warning(&format!(
            "{} report lost and {} buffer lost markers",
            stats.report_lost, stats.buffer_lost
        ));
    }

    if let Some(path) = &args.metrics_out {
        std::fs::write(path, encode_metrics()?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: RecordArgs,
    }

    #[test]
    fn test_overrides_from_flags() {
        let wrapper = Wrapper::parse_from([
            "record", "--period", "500us", "--correlation-period", "250ms", "--clock", "boot",
            "-s", "64", "-f", "/tmp/fifo",
        ]);
        let o = overrides(&wrapper.args).unwrap();
        assert_eq!(o.sampling_period_us, Some(500));
        assert_eq!(o.correlation_period_ms, Some(250));
        assert_eq!(o.correlation_clock, Some(CorrelationClock::Boot));
        assert_eq!(o.circular_size_kib, Some(64));
        assert_eq!(o.command_fifo, Some(PathBuf::from("/tmp/fifo")));
        assert!(o.output.is_none());
    }

    #[test]
    fn test_bad_period_rejected() {
        let wrapper = Wrapper::parse_from(["record", "--period", "fast"]);
        assert!(overrides(&wrapper.args).is_err());
    }
}
