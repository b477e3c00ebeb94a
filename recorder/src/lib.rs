//! OA stream recorder
//!
//! Reads raw OA reports from a device, wraps them into records and appends
//! them to a file or a bounded in-memory ring. A command fifo lets another
//! process ask for a snapshot of the ring or stop the recording.

pub mod circular;
pub mod command;
pub mod config;
pub mod correlation;
pub mod device;
pub mod metrics;
pub mod recorder;
pub mod retry;
pub mod sink;

pub use circular::CircularBuffer;
pub use command::{send_commands, CommandChannel};
pub use config::{ConfigOverrides, OutputMode, RecorderConfig};
pub use correlation::{CorrelationClock, CorrelationTracker};
pub use device::{DeviceSelector, OaDevice, ReadOutcome, SyntheticDevice};
pub use recorder::{Recorder, RecorderOptions, RecorderStats};
pub use sink::{FileSink, RecordWriter, Sink};

use anyhow::{Context, Result};
use oatrace_gpu::{oa_exponent_for_period, oa_exponent_to_period_ns, Catalog};
use oatrace_shared::utils::time::format_ns;
use std::time::Duration;
use tracing::info;

/// Opens the configured device and sink and builds a recorder ready to
/// [`Recorder::run`].
pub fn recorder_from_config(config: &RecorderConfig) -> Result<Recorder<SyntheticDevice>> {
    config.validate().context("Invalid configuration")?;

    let selector = config.device_selector()?;
    let descriptor = match selector {
        DeviceSelector::Synthetic { device_id } => SyntheticDevice::descriptor_for(device_id),
    };

    let catalog = Catalog::load(&descriptor).context("Failed to load metric catalog")?;
    let metric_set = catalog
        .metric_set(&config.metric_set)
        .with_context(|| format!("Device {} has no such metric set", selector))?
        .clone();
    info!(
        "Opened {} ({}), metric set {}",
        selector,
        catalog.family_name(),
        metric_set.symbol_name
    );

    let frequency = descriptor.timestamp_frequency;
    let exponent = oa_exponent_for_period(config.sampling_period().as_nanos() as u64, frequency);
    let period_ns = oa_exponent_to_period_ns(exponent, frequency);
    info!("OA exponent {} ({} sampling period)", exponent, format_ns(period_ns));

    let device = SyntheticDevice::new(descriptor, metric_set.clone())
        .with_period(Duration::from_nanos(period_ns))
        .live(config.synthetic_context_period);

    let (sink, shutdown_dump): (Box<dyn Sink>, _) = match config.output_mode()? {
        OutputMode::File(path) => {
            let sink = FileSink::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            (Box::new(sink), None)
        }
        OutputMode::Circular { size, path } => {
            info!("Recording into a {} KiB circular buffer", size / 1024);
            (Box::new(CircularBuffer::new(size)), path)
        }
    };

    let commands = config
        .command_fifo
        .as_deref()
        .map(CommandChannel::create)
        .transpose()
        .context("Failed to create command fifo")?;

    info!(
        "Correlation every {:?} on the {} clock",
        config.correlation_period(),
        config.correlation_clock
    );

    Ok(Recorder::new(
        device,
        metric_set,
        sink,
        commands,
        RecorderOptions::from_config(config, shutdown_dump),
    ))
}
