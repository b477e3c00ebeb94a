//! Recorder configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `OATRACE_*` environment variables, then command line flags.

use anyhow::Context;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::circular::MIN_CIRCULAR_SIZE;
use crate::correlation::CorrelationClock;
use crate::device::DeviceSelector;

/// Ring size used when only a command fifo is given.
pub const DEFAULT_FIFO_CIRCULAR_SIZE: usize = 8 * 1024 * 1024;

/// Where recorded data goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// Stream every record to a file
    File(PathBuf),
    /// Keep the most recent records in memory, optionally written to `path`
    /// at shutdown
    Circular { size: usize, path: Option<PathBuf> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Device selector, `synthetic` or `synthetic:<pci id>`
    pub device: String,

    /// Metric set symbol name, matched case-insensitively
    pub metric_set: String,

    /// OA sampling period in microseconds
    pub sampling_period_us: u64,

    /// Correlation point cadence in milliseconds
    pub correlation_period_ms: u64,

    /// How early a correlation point may be taken, in microseconds
    pub correlation_slack_us: u64,

    pub correlation_clock: CorrelationClock,

    pub output: Option<PathBuf>,

    /// Circular buffer size in KiB
    pub circular_size_kib: Option<u64>,

    pub command_fifo: Option<PathBuf>,

    pub engine_class: u32,
    pub engine_instance: u32,

    /// Bytes requested from the device per read
    pub read_chunk_size: usize,

    /// Synthetic device only: reports between context switches
    pub synthetic_context_period: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            device: "synthetic".to_string(),
            metric_set: "RenderBasic".to_string(),
            sampling_period_us: 1000,
            correlation_period_ms: 1000,
            correlation_slack_us: 1000,
            correlation_clock: CorrelationClock::default(),
            output: None,
            circular_size_kib: None,
            command_fifo: None,
            engine_class: 0,
            engine_instance: 0,
            read_chunk_size: 64 * 1024,
            synthetic_context_period: 100,
        }
    }
}

/// Command line values that take precedence over every other layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub device: Option<String>,
    pub metric_set: Option<String>,
    pub sampling_period_us: Option<u64>,
    pub correlation_period_ms: Option<u64>,
    pub correlation_clock: Option<CorrelationClock>,
    pub output: Option<PathBuf>,
    pub circular_size_kib: Option<u64>,
    pub command_fifo: Option<PathBuf>,
}

impl RecorderConfig {
    pub fn load(file: Option<&Path>, overrides: &ConfigOverrides) -> anyhow::Result<Self> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&RecorderConfig::default())?);

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(Environment::with_prefix("OATRACE").try_parsing(true));

        if let Some(v) = &overrides.device {
            builder = builder.set_override("device", v.as_str())?;
        }
        if let Some(v) = &overrides.metric_set {
            builder = builder.set_override("metric_set", v.as_str())?;
        }
        if let Some(v) = overrides.sampling_period_us {
            builder = builder.set_override("sampling_period_us", v)?;
        }
        if let Some(v) = overrides.correlation_period_ms {
            builder = builder.set_override("correlation_period_ms", v)?;
        }
        if let Some(v) = overrides.correlation_clock {
            builder = builder.set_override("correlation_clock", v.to_string())?;
        }
        if let Some(v) = &overrides.output {
            builder = builder.set_override("output", v.to_string_lossy().into_owned())?;
        }
        if let Some(v) = overrides.circular_size_kib {
            builder = builder.set_override("circular_size_kib", v)?;
        }
        if let Some(v) = &overrides.command_fifo {
            builder = builder.set_override("command_fifo", v.to_string_lossy().into_owned())?;
        }

        let config: RecorderConfig = builder
            .build()
            .context("Failed to assemble recorder configuration")?
            .try_deserialize()
            .context("Invalid recorder configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn sampling_period(&self) -> Duration {
        Duration::from_micros(self.sampling_period_us)
    }

    pub fn correlation_period(&self) -> Duration {
        Duration::from_millis(self.correlation_period_ms)
    }

    pub fn correlation_slack(&self) -> Duration {
        Duration::from_micros(self.correlation_slack_us)
    }

    pub fn device_selector(&self) -> anyhow::Result<DeviceSelector> {
        self.device.parse()
    }

    pub fn output_mode(&self) -> anyhow::Result<OutputMode> {
        let size = match (self.circular_size_kib, &self.command_fifo) {
            (Some(kib), _) => Some(kib as usize * 1024),
            (None, Some(_)) => Some(DEFAULT_FIFO_CIRCULAR_SIZE),
            (None, None) => None,
        };

        match (size, &self.output) {
            (Some(size), path) => {
                if path.is_none() && self.command_fifo.is_none() {
                    anyhow::bail!(
                        "A circular buffer needs an output path or a command fifo to be read back"
                    );
                }
                Ok(OutputMode::Circular {
                    size,
                    path: path.clone(),
                })
            }
            (None, Some(path)) => Ok(OutputMode::File(path.clone())),
            (None, None) => anyhow::bail!("No output path or circular buffer configured"),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sampling_period_us == 0 {
            anyhow::bail!("Sampling period must be greater than 0");
        }

        if self.correlation_period_ms == 0 {
            anyhow::bail!("Correlation period must be greater than 0");
        }

        if self.correlation_slack() >= self.correlation_period() {
            anyhow::bail!("Correlation slack must be smaller than the correlation period");
        }

        if let Some(kib) = self.circular_size_kib {
            if (kib as usize) * 1024 < MIN_CIRCULAR_SIZE {
                anyhow::bail!(
                    "Circular buffer too small ({} KiB, min {} KiB)",
                    kib,
                    MIN_CIRCULAR_SIZE / 1024
                );
            }
        }

        if self.read_chunk_size == 0 {
            anyhow::bail!("Read chunk size must be greater than 0");
        }

        self.device_selector()?;
        self.output_mode()?;
        Ok(())
    }
}
