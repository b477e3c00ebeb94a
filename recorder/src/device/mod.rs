//! Device collaborators
//!
//! The recorder never talks to hardware directly. It drives an [`OaDevice`],
//! which hands out raw report bytes, reports stream anomalies and samples
//! correlated CPU/GPU timestamps.

pub mod synthetic;

use oatrace_gpu::DeviceDescriptor;
use oatrace_shared::{AnomalyKind, CorrelationPoint, OaError};
use std::os::fd::BorrowedFd;

use crate::correlation::CorrelationClock;

pub use synthetic::SyntheticDevice;

/// Result of one non-blocking read of the report stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes of whole reports were copied
    Data(usize),
    /// Nothing to read right now
    WouldBlock,
    /// The device flagged a problem; query `stream_status`
    Anomaly,
}

pub trait OaDevice {
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Descriptor to poll for readability. Devices without one are treated
    /// as always readable.
    fn poll_fd(&self) -> Option<BorrowedFd<'_>>;

    /// Copies whole reports into `buf` without blocking.
    fn read_reports(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, OaError>;

    /// Returns and clears the pending anomaly, if any.
    fn stream_status(&mut self) -> Result<Option<AnomalyKind>, OaError>;

    /// Samples CPU time in `clock` and the GPU timestamp as close together as
    /// the device allows.
    fn correlation_point(&mut self, clock: CorrelationClock) -> Result<CorrelationPoint, OaError>;
}

/// Which device the recorder opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Software generated reports for the given PCI device id
    Synthetic { device_id: u32 },
}

pub const DEFAULT_SYNTHETIC_DEVICE_ID: u32 = 0x9a49;

impl std::str::FromStr for DeviceSelector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = match s.split_once(':') {
            Some((kind, id)) => (kind, Some(id)),
            None => (s, None),
        };

        match kind.to_lowercase().as_str() {
            "synthetic" => {
                let device_id = match id {
                    None => DEFAULT_SYNTHETIC_DEVICE_ID,
                    Some(id) => {
                        let digits = id.trim_start_matches("0x").trim_start_matches("0X");
                        u32::from_str_radix(digits, 16)
                            .map_err(|e| anyhow::anyhow!("Invalid device id '{}': {}", id, e))?
                    }
                };
                Ok(DeviceSelector::Synthetic { device_id })
            }
            _ => anyhow::bail!("Invalid device selector: {}", s),
        }
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSelector::Synthetic { device_id } => write!(f, "synthetic:0x{:04x}", device_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_parse() {
        assert_eq!(
            "synthetic".parse::<DeviceSelector>().unwrap(),
            DeviceSelector::Synthetic { device_id: DEFAULT_SYNTHETIC_DEVICE_ID }
        );
        assert_eq!(
            "synthetic:0x5690".parse::<DeviceSelector>().unwrap(),
            DeviceSelector::Synthetic { device_id: 0x5690 }
        );
        assert!("drm:card0".parse::<DeviceSelector>().is_err());
        assert!("synthetic:zz".parse::<DeviceSelector>().is_err());
    }

    #[test]
    fn test_selector_display_round_trips() {
        let sel = DeviceSelector::Synthetic { device_id: 0x7d55 };
        assert_eq!(sel.to_string().parse::<DeviceSelector>().unwrap(), sel);
    }
}
