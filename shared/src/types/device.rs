//! Metadata embedded at the head of every recording
//!
//! These payloads describe the device and metric set a recording was taken
//! with, so a recording can be analysed without access to the hardware.

use serde::{Deserialize, Serialize};

/// Device timestamp in GPU cycles
pub type GpuTimestamp = u64;

/// CPU timestamp in nanoseconds of the correlation clock
pub type CpuTimestamp = u64;

/// Hardware context id of a report. `IDLE_CONTEXT_ID` marks idle periods.
pub type ContextId = u32;

/// Context id reported while no context runs on the engine.
pub const IDLE_CONTEXT_ID: ContextId = 0xffff_ffff;

/// Payload of the Version record. This structure must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordVersion {
    pub version: u32,
}

/// Device and metric set description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Frequency of the timestamps in the records, in Hz
    pub timestamp_frequency: u64,

    /// PCI device id
    pub device_id: u32,

    /// Stepping
    pub device_revision: u32,

    /// GT min/max frequencies in MHz
    pub gt_min_frequency: u32,
    pub gt_max_frequency: u32,

    /// Engine the OA unit was attached to
    pub engine_class: u32,
    pub engine_instance: u32,

    /// Report format identifier of the metric set
    pub oa_format: u32,

    /// Symbol name of the metric set
    pub metric_set_name: String,

    /// Hardware configuration identifier of the metric set
    pub metric_set_uuid: String,
}

/// GPU topology as reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub max_slices: u16,
    pub max_subslices: u16,
    pub max_eus_per_subslice: u16,

    /// Slice, subslice and EU availability masks, in that order
    pub data: Vec<u8>,
}

impl Topology {
    /// Topology with every slice, subslice and EU reported available.
    pub fn fully_populated(max_slices: u16, max_subslices: u16, max_eus_per_subslice: u16) -> Self {
        let slice_bytes = (max_slices as usize).div_ceil(8);
        let subslice_bytes = max_slices as usize * (max_subslices as usize).div_ceil(8);
        let eu_bytes = max_slices as usize
            * max_subslices as usize
            * (max_eus_per_subslice as usize).div_ceil(8);

        Self {
            max_slices,
            max_subslices,
            max_eus_per_subslice,
            data: vec![0xff; slice_bytes + subslice_bytes + eu_bytes],
        }
    }

    /// Number of EUs marked available in the EU mask section.
    pub fn eu_count(&self) -> u32 {
        let slice_bytes = (self.max_slices as usize).div_ceil(8);
        let subslice_bytes =
            self.max_slices as usize * (self.max_subslices as usize).div_ceil(8);
        self.data
            .iter()
            .skip(slice_bytes + subslice_bytes)
            .map(|b| b.count_ones())
            .sum()
    }
}

/// Paired CPU/GPU timestamps used to translate between clock domains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationPoint {
    /// CPU time in nanoseconds, in the configured correlation clock
    pub cpu_timestamp: CpuTimestamp,

    /// Engine timestamp associated with the OA unit
    pub gpu_timestamp: GpuTimestamp,
}

impl CorrelationPoint {
    pub fn new(cpu_timestamp: CpuTimestamp, gpu_timestamp: GpuTimestamp) -> Self {
        Self {
            cpu_timestamp,
            gpu_timestamp,
        }
    }
}
