//! Metric catalog
//!
//! Maps a device to the metric sets its chip family supports.

use oatrace_shared::{DeviceInfo, OaError, Topology};
use tracing::debug;

use crate::counter::LogicalCounter;
use crate::families::FAMILIES;
use crate::layout::ReportLayout;

/// Identity of the GPU a catalog is loaded for.
#[derive(Debug, Clone, Default)]
pub struct DeviceDescriptor {
    pub device_id: u32,
    pub revision: u32,
    /// Timestamp frequency in Hz
    pub timestamp_frequency: u64,
    /// GT frequency range in MHz
    pub gt_min_frequency: u32,
    pub gt_max_frequency: u32,
    pub topology: Topology,
}

impl DeviceDescriptor {
    /// Rebuilds a descriptor from the metadata of a recording.
    pub fn from_recording(info: &DeviceInfo, topology: &Topology) -> Self {
        Self {
            device_id: info.device_id,
            revision: info.device_revision,
            timestamp_frequency: info.timestamp_frequency,
            gt_min_frequency: info.gt_min_frequency,
            gt_max_frequency: info.gt_max_frequency,
            topology: topology.clone(),
        }
    }
}

/// Device values available to counter equations.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceParams {
    pub device_id: u32,
    pub revision: u32,
    pub timestamp_frequency: u64,
    pub gt_min_frequency: u32,
    pub gt_max_frequency: u32,
    pub eu_count: u32,
}

/// Static description of a metric set within a family table.
#[derive(Debug)]
pub struct MetricSetDef {
    pub symbol_name: &'static str,
    pub name: &'static str,
    pub hw_config_uuid: &'static str,
    pub layout: &'static ReportLayout,
    pub counters: &'static [LogicalCounter],
}

#[derive(Debug)]
pub struct ChipFamily {
    pub name: &'static str,
    pub device_ids: &'static [u32],
    /// Shift applied to raw report timestamps to get engine cycles
    pub timestamp_shift: i8,
    pub metric_sets: &'static [MetricSetDef],
}

/// A metric set bound to the family it was loaded for.
#[derive(Debug, Clone)]
pub struct MetricSet {
    pub symbol_name: &'static str,
    pub name: &'static str,
    pub hw_config_uuid: &'static str,
    pub layout: &'static ReportLayout,
    pub counters: &'static [LogicalCounter],
    pub timestamp_shift: i8,
}

impl MetricSet {
    fn bind(def: &'static MetricSetDef, family: &ChipFamily) -> Self {
        Self {
            symbol_name: def.symbol_name,
            name: def.name,
            hw_config_uuid: def.hw_config_uuid,
            layout: def.layout,
            counters: def.counters,
            timestamp_shift: family.timestamp_shift,
        }
    }

    /// Exact, case-sensitive lookup by symbol name.
    pub fn find_counter(&self, symbol_name: &str) -> Option<&'static LogicalCounter> {
        self.counters.iter().find(|c| c.symbol_name == symbol_name)
    }

    /// Every counter of the set in declaration order.
    pub fn resolve_all(&self) -> Vec<&'static LogicalCounter> {
        self.counters.iter().collect()
    }

    pub fn report_size(&self) -> usize {
        self.layout.report_size
    }
}

/// Metric sets available on one device.
#[derive(Debug, Clone)]
pub struct Catalog {
    family: &'static ChipFamily,
    params: DeviceParams,
    metric_sets: Vec<MetricSet>,
}

impl Catalog {
    /// Loads the catalog of the family `device` belongs to.
    pub fn load(device: &DeviceDescriptor) -> Result<Self, OaError> {
        let family = family_for_device(device.device_id).ok_or(OaError::UnsupportedDevice {
            device_id: device.device_id,
        })?;

        let params = DeviceParams {
            device_id: device.device_id,
            revision: device.revision,
            timestamp_frequency: device.timestamp_frequency,
            gt_min_frequency: device.gt_min_frequency,
            gt_max_frequency: device.gt_max_frequency,
            eu_count: device.topology.eu_count(),
        };

        let metric_sets = family
            .metric_sets
            .iter()
            .map(|def| MetricSet::bind(def, family))
            .collect::<Vec<_>>();

        debug!(
            "Loaded {} metric sets for device 0x{:04x} ({})",
            metric_sets.len(),
            device.device_id,
            family.name
        );

        Ok(Self {
            family,
            params,
            metric_sets,
        })
    }

    pub fn family_name(&self) -> &'static str {
        self.family.name
    }

    pub fn params(&self) -> &DeviceParams {
        &self.params
    }

    pub fn metric_sets(&self) -> &[MetricSet] {
        &self.metric_sets
    }

    /// Case-insensitive lookup by symbol name.
    pub fn metric_set(&self, symbol_name: &str) -> Result<&MetricSet, OaError> {
        self.metric_sets
            .iter()
            .find(|m| m.symbol_name.eq_ignore_ascii_case(symbol_name))
            .ok_or_else(|| OaError::UnknownMetricSet(symbol_name.to_string()))
    }
}

/// Loads the catalog for `device`; see [`Catalog::load`].
pub fn load_catalog(device: &DeviceDescriptor) -> Result<Catalog, OaError> {
    Catalog::load(device)
}

pub fn family_for_device(device_id: u32) -> Option<&'static ChipFamily> {
    FAMILIES.iter().find(|f| f.device_ids.contains(&device_id))
}

/// Every chip family in the catalog.
pub fn families() -> &'static [ChipFamily] {
    &FAMILIES
}
