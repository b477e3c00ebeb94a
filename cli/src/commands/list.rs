//! List command implementation

use anyhow::{Context, Result};
use clap::Args;
use oatrace_gpu::catalog::families;
use oatrace_gpu::{Catalog, CounterStorage, LogicalCounter, MetricSet};
use oatrace_recorder::{DeviceSelector, SyntheticDevice};

use crate::output;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Device whose metric sets to list, e.g. "synthetic:0x5690"
    #[arg(short, long)]
    pub device: Option<String>,

    /// Metric set whose counters to list (needs --device)
    #[arg(short, long, requires = "device")]
    pub metric: Option<String>,
}

pub fn run(args: ListArgs) -> Result<()> {
    let Some(device) = args.device else {
        print_families();
        return Ok(());
    };

    let catalog = load_catalog(&device)?;
    match args.metric {
        Some(metric) => print_counters(catalog.metric_set(&metric)?),
        None => print_metric_sets(&catalog),
    }
    Ok(())
}

/// Catalog of the device named by a selector string.
pub fn load_catalog(device: &str) -> Result<Catalog> {
    let selector: DeviceSelector = device.parse()?;
    let descriptor = match selector {
        DeviceSelector::Synthetic { device_id } => SyntheticDevice::descriptor_for(device_id),
    };
    Catalog::load(&descriptor).with_context(|| format!("No metric catalog for {}", selector))
}

fn print_families() {
    output::heading("Chip families");
    for family in families() {
        let ids = family
            .device_ids
            .iter()
            .map(|id| format!("0x{:04x}", id))
            .collect::<Vec<_>>()
            .join(", ");
        println!("  {:<6} {}", family.name, ids);
    }
}

pub fn print_metric_sets(catalog: &Catalog) {
    output::heading(&format!("Metric sets ({})", catalog.family_name()));
    for set in catalog.metric_sets() {
        println!(
            "  {:<14} {:<28} {}",
            set.symbol_name, set.name, set.hw_config_uuid
        );
    }
}

pub fn print_counters(set: &MetricSet) {
    output::heading(&format!("{} ({})", set.name, set.symbol_name));
    for counter in set.counters {
        println!("{}", counter_row(counter));
    }
}

fn counter_row(counter: &LogicalCounter) -> String {
    let storage = match counter.storage() {
        CounterStorage::Uint64 => "uint64",
        CounterStorage::Double => "double",
    };
    format!(
        "  {:<24} {:<8} {:<7} {}",
        counter.symbol_name,
        counter.unit.to_string(),
        storage,
        counter.desc
    )
}
