//! Read command implementation

use anyhow::{Context, Result};
use clap::Args;
use oatrace_gpu::reason_names;
use oatrace_reader::counters::report_reason;
use oatrace_reader::export::ItemSummary;
use oatrace_reader::{
    report_deltas, select_counters, summarize, write_json, CounterSelection, Recording,
    RecordingSummary,
};
use oatrace_shared::utils::time::format_ns;
use std::path::PathBuf;

use crate::commands::list;
use crate::output;

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Recording file
    pub file: PathBuf,

    /// Comma separated counter names, "all", or "list"
    #[arg(short, long, default_value = "all")]
    pub counters: CounterSelection,

    /// Print every report with its reason and deltas
    #[arg(short, long)]
    pub reports: bool,

    /// Also write the summary as JSON to this file
    #[arg(long)]
    pub json: Option<PathBuf>,
}

pub fn run(args: ReadArgs) -> Result<()> {
    let data = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let recording = Recording::open(&data)
        .with_context(|| format!("Failed to open recording {}", args.file.display()))?;

    if args.counters == CounterSelection::List {
        list::print_counters(&recording.metric_set);
        return Ok(());
    }

    let (counters, missing) = select_counters(&recording.metric_set, &args.counters);
    for err in &missing {
        output::error(&err.to_string());
    }

    let summary = summarize(&recording, &counters);
    print_header(&recording, &summary);

    for item in &summary.items {
        print_item(item);
        if args.reports {
            print_reports(&recording, item);
        }
    }

    if let Some(path) = &args.json {
        write_json(&summary, path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        output::success(&format!("Summary written to {}", path.display()));
    }
    Ok(())
}

fn print_header(recording: &Recording<'_>, summary: &RecordingSummary) {
    output::heading(&format!(
        "Device {} ({})",
        summary.device_id, summary.family
    ));
    println!(
        "  metric set:   {} {}",
        summary.metric_set, summary.metric_set_uuid
    );
    if !summary.uuid_matches_catalog {
        output::warning(&format!(
            "Metric set {} was recorded with a configuration unknown to this catalog (expected {})",
            summary.metric_set, recording.metric_set.hw_config_uuid
        ));
    }
    println!("  reports:      {}", summary.reports);
    println!(
        "  timeline:     {} items, {} context switches",
        summary.timeline_items, summary.context_switches
    );
    println!("  correlations: {}", summary.correlation_points);
    if summary.correlation_points < 2 {
        output::error("Fewer than 2 correlation points, CPU times are extrapolated or missing");
    }
    if let Some((start, end)) = summary.cpu_range {
        println!(
            "  cpu range:    {} - {}",
            format_ns(start),
            format_ns(end)
        );
    }
    if let Some((start, end)) = summary.gpu_correlation_range {
        println!("  gpu range:    {} - {}", start, end);
    }
    if let Some((start, end)) = summary.oa_timestamp_range {
        println!("  oa range:     {} - {}", start, end);
    }
    if summary.report_lost + summary.buffer_lost > 0 {
        output::warning(&format!(
            "{} report lost and {} buffer lost markers",
            summary.report_lost, summary.buffer_lost
        ));
    }
    println!();
}

fn print_item(summary: &ItemSummary) {
    let item = &summary.item;
    let cpu = match (item.cpu_start, item.cpu_end) {
        (Some(start), Some(end)) => {
            format!("{} - {}", format_ns(start), format_ns(end))
        }
        _ => "unknown".to_string(),
    };
    let mut line = format!(
        "ctx {} reports [{}, {}) gpu {} - {} cpu {}",
        item.context_id, item.record_start, item.record_end, item.gpu_start, item.gpu_end, cpu
    );
    if summary.idle {
        line.push_str(" (idle)");
    }
    output::heading(&line);
    if summary.lost_data {
        output::warning("Data was lost in this range");
    }
    for (name, value) in &summary.counters {
        println!("  {:<28} {}", name, value);
    }
}

fn print_reports(recording: &Recording<'_>, summary: &ItemSummary) {
    let layout = recording.metric_set.layout;
    for index in summary.item.record_start..summary.item.record_end {
        let report = recording.parsed.samples[index].report;
        let reasons = reason_names(report_reason(layout, report)).join("|");
        let deltas = report_deltas(&recording.parsed, &recording.metric_set, index);
        println!(
            "    #{:<6} ts {:<14} {:<16} {:?}",
            index, recording.clock.sample_timestamps[index], reasons, deltas
        );
    }
}
