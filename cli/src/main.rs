//! CLI for oatrace
//!
//! - record: record an OA counter stream to a file or a circular buffer
//! - control: ask a running recorder to dump its buffer or stop
//! - read: print the timeline and counter values of a recording
//! - list: show chip families, metric sets and counters

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "oatrace")]
#[command(about = "oatrace - GPU OA counter recorder and reader", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record OA reports from a device
    Record(commands::record::RecordArgs),

    /// Send commands to a running recorder
    Control(commands::control::ControlArgs),

    /// Read a recording
    Read(commands::read::ReadArgs),

    /// List chip families, metric sets and counters
    List(commands::list::ListArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Record(args) => commands::record::run(args).await,
        Commands::Control(args) => commands::control::run(args),
        Commands::Read(args) => commands::read::run(args),
        Commands::List(args) => commands::list::run(args),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
