//! Control command implementation

use anyhow::{Context, Result};
use clap::Args;
use oatrace_recorder::send_commands;
use oatrace_shared::protocol::command::{Command, DEFAULT_COMMAND_FIFO};
use std::path::PathBuf;

use crate::output;

#[derive(Args, Debug)]
pub struct ControlArgs {
    /// Command fifo of the running recorder
    #[arg(short = 'f', long, default_value = DEFAULT_COMMAND_FIFO)]
    pub command_fifo: PathBuf,

    /// Dump the recorder's circular buffer to this file
    #[arg(short, long)]
    pub dump: Option<PathBuf>,

    /// Stop the recorder
    #[arg(short, long)]
    pub quit: bool,
}

fn commands(args: &ControlArgs) -> Vec<Command> {
    let mut commands = Vec::new();
    if let Some(path) = &args.dump {
        commands.push(Command::Dump(path.clone()));
    }
    if args.quit {
        commands.push(Command::Quit);
    }
    commands
}

pub fn run(args: ControlArgs) -> Result<()> {
    let commands = commands(&args);
    if commands.is_empty() {
        anyhow::bail!("Nothing to send, use --dump and/or --quit");
    }

    send_commands(&args.command_fifo, &commands).with_context(|| {
        format!("Failed to reach a recorder on {}", args.command_fifo.display())
    })?;
    output::success(&format!(
        "Sent {} command(s) to {}",
        commands.len(),
        args.command_fifo.display()
    ));
    Ok(())
}
