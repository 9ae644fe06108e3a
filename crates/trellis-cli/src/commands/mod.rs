//! CLI command definitions and dispatch.

pub mod create;
pub mod init;
pub mod limits;

use clap::{Parser, Subcommand};

/// Trellis: namespaced container creation with resource limits.
#[derive(Parser, Debug)]
#[command(name = trellis_common::constants::APP_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a container from a configuration file and print its pid.
    Create(create::CreateArgs),
    /// Container side of startup; run as the container's init process.
    Init(init::InitArgs),
    /// Show the resource limits of this process.
    Limits(limits::LimitsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Create(args) => create::execute(args),
        Command::Init(args) => init::execute(args),
        Command::Limits(args) => limits::execute(args),
    }
}
