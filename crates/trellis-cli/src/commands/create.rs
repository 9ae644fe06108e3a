//! `trellis create`: Create a container and wait until it is ready.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use trellis_common::config::ContainerizerConfig;
use trellis_core::handshake::HandshakeChannel;
use trellis_runtime::command::ProcessRunner;
use trellis_runtime::execer::NamespacedExecer;
use trellis_runtime::{HostContainerizer, KernelCeilings};

/// Arguments for the `create` command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Path to the container configuration file (JSON).
    #[arg(short, long, env = "TRELLIS_CONFIG")]
    pub config: PathBuf,
}

/// Executes the `create` command, printing the container pid on stdout.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or any creation step
/// fails, including a failure reported by the container itself.
#[allow(clippy::print_stdout)]
pub fn execute(args: CreateArgs) -> anyhow::Result<()> {
    let config = ContainerizerConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let timeout = config.handshake_timeout();

    let (host_end, guest_end) = HandshakeChannel::pair()?;
    let host_end = Arc::new(host_end);

    let containerizer = HostContainerizer {
        init_bin_path: config.init_bin_path,
        init_args: config.init_args,
        rootfs_path: config.rootfs_path,
        lib_path: config.lib_path,
        timeout,
        execer: Box::new(NamespacedExecer::new(guest_end, config.limits)),
        ceilings: Box::new(KernelCeilings),
        runner: Box::new(ProcessRunner),
        signaller: host_end.clone(),
        waiter: host_end,
    };

    let pid = containerizer.create()?;
    tracing::info!(pid, config = %args.config.display(), "container created");
    println!("{pid}");
    Ok(())
}
