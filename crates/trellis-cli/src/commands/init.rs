//! `trellis init`: Guest side of container startup.
//!
//! Runs as the container's first process. Talks to the host over the
//! inherited handshake descriptor, prepares the namespaces, then runs the
//! entry command under the limits found in the environment.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use trellis_core::handshake::HandshakeChannel;
use trellis_runtime::GuestContainerizer;
use trellis_runtime::daemon::ProcessDaemon;
use trellis_runtime::initializer::NamespaceInitializer;

/// Arguments for the `init` command.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Hostname to set inside the container.
    #[arg(long)]
    pub hostname: Option<String>,

    /// Do not mount a fresh /proc.
    #[arg(long)]
    pub no_proc: bool,

    /// How long to wait for the host, in milliseconds.
    #[arg(long, default_value_t = 3000)]
    pub handshake_timeout_ms: u64,

    /// Entry command and its arguments, after `--`.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `init` command. Blocks for the container's lifetime.
///
/// # Errors
///
/// Returns an error if the handshake descriptor is missing, any startup
/// step fails, or the entry command exits unsuccessfully.
pub fn execute(args: InitArgs) -> anyhow::Result<()> {
    let channel = Arc::new(HandshakeChannel::from_env()?);

    let containerizer = GuestContainerizer {
        timeout: Duration::from_millis(args.handshake_timeout_ms),
        initializer: Box::new(NamespaceInitializer {
            hostname: args.hostname,
            mount_proc: !args.no_proc,
        }),
        daemon: Box::new(ProcessDaemon::new(args.command)),
        signaller: channel.clone(),
        waiter: channel,
    };

    containerizer.run()?;
    Ok(())
}
