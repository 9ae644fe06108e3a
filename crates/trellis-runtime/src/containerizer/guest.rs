use std::sync::Arc;
use std::time::Duration;

use trellis_common::error::{Result, TrellisError};
use trellis_core::handshake::{Signaller, Waiter};

use super::{ContainerDaemon, ContainerInitializer};

/// Guest side of container startup, run as the container's first process.
pub struct GuestContainerizer {
    /// How long to wait for the host's go-ahead.
    pub timeout: Duration,
    /// In-container setup run once the host says go.
    pub initializer: Box<dyn ContainerInitializer>,
    /// The container workload.
    pub daemon: Box<dyn ContainerDaemon>,
    /// Guest end of the handshake, sending.
    pub signaller: Arc<dyn Signaller + Send + Sync>,
    /// Guest end of the handshake, receiving.
    pub waiter: Arc<dyn Waiter + Send + Sync>,
}

impl GuestContainerizer {
    /// Initializes the container and hands over to the daemon.
    ///
    /// Order: daemon init, wait for the host, container init, signal the
    /// host, run the daemon. Failures before the success signal are also
    /// reported to the host over the handshake channel.
    ///
    /// # Errors
    ///
    /// Returns the step error. If reporting it to the host fails too, the
    /// result is [`TrellisError::SignalFailed`] carrying both.
    pub fn run(&self) -> Result<()> {
        self.daemon
            .init()
            .map_err(|e| self.report("initialize daemon", e))?;

        self.waiter
            .wait(self.timeout)
            .map_err(|e| self.report("wait for host", e))?;

        self.initializer
            .init()
            .map_err(|e| self.report("initializing the container", e))?;

        self.signaller
            .signal_success()
            .map_err(|e| self.report("signal host", e))?;

        tracing::info!("container initialized, running daemon");
        self.daemon
            .run()
            .map_err(|e| TrellisError::step("run daemon", e))
    }

    fn report(&self, step: &'static str, source: TrellisError) -> TrellisError {
        let err = TrellisError::step(step, source);
        tracing::error!(step, error = %err, "guest startup failed");
        match self.signaller.signal_error(&err) {
            Ok(()) => err,
            Err(signal) => TrellisError::SignalFailed {
                signal: Box::new(signal),
                original: Box::new(err),
            },
        }
    }
}

impl std::fmt::Debug for GuestContainerizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestContainerizer")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
