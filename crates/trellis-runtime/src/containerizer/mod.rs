//! The two halves of container startup and the collaborators they drive.
//!
//! Every side effect sits behind a trait so each half can be exercised
//! with recording fakes; the concrete kernel-backed implementations live
//! in the sibling modules.

mod guest;
mod host;

use std::path::Path;

use trellis_common::error::Result;

pub use guest::GuestContainerizer;
pub use host::HostContainerizer;

/// Starts the container init process in fresh namespaces.
pub trait ContainerExecer: Send + Sync {
    /// Launches `path` with `args` and returns the new process id.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be created.
    fn exec(&self, path: &Path, args: &[String]) -> Result<u32>;
}

/// Prepares the container environment from inside the guest.
pub trait ContainerInitializer: Send + Sync {
    /// Performs in-container setup such as hostname and `/proc`.
    ///
    /// # Errors
    ///
    /// Returns an error if any setup step fails.
    fn init(&self) -> Result<()>;
}

/// The long-running workload of the guest.
pub trait ContainerDaemon: Send + Sync {
    /// Prepares the workload before the host is contacted.
    ///
    /// # Errors
    ///
    /// Returns an error if the workload cannot be prepared.
    fn init(&self) -> Result<()>;

    /// Runs the workload. Blocks for the container's lifetime.
    ///
    /// # Errors
    ///
    /// Returns an error if the workload fails to start or exits non-zero.
    fn run(&self) -> Result<()>;
}

/// Raises the host's hard limits before the init process is cloned.
pub trait HardCeilings: Send + Sync {
    /// # Errors
    ///
    /// Returns the first kernel failure.
    fn raise(&self) -> Result<()>;
}

/// [`HardCeilings`] backed by the real process limit table.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelCeilings;

impl HardCeilings for KernelCeilings {
    fn raise(&self) -> Result<()> {
        trellis_core::rlimit::set_hard_rlimits()
    }
}
