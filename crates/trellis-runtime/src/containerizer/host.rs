use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use trellis_common::constants::{HOOK_PARENT_AFTER_CLONE, HOOK_PARENT_BEFORE_CLONE, PID_ENV};
use trellis_common::error::{Result, TrellisError};
use trellis_core::handshake::{Signaller, Waiter};

use super::{ContainerExecer, HardCeilings};
use crate::command::{CommandRunner, hook_command, pivot_command};

/// Host side of container startup.
pub struct HostContainerizer {
    /// Binary executed as the container's first process.
    pub init_bin_path: PathBuf,
    /// Arguments for the init binary.
    pub init_args: Vec<String>,
    /// Root filesystem the container is pivoted into.
    pub rootfs_path: PathBuf,
    /// Directory holding the hook script and pivot tool.
    pub lib_path: PathBuf,
    /// How long to wait for the guest to confirm startup.
    pub timeout: Duration,
    /// Creates the init process.
    pub execer: Box<dyn ContainerExecer>,
    /// Raises hard limits before the clone.
    pub ceilings: Box<dyn HardCeilings>,
    /// Runs hooks and the pivot tool.
    pub runner: Box<dyn CommandRunner>,
    /// Host end of the handshake, sending.
    pub signaller: Arc<dyn Signaller + Send + Sync>,
    /// Host end of the handshake, receiving.
    pub waiter: Arc<dyn Waiter + Send + Sync>,
}

impl HostContainerizer {
    /// Creates the container and waits until its guest side is ready.
    ///
    /// Steps run strictly in order: the `parent-before-clone` hook, hard
    /// ceiling setup, init process creation, the `parent-after-clone` hook
    /// (with `PID` in its environment), the root filesystem pivot, then
    /// the handshake. Returns the init process id.
    ///
    /// # Errors
    ///
    /// The first failing step aborts the sequence; its error is wrapped
    /// with the step name. A failure the guest reported comes back from
    /// the final wait and satisfies [`TrellisError::is_signal_error`].
    pub fn create(&self) -> Result<u32> {
        tracing::info!(init = %self.init_bin_path.display(), rootfs = %self.rootfs_path.display(), "creating container");

        self.run_hook(HOOK_PARENT_BEFORE_CLONE, &[])
            .map_err(|e| TrellisError::step("run `parent-before-clone`", e))?;

        self.ceilings
            .raise()
            .map_err(|e| TrellisError::step("set hard rlimits", e))?;

        let pid = self
            .execer
            .exec(&self.init_bin_path, &self.init_args)
            .map_err(|e| TrellisError::step("create container", e))?;
        tracing::info!(pid, "container init process started");

        let published = [(PID_ENV.to_owned(), pid.to_string())];
        self.run_hook(HOOK_PARENT_AFTER_CLONE, &published)
            .map_err(|e| TrellisError::step("run `parent-after-clone`", e))?;

        self.runner
            .run(&mut pivot_command(&self.lib_path, &self.rootfs_path, pid))
            .map_err(|e| TrellisError::step("run pivotter", e))?;

        self.signaller
            .signal_success()
            .map_err(|e| TrellisError::step("send success signal to the container", e))?;

        self.waiter
            .wait(self.timeout)
            .map_err(|e| TrellisError::step("wait for container", e))?;

        tracing::info!(pid, "container ready");
        Ok(pid)
    }

    fn run_hook(&self, name: &str, env: &[(String, String)]) -> Result<()> {
        tracing::debug!(hook = name, "running hook");
        self.runner.run(&mut hook_command(&self.lib_path, name, env))
    }
}

impl std::fmt::Debug for HostContainerizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContainerizer")
            .field("init_bin_path", &self.init_bin_path)
            .field("init_args", &self.init_args)
            .field("rootfs_path", &self.rootfs_path)
            .field("lib_path", &self.lib_path)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
