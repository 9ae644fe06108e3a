//! The guest workload: the container's entry command, started under the
//! resource limits the host encoded into the environment.
//!
//! Limits are per process and inherited across `fork`, so the daemon
//! holds a limit transaction only around the `fork` itself. Everything the
//! parent needs (argument and environment vectors) is built before the
//! transaction opens, and the child goes straight to `execvpe`. Small
//! memory or descriptor limits therefore bind the entry command without
//! starving the daemon that supervises it.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::sync::OnceLock;

use trellis_common::constants::RLIMIT_ENV_PREFIX;
use trellis_common::error::{Result, TrellisError};
use trellis_common::types::ResourceLimits;
use trellis_core::rlimit::{KernelRlimits, RlimitSyscalls, RlimitsManager, decode_env};

use crate::containerizer::ContainerDaemon;
use crate::execer::{c_string, env_entry};

/// Exit code of a forked child whose `execvpe` failed.
#[cfg(target_os = "linux")]
const EXEC_FAILED: i32 = 127;

/// [`ContainerDaemon`] that runs one entry command to completion.
pub struct ProcessDaemon<S: 'static = KernelRlimits> {
    command: Vec<String>,
    manager: &'static RlimitsManager<S>,
    limits: OnceLock<ResourceLimits>,
}

impl ProcessDaemon {
    /// Creates a daemon for `command` using the process-wide limit manager.
    #[must_use]
    pub fn new(command: Vec<String>) -> Self {
        Self::with_manager(command, RlimitsManager::global())
    }
}

impl<S: RlimitSyscalls + 'static> ProcessDaemon<S> {
    /// Creates a daemon for `command` whose limit transactions go through
    /// `manager`.
    #[must_use]
    pub const fn with_manager(command: Vec<String>, manager: &'static RlimitsManager<S>) -> Self {
        Self {
            command,
            manager,
            limits: OnceLock::new(),
        }
    }

    fn init_from<I, T>(&self, env: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        if self.command.is_empty() {
            return Err(empty_command());
        }
        let limits = decode_env(env);
        tracing::debug!(kinds = limits.iter().count(), "decoded container limits");
        let _ = self.limits.set(limits);
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn execute(
        &self,
        program: &str,
        limits: &ResourceLimits,
        argv: &[CString],
        envp: &[CString],
    ) -> Result<()> {
        let child = self.start(program, limits, argv, envp)?;
        tracing::info!(pid = child.as_raw(), program, "container entry command started");
        wait_for(program, child)
    }

    #[cfg(not(target_os = "linux"))]
    fn execute(
        &self,
        program: &str,
        _limits: &ResourceLimits,
        _argv: &[CString],
        _envp: &[CString],
    ) -> Result<()> {
        Err(TrellisError::Command {
            program: program.to_owned(),
            message: "container entry commands require Linux".into(),
        })
    }

    /// Forks the entry command with `limits` in force for the child only.
    ///
    /// A failed restore leaves the daemon under the container's limits but
    /// never abandons the child: it is logged and the pid is returned.
    #[cfg(target_os = "linux")]
    fn start(
        &self,
        program: &str,
        limits: &ResourceLimits,
        argv: &[CString],
        envp: &[CString],
    ) -> Result<nix::unistd::Pid> {
        use nix::unistd::{ForkResult, fork};

        let argv = nul_terminated(argv);
        let envp = nul_terminated(envp);
        let transaction = !limits.is_empty();
        if transaction {
            self.manager.apply(limits)?;
        }

        // SAFETY: the child allocates nothing; it only calls execvpe and
        // _exit on pointer arrays built before the fork.
        let forked = match unsafe { fork() } {
            Ok(ForkResult::Child) => exec_child(&argv, &envp),
            Ok(ForkResult::Parent { child }) => Ok(child),
            Err(e) => Err(TrellisError::Command {
                program: program.to_owned(),
                message: format!("fork: {e}"),
            }),
        };

        if transaction {
            if let Err(e) = self.manager.restore() {
                tracing::error!(error = %e, program, "daemon limits not restored after fork");
            }
        }
        forked
    }
}

/// Pointer array for `exec*`: one entry per string, then a null.
#[cfg(target_os = "linux")]
fn nul_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

#[cfg(target_os = "linux")]
fn exec_child(argv: &[*const libc::c_char], envp: &[*const libc::c_char]) -> ! {
    // SAFETY: both arrays are null-terminated and point into strings the
    // parent frame keeps alive; execvpe only returns on failure.
    let _ = unsafe { libc::execvpe(argv[0], argv.as_ptr(), envp.as_ptr()) };
    // SAFETY: leaves the forked copy without running the parent's exit
    // handlers or flushing its buffers.
    unsafe { libc::_exit(EXEC_FAILED) }
}

#[cfg(target_os = "linux")]
fn wait_for(program: &str, child: nix::unistd::Pid) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::wait::{WaitStatus, waitpid};

    let failed = |message: String| TrellisError::Command {
        program: program.to_owned(),
        message,
    };
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, 0)) => {
                tracing::info!(program, "container entry command exited");
                return Ok(());
            }
            Ok(WaitStatus::Exited(_, code)) => {
                return Err(failed(format!("exited with status {code}")));
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Err(failed(format!("killed by {}", signal.as_str())));
            }
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => return Err(failed(format!("wait: {e}"))),
        }
    }
}

/// The daemon's own environment minus the limit entries meant for it.
fn entry_env() -> Result<Vec<CString>> {
    std::env::vars_os()
        .filter(|(key, _)| !key.as_bytes().starts_with(RLIMIT_ENV_PREFIX.as_bytes()))
        .map(|(key, value)| env_entry(key.as_bytes(), value.as_bytes()))
        .collect()
}

fn empty_command() -> TrellisError {
    TrellisError::Config {
        message: "container entry command is empty".into(),
    }
}

impl<S> std::fmt::Debug for ProcessDaemon<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessDaemon")
            .field("command", &self.command)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl<S: RlimitSyscalls + 'static> ContainerDaemon for ProcessDaemon<S> {
    fn init(&self) -> Result<()> {
        self.init_from(
            std::env::vars_os()
                .map(|(k, v)| format!("{}={}", k.to_string_lossy(), v.to_string_lossy())),
        )
    }

    fn run(&self) -> Result<()> {
        let Some(program) = self.command.first() else {
            return Err(empty_command());
        };
        let limits = self.limits.get().copied().unwrap_or_default();
        let argv = self
            .command
            .iter()
            .map(|arg| c_string(arg.as_bytes()))
            .collect::<Result<Vec<_>>>()?;
        let envp = entry_env()?;

        self.execute(program, &limits, &argv, &envp)
    }
}
