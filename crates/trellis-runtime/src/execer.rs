//! Launching the container init process in fresh namespaces.
//!
//! The child is created with `clone(2)`, receives the guest end of the
//! handshake channel at a fixed descriptor, and `execve`s the init binary
//! with the encoded resource limits in its environment.

use std::ffi::{CStr, CString, OsStr};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use trellis_common::constants::{HANDSHAKE_FD, HANDSHAKE_FD_ENV, RLIMIT_ENV_PREFIX};
use trellis_common::error::{Result, TrellisError};
use trellis_common::types::ResourceLimits;
use trellis_core::handshake::HandshakeChannel;
use trellis_core::rlimit::env_pairs;

use crate::containerizer::ContainerExecer;

#[cfg(target_os = "linux")]
const STACK_SIZE: usize = 1024 * 1024;

/// Exit code of a child that could not reach `execve`.
#[cfg(target_os = "linux")]
const EXEC_FAILED: isize = 127;

/// Which namespaces the init process is isolated in.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Namespaces {
    /// Isolate the mount table.
    pub mount: bool,
    /// Isolate hostname and domain name.
    pub uts: bool,
    /// Isolate System V IPC.
    pub ipc: bool,
    /// Isolate the process id space.
    pub pid: bool,
    /// Isolate the network stack.
    pub network: bool,
}

impl Default for Namespaces {
    fn default() -> Self {
        Self {
            mount: true,
            uts: true,
            ipc: true,
            pid: true,
            network: true,
        }
    }
}

impl Namespaces {
    /// No isolation at all; the child shares every namespace with the host.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            mount: false,
            uts: false,
            ipc: false,
            pid: false,
            network: false,
        }
    }

    #[cfg(target_os = "linux")]
    fn clone_flags(self) -> nix::sched::CloneFlags {
        use nix::sched::CloneFlags;

        let mut flags = CloneFlags::empty();
        for (enabled, flag) in [
            (self.mount, CloneFlags::CLONE_NEWNS),
            (self.uts, CloneFlags::CLONE_NEWUTS),
            (self.ipc, CloneFlags::CLONE_NEWIPC),
            (self.pid, CloneFlags::CLONE_NEWPID),
            (self.network, CloneFlags::CLONE_NEWNET),
        ] {
            if enabled {
                flags |= flag;
            }
        }
        flags
    }
}

/// [`ContainerExecer`] that clones the init process into new namespaces.
///
/// Owns the guest end of the handshake channel until the first `exec`
/// hands it to the child; the host's copy is closed right after, so the
/// host sees end-of-file if the child dies before signalling.
#[derive(Debug)]
pub struct NamespacedExecer {
    namespaces: Namespaces,
    limits: ResourceLimits,
    guest_end: Mutex<Option<UnixStream>>,
}

impl NamespacedExecer {
    /// Creates an execer that passes `guest` and `limits` to the child.
    #[must_use]
    pub fn new(guest: HandshakeChannel, limits: ResourceLimits) -> Self {
        Self {
            namespaces: Namespaces::default(),
            limits,
            guest_end: Mutex::new(Some(guest.into_stream())),
        }
    }

    /// Overrides the namespaces the child is created in.
    #[must_use]
    pub const fn with_namespaces(mut self, namespaces: Namespaces) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Environment for the child: the host's own, minus stale limit and
    /// handshake entries, plus this container's.
    fn child_env(&self) -> Result<Vec<CString>> {
        let mut env = Vec::new();
        for (key, value) in std::env::vars_os() {
            let stale = key.as_bytes().starts_with(RLIMIT_ENV_PREFIX.as_bytes())
                || key == OsStr::new(HANDSHAKE_FD_ENV);
            if !stale {
                env.push(env_entry(key.as_bytes(), value.as_bytes())?);
            }
        }
        for (key, value) in env_pairs(&self.limits) {
            env.push(env_entry(key.as_bytes(), value.as_bytes())?);
        }
        env.push(env_entry(
            HANDSHAKE_FD_ENV.as_bytes(),
            HANDSHAKE_FD.to_string().as_bytes(),
        )?);
        Ok(env)
    }
}

impl ContainerExecer for NamespacedExecer {
    fn exec(&self, path: &Path, args: &[String]) -> Result<u32> {
        let guest = self
            .guest_end
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| TrellisError::Handshake {
                message: "guest end was already handed to a container".into(),
            })?;

        let program = c_string(path.as_os_str().as_bytes())?;
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(program.clone());
        for arg in args {
            argv.push(c_string(arg.as_bytes())?);
        }
        let envp = self.child_env()?;

        tracing::debug!(
            program = %path.display(),
            namespaces = ?self.namespaces,
            "cloning container init process"
        );
        let pid = spawn(self.namespaces, guest.as_raw_fd(), &program, &argv, &envp).map_err(
            |message| TrellisError::Command {
                program: path.display().to_string(),
                message,
            },
        )?;
        drop(guest);
        Ok(pid)
    }
}

#[cfg(target_os = "linux")]
fn spawn(
    namespaces: Namespaces,
    guest_fd: RawFd,
    program: &CStr,
    argv: &[CString],
    envp: &[CString],
) -> std::result::Result<u32, String> {
    let mut stack = vec![0_u8; STACK_SIZE];
    let child = Box::new(|| child_main(guest_fd, program, argv, envp));

    // SAFETY: the child gets a private copy of the address space (no
    // CLONE_VM) and only calls fcntl, dup2 and execve on data prepared
    // before the clone.
    let pid = unsafe {
        nix::sched::clone(
            child,
            &mut stack,
            namespaces.clone_flags(),
            Some(libc::SIGCHLD),
        )
    }
    .map_err(|e| format!("clone: {e}"))?;

    u32::try_from(pid.as_raw()).map_err(|e| format!("invalid pid {pid}: {e}"))
}

#[cfg(not(target_os = "linux"))]
fn spawn(
    _namespaces: Namespaces,
    _guest_fd: RawFd,
    _program: &CStr,
    _argv: &[CString],
    _envp: &[CString],
) -> std::result::Result<u32, String> {
    Err("namespaced containers require Linux".into())
}

#[cfg(target_os = "linux")]
fn child_main(guest_fd: RawFd, program: &CStr, argv: &[CString], envp: &[CString]) -> isize {
    if guest_fd == HANDSHAKE_FD {
        // SAFETY: clears FD_CLOEXEC on a descriptor this process owns.
        if unsafe { libc::fcntl(guest_fd, libc::F_SETFD, 0) } < 0 {
            return EXEC_FAILED;
        }
    } else {
        // SAFETY: both descriptors are plain integers; dup2 leaves the
        // copy without FD_CLOEXEC so it survives execve.
        if unsafe { libc::dup2(guest_fd, HANDSHAKE_FD) } < 0 {
            return EXEC_FAILED;
        }
    }
    let _ = nix::unistd::execve(program, argv, envp);
    EXEC_FAILED
}

pub(crate) fn c_string(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|e| TrellisError::Config {
        message: format!("argument contains a NUL byte: {e}"),
    })
}

pub(crate) fn env_entry(key: &[u8], value: &[u8]) -> Result<CString> {
    let mut entry = Vec::with_capacity(key.len() + value.len() + 1);
    entry.extend_from_slice(key);
    entry.push(b'=');
    entry.extend_from_slice(value);
    c_string(&entry)
}
