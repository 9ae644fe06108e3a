//! In-container setup performed by the guest once the host is done.

use std::path::Path;

use trellis_common::error::{Result, TrellisError};

use crate::containerizer::ContainerInitializer;

/// [`ContainerInitializer`] that prepares the UTS and mount namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceInitializer {
    /// Hostname set inside the UTS namespace, if any.
    pub hostname: Option<String>,
    /// Whether to mount a fresh `/proc` for the new pid namespace.
    pub mount_proc: bool,
}

impl ContainerInitializer for NamespaceInitializer {
    fn init(&self) -> Result<()> {
        if let Some(hostname) = &self.hostname {
            set_hostname(hostname)?;
        }
        if self.mount_proc {
            mount_proc(Path::new("/proc"))?;
        }
        tracing::info!(hostname = ?self.hostname, mount_proc = self.mount_proc, "container initialized");
        Ok(())
    }
}

/// Sets the hostname inside the UTS namespace.
///
/// # Errors
///
/// Returns an error if `sethostname(2)` fails.
#[cfg(target_os = "linux")]
pub fn set_hostname(hostname: &str) -> Result<()> {
    tracing::debug!(hostname, "setting container hostname");
    nix::unistd::sethostname(hostname).map_err(|e| TrellisError::Config {
        message: format!("sethostname {hostname}: {e}"),
    })
}

/// Sets the hostname inside the UTS namespace.
///
/// # Errors
///
/// Always returns an error on non-Linux platforms.
#[cfg(not(target_os = "linux"))]
pub fn set_hostname(_hostname: &str) -> Result<()> {
    Err(TrellisError::Config {
        message: "sethostname requires Linux".into(),
    })
}

/// Mounts a `proc` filesystem at `target`.
///
/// # Errors
///
/// Returns an error if `mount(2)` fails.
#[cfg(target_os = "linux")]
pub fn mount_proc(target: &Path) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    tracing::debug!(target = %target.display(), "mounting proc");
    mount(
        Some("proc"),
        target,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
    .map_err(|e| TrellisError::Io {
        path: target.to_path_buf(),
        source: e.into(),
    })
}

/// Mounts a `proc` filesystem at `target`.
///
/// # Errors
///
/// Always returns an error on non-Linux platforms.
#[cfg(not(target_os = "linux"))]
pub fn mount_proc(target: &Path) -> Result<()> {
    Err(TrellisError::Io {
        path: target.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::Unsupported, "mount requires Linux"),
    })
}
