//! Kernel `getrlimit(2)`/`setrlimit(2)` access.

use std::path::Path;

use trellis_common::error::{Result, TrellisError};
use trellis_common::types::{Rlimit, RlimitKind};

/// Get/set access to the process resource-limit table.
pub trait RlimitSyscalls: Send + Sync {
    /// Reads the current (soft, hard) pair for `kind`.
    ///
    /// # Errors
    ///
    /// Returns the OS error reported by the kernel.
    fn get(&self, kind: RlimitKind) -> std::io::Result<Rlimit>;

    /// Replaces the (soft, hard) pair for `kind`.
    ///
    /// # Errors
    ///
    /// Returns the OS error reported by the kernel, e.g. `EPERM` when
    /// raising a hard limit without `CAP_SYS_RESOURCE`.
    fn set(&self, kind: RlimitKind, limit: Rlimit) -> std::io::Result<()>;
}

/// The real kernel limit table of the calling process.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelRlimits;

#[cfg(target_os = "linux")]
const fn resource(kind: RlimitKind) -> nix::sys::resource::Resource {
    use nix::sys::resource::Resource;

    match kind {
        RlimitKind::Cpu => Resource::RLIMIT_CPU,
        RlimitKind::Fsize => Resource::RLIMIT_FSIZE,
        RlimitKind::Data => Resource::RLIMIT_DATA,
        RlimitKind::Stack => Resource::RLIMIT_STACK,
        RlimitKind::Core => Resource::RLIMIT_CORE,
        RlimitKind::Rss => Resource::RLIMIT_RSS,
        RlimitKind::Nproc => Resource::RLIMIT_NPROC,
        RlimitKind::Nofile => Resource::RLIMIT_NOFILE,
        RlimitKind::Memlock => Resource::RLIMIT_MEMLOCK,
        RlimitKind::As => Resource::RLIMIT_AS,
        RlimitKind::Locks => Resource::RLIMIT_LOCKS,
        RlimitKind::Sigpending => Resource::RLIMIT_SIGPENDING,
        RlimitKind::Msgqueue => Resource::RLIMIT_MSGQUEUE,
        RlimitKind::Nice => Resource::RLIMIT_NICE,
        RlimitKind::Rtprio => Resource::RLIMIT_RTPRIO,
    }
}

#[cfg(target_os = "linux")]
#[allow(clippy::useless_conversion)]
impl RlimitSyscalls for KernelRlimits {
    fn get(&self, kind: RlimitKind) -> std::io::Result<Rlimit> {
        let (soft, hard) = nix::sys::resource::getrlimit(resource(kind))?;
        Ok(Rlimit {
            soft: u64::from(soft),
            hard: u64::from(hard),
        })
    }

    fn set(&self, kind: RlimitKind, limit: Rlimit) -> std::io::Result<()> {
        let soft = libc::rlim_t::try_from(limit.soft).unwrap_or(libc::RLIM_INFINITY);
        let hard = libc::rlim_t::try_from(limit.hard).unwrap_or(libc::RLIM_INFINITY);
        nix::sys::resource::setrlimit(resource(kind), soft, hard)?;
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
impl RlimitSyscalls for KernelRlimits {
    fn get(&self, _kind: RlimitKind) -> std::io::Result<Rlimit> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Linux required for resource limits",
        ))
    }

    fn set(&self, _kind: RlimitKind, _limit: Rlimit) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Linux required for resource limits",
        ))
    }
}

/// Reads the kernel's runtime maximum for open file descriptors.
///
/// # Errors
///
/// Returns an `NrOpen` error if the file cannot be read or does not hold
/// a single unsigned decimal integer.
pub fn read_nr_open(path: &Path) -> Result<u64> {
    let contents = std::fs::read_to_string(path).map_err(|e| TrellisError::NrOpen {
        message: format!("failed to read {}: {e}", path.display()),
    })?;
    contents
        .trim()
        .parse::<u64>()
        .map_err(|e| TrellisError::NrOpen {
            message: format!("failed to convert contents of {}: {e}", path.display()),
        })
}
