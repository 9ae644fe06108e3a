//! Domain primitive types used across the Trellis workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Value the kernel treats as "no limit".
pub const RLIM_INFINITY: u64 = u64::MAX;

/// One of the fifteen per-process resource limits the kernel enforces.
///
/// Discriminants are the kernel's own resource identifiers, so the
/// ordering of [`RlimitKind::ALL`] is the fixed table order every
/// transaction applies limits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum RlimitKind {
    /// CPU time in seconds.
    Cpu = 0,
    /// Largest file the process may create.
    Fsize = 1,
    /// Data segment size.
    Data = 2,
    /// Stack size.
    Stack = 3,
    /// Core dump size.
    Core = 4,
    /// Resident set size.
    Rss = 5,
    /// Number of processes for the real user.
    Nproc = 6,
    /// Number of open file descriptors.
    Nofile = 7,
    /// Locked memory size.
    Memlock = 8,
    /// Address space size.
    As = 9,
    /// Number of file locks.
    Locks = 10,
    /// Number of queued signals.
    Sigpending = 11,
    /// Bytes in POSIX message queues.
    Msgqueue = 12,
    /// Ceiling of the nice priority.
    Nice = 13,
    /// Ceiling of the real-time priority.
    Rtprio = 14,
}

impl RlimitKind {
    /// Every limit kind in kernel identifier order.
    pub const ALL: [Self; 15] = [
        Self::Cpu,
        Self::Fsize,
        Self::Data,
        Self::Stack,
        Self::Core,
        Self::Rss,
        Self::Nproc,
        Self::Nofile,
        Self::Memlock,
        Self::As,
        Self::Locks,
        Self::Sigpending,
        Self::Msgqueue,
        Self::Nice,
        Self::Rtprio,
    ];

    /// Kernel resource identifier.
    #[must_use]
    pub const fn id(self) -> u32 {
        self as u32
    }

    /// Lowercase label, as used in `rlimit_<name>` error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Fsize => "fsize",
            Self::Data => "data",
            Self::Stack => "stack",
            Self::Core => "core",
            Self::Rss => "rss",
            Self::Nproc => "nproc",
            Self::Nofile => "nofile",
            Self::Memlock => "memlock",
            Self::As => "as",
            Self::Locks => "locks",
            Self::Sigpending => "sigpending",
            Self::Msgqueue => "msgqueue",
            Self::Nice => "nice",
            Self::Rtprio => "rtprio",
        }
    }

    /// Environment key the limit travels under, e.g. `GARDEN_RLIMIT_CPU`.
    #[must_use]
    pub fn env_key(self) -> String {
        format!(
            "{}{}",
            crate::constants::RLIMIT_ENV_PREFIX,
            self.name().to_ascii_uppercase()
        )
    }
}

impl fmt::Display for RlimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A kernel (soft, hard) limit pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rlimit {
    /// Currently enforced ceiling.
    pub soft: u64,
    /// Maximum the soft value may be raised to without privilege.
    pub hard: u64,
}

impl Rlimit {
    /// Creates a pair with both values set to `value`.
    #[must_use]
    pub const fn fixed(value: u64) -> Self {
        Self {
            soft: value,
            hard: value,
        }
    }
}

/// Sparse set of resource limits requested for a container process.
///
/// `None` means "leave this limit alone", never "set it to zero".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Address space size.
    #[serde(rename = "as")]
    pub address_space: Option<u64>,
    /// Core dump size.
    pub core: Option<u64>,
    /// CPU time in seconds.
    pub cpu: Option<u64>,
    /// Data segment size.
    pub data: Option<u64>,
    /// Largest file the process may create.
    pub fsize: Option<u64>,
    /// Number of file locks.
    pub locks: Option<u64>,
    /// Locked memory size.
    pub memlock: Option<u64>,
    /// Bytes in POSIX message queues.
    pub msgqueue: Option<u64>,
    /// Ceiling of the nice priority.
    pub nice: Option<u64>,
    /// Number of open file descriptors.
    pub nofile: Option<u64>,
    /// Number of processes.
    pub nproc: Option<u64>,
    /// Resident set size.
    pub rss: Option<u64>,
    /// Ceiling of the real-time priority.
    pub rtprio: Option<u64>,
    /// Number of queued signals.
    pub sigpending: Option<u64>,
    /// Stack size.
    pub stack: Option<u64>,
}

impl ResourceLimits {
    /// Returns the requested value for `kind`, if present.
    #[must_use]
    pub const fn get(&self, kind: RlimitKind) -> Option<u64> {
        match kind {
            RlimitKind::Cpu => self.cpu,
            RlimitKind::Fsize => self.fsize,
            RlimitKind::Data => self.data,
            RlimitKind::Stack => self.stack,
            RlimitKind::Core => self.core,
            RlimitKind::Rss => self.rss,
            RlimitKind::Nproc => self.nproc,
            RlimitKind::Nofile => self.nofile,
            RlimitKind::Memlock => self.memlock,
            RlimitKind::As => self.address_space,
            RlimitKind::Locks => self.locks,
            RlimitKind::Sigpending => self.sigpending,
            RlimitKind::Msgqueue => self.msgqueue,
            RlimitKind::Nice => self.nice,
            RlimitKind::Rtprio => self.rtprio,
        }
    }

    /// Sets (or clears, with `None`) the requested value for `kind`.
    pub fn set(&mut self, kind: RlimitKind, value: Option<u64>) {
        let slot = match kind {
            RlimitKind::Cpu => &mut self.cpu,
            RlimitKind::Fsize => &mut self.fsize,
            RlimitKind::Data => &mut self.data,
            RlimitKind::Stack => &mut self.stack,
            RlimitKind::Core => &mut self.core,
            RlimitKind::Rss => &mut self.rss,
            RlimitKind::Nproc => &mut self.nproc,
            RlimitKind::Nofile => &mut self.nofile,
            RlimitKind::Memlock => &mut self.memlock,
            RlimitKind::As => &mut self.address_space,
            RlimitKind::Locks => &mut self.locks,
            RlimitKind::Sigpending => &mut self.sigpending,
            RlimitKind::Msgqueue => &mut self.msgqueue,
            RlimitKind::Nice => &mut self.nice,
            RlimitKind::Rtprio => &mut self.rtprio,
        };
        *slot = value;
    }

    /// Iterates over the present limits in table order.
    pub fn iter(&self) -> impl Iterator<Item = (RlimitKind, u64)> + '_ {
        RlimitKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|value| (kind, value)))
    }

    /// Returns true when no limit is requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_order_matches_kernel_ids() {
        for (index, kind) in RlimitKind::ALL.iter().enumerate() {
            assert_eq!(kind.id() as usize, index);
        }
        assert_eq!(RlimitKind::Rtprio.id(), 14);
    }

    #[test]
    fn env_key_is_prefixed_uppercase() {
        assert_eq!(RlimitKind::Cpu.env_key(), "GARDEN_RLIMIT_CPU");
        assert_eq!(RlimitKind::Sigpending.env_key(), "GARDEN_RLIMIT_SIGPENDING");
    }

    #[test]
    fn get_and_set_address_every_kind() {
        let mut limits = ResourceLimits::default();
        for kind in RlimitKind::ALL {
            limits.set(kind, Some(u64::from(kind.id()) + 100));
        }
        for kind in RlimitKind::ALL {
            assert_eq!(limits.get(kind), Some(u64::from(kind.id()) + 100));
        }
        limits.set(RlimitKind::Nofile, None);
        assert_eq!(limits.get(RlimitKind::Nofile), None);
        assert_eq!(limits.iter().count(), 14);
    }

    #[test]
    fn iter_yields_present_kinds_in_table_order() {
        let limits = ResourceLimits {
            nofile: Some(800),
            stack: Some(1 << 23),
            cpu: Some(0),
            ..ResourceLimits::default()
        };
        let kinds: Vec<_> = limits.iter().map(|(kind, _)| kind).collect();
        assert_eq!(
            kinds,
            vec![RlimitKind::Cpu, RlimitKind::Stack, RlimitKind::Nofile]
        );
        assert!(!limits.is_empty());
        assert!(ResourceLimits::default().is_empty());
    }

    #[test]
    fn serde_uses_kernel_labels() {
        let limits = ResourceLimits {
            address_space: Some(4_194_304),
            ..ResourceLimits::default()
        };
        let json = serde_json::to_string(&limits).expect("serialize");
        assert!(json.contains("\"as\":4194304"));
        let back: ResourceLimits = serde_json::from_str(r#"{"as":4194304}"#).expect("parse");
        assert_eq!(back, limits);
    }
}
