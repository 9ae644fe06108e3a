//! In-memory limit table that enforces the kernel's rules.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use trellis_common::types::{RLIM_INFINITY, Rlimit, RlimitKind};

use super::sys::RlimitSyscalls;

/// Behaves like `setrlimit(2)`: soft may not exceed hard, an unprivileged
/// process may only lower its hard values, and a privileged one may raise
/// them up to the kind's system ceiling.
pub struct FakeRlimits {
    table: Mutex<BTreeMap<RlimitKind, Rlimit>>,
    ceilings: BTreeMap<RlimitKind, u64>,
    privileged: bool,
    failing: Mutex<HashSet<RlimitKind>>,
    log: Mutex<Vec<(RlimitKind, Rlimit)>>,
}

impl FakeRlimits {
    pub const NR_OPEN: u64 = 1_048_576;

    /// A process without `CAP_SYS_RESOURCE`.
    pub fn new() -> Self {
        let table = RlimitKind::ALL
            .into_iter()
            .map(|kind| {
                let limit = match kind {
                    RlimitKind::Nofile => Rlimit { soft: 1024, hard: 4096 },
                    RlimitKind::Stack => Rlimit { soft: 8 << 20, hard: RLIM_INFINITY },
                    RlimitKind::Core => Rlimit { soft: 0, hard: RLIM_INFINITY },
                    _ => Rlimit { soft: RLIM_INFINITY, hard: RLIM_INFINITY },
                };
                (kind, limit)
            })
            .collect();
        let ceilings = std::iter::once((RlimitKind::Nofile, Self::NR_OPEN)).collect();
        Self {
            table: Mutex::new(table),
            ceilings,
            privileged: false,
            failing: Mutex::new(HashSet::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// A process with `CAP_SYS_RESOURCE`.
    pub fn privileged() -> Self {
        Self {
            privileged: true,
            ..Self::new()
        }
    }

    pub fn snapshot(&self) -> BTreeMap<RlimitKind, Rlimit> {
        self.table.lock().unwrap().clone()
    }

    pub fn fail_sets(&self, kind: RlimitKind) {
        let _ = self.failing.lock().unwrap().insert(kind);
    }

    pub fn set_log(&self) -> Vec<(RlimitKind, Rlimit)> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }
}

impl RlimitSyscalls for FakeRlimits {
    fn get(&self, kind: RlimitKind) -> std::io::Result<Rlimit> {
        Ok(self.table.lock().unwrap()[&kind])
    }

    fn set(&self, kind: RlimitKind, limit: Rlimit) -> std::io::Result<()> {
        self.log.lock().unwrap().push((kind, limit));
        if self.failing.lock().unwrap().contains(&kind) {
            return Err(std::io::Error::from_raw_os_error(libc::EIO));
        }
        if limit.soft > limit.hard {
            return Err(std::io::Error::from_raw_os_error(libc::EINVAL));
        }
        let mut table = self.table.lock().unwrap();
        let ceiling = if self.privileged {
            self.ceilings.get(&kind).copied().unwrap_or(RLIM_INFINITY)
        } else {
            table[&kind].hard
        };
        if limit.hard > ceiling {
            return Err(std::io::Error::from_raw_os_error(libc::EPERM));
        }
        let _ = table.insert(kind, limit);
        Ok(())
    }
}
