//! Transactional application of resource limits to the current process.
//!
//! The manager has two states. In *idle* no transaction is open. In
//! *open* one caller has applied a limit set and holds the transaction
//! gate until it calls [`RlimitsManager::restore`]. A failed
//! [`RlimitsManager::apply`] rolls back and releases the gate itself, so
//! the kernel table only ever shows the pre-transaction limits or the full
//! requested set.

use std::sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError};

use trellis_common::error::{Result, TrellisError};
use trellis_common::types::{ResourceLimits, Rlimit, RlimitKind};

use super::sys::{KernelRlimits, RlimitSyscalls};

/// Serializes limit transactions across threads of one process.
pub struct RlimitsManager<S = KernelRlimits> {
    syscalls: S,
    gate: TransactionGate,
    saved: Mutex<Vec<(RlimitKind, Rlimit)>>,
}

/// Binary gate admitting one open transaction at a time.
///
/// Unlike a mutex guard it can be released from a different call than the
/// one that acquired it, which is what an `apply`/`restore` pair needs.
#[derive(Default)]
struct TransactionGate {
    held: Mutex<bool>,
    released: Condvar,
}

impl TransactionGate {
    fn acquire(&self) {
        let mut held = lock(&self.held);
        while *held {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
    }

    /// Releases the gate, returning whether it was held.
    fn release(&self) -> bool {
        let was_held = std::mem::replace(&mut *lock(&self.held), false);
        self.released.notify_one();
        was_held
    }

    fn is_held(&self) -> bool {
        *lock(&self.held)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RlimitsManager<KernelRlimits> {
    /// Creates a manager over the real kernel limit table.
    #[must_use]
    pub fn new() -> Self {
        Self::with_syscalls(KernelRlimits)
    }

    /// The process-wide manager.
    ///
    /// Limits are per process, so every transaction in the process should
    /// go through this one instance.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<RlimitsManager> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }
}

impl Default for RlimitsManager<KernelRlimits> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: RlimitSyscalls> RlimitsManager<S> {
    /// Creates a manager over the given limit table.
    pub fn with_syscalls(syscalls: S) -> Self {
        Self {
            syscalls,
            gate: TransactionGate::default(),
            saved: Mutex::new(Vec::new()),
        }
    }

    /// Returns the underlying limit table.
    pub const fn syscalls(&self) -> &S {
        &self.syscalls
    }

    /// Opens a transaction and sets soft and hard of every present kind to
    /// its requested value, in table order.
    ///
    /// Blocks while another transaction is open. On success the
    /// transaction stays open until [`RlimitsManager::restore`]. On failure
    /// every kind touched so far is put back, in reverse order, and the
    /// transaction is closed before returning.
    ///
    /// # Errors
    ///
    /// Returns the `Rlimit` error of the first get or set that failed.
    pub fn apply(&self, limits: &ResourceLimits) -> Result<()> {
        self.gate.acquire();
        tracing::debug!(count = limits.iter().count(), "rlimit transaction opened");

        let mut saved = Vec::new();
        for (kind, value) in limits.iter() {
            if let Err(e) = self.apply_one(kind, value, &mut saved) {
                tracing::warn!(kind = %kind, value, error = %e, "rlimit apply failed, rolling back");
                self.rollback(&saved);
                let _ = self.gate.release();
                return Err(e);
            }
        }

        *lock(&self.saved) = saved;
        tracing::info!("rlimits applied");
        Ok(())
    }

    fn apply_one(
        &self,
        kind: RlimitKind,
        value: u64,
        saved: &mut Vec<(RlimitKind, Rlimit)>,
    ) -> Result<()> {
        let previous = self.syscalls.get(kind).map_err(|e| TrellisError::Rlimit {
            kind: kind.name(),
            action: "get",
            source: e,
        })?;
        saved.push((kind, previous));

        self.syscalls
            .set(kind, Rlimit::fixed(value))
            .map_err(|e| TrellisError::Rlimit {
                kind: kind.name(),
                action: "set",
                source: e,
            })?;
        tracing::debug!(kind = %kind, value, previous = ?previous, "rlimit set");
        Ok(())
    }

    fn rollback(&self, saved: &[(RlimitKind, Rlimit)]) {
        for (kind, previous) in saved.iter().rev() {
            if let Err(e) = self.syscalls.set(*kind, *previous) {
                tracing::error!(kind = %kind, error = %e, "rlimit rollback failed");
            }
        }
    }

    /// Returns the pair that was in effect for `kind` before the open
    /// transaction, or `None` if the kind was not part of it or no
    /// transaction is open.
    pub fn previous_rlimit_value(&self, kind: RlimitKind) -> Option<Rlimit> {
        lock(&self.saved)
            .iter()
            .find(|(saved_kind, _)| *saved_kind == kind)
            .map(|(_, previous)| *previous)
    }

    /// Puts back every saved limit and closes the open transaction.
    ///
    /// The transaction is closed and one waiting [`RlimitsManager::apply`]
    /// admitted even when some limits could not be restored.
    ///
    /// # Errors
    ///
    /// Returns a `Restore` error listing every kind that failed, each with
    /// the OS error of its set.
    pub fn restore(&self) -> Result<()> {
        if !self.gate.is_held() {
            tracing::warn!("restore called with no open rlimit transaction");
            return Ok(());
        }

        let saved = std::mem::take(&mut *lock(&self.saved));
        let mut failures = Vec::new();
        for (kind, previous) in saved.iter().rev() {
            if let Err(e) = self.syscalls.set(*kind, *previous) {
                tracing::error!(kind = %kind, error = %e, "rlimit restore failed");
                failures.push((kind.name(), e));
            }
        }

        let _ = self.gate.release();
        tracing::info!(restored = saved.len() - failures.len(), "rlimit transaction closed");

        if failures.is_empty() {
            Ok(())
        } else {
            failures.reverse();
            Err(TrellisError::Restore { failures })
        }
    }
}
