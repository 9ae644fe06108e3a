//! Process resource limits.
//!
//! Limits are ambient process state: every thread in the process sees the
//! same table. [`RlimitsManager`] turns mutation of that table into a
//! serialized transaction with rollback.

pub mod ceiling;
pub mod codec;
pub mod manager;
pub mod sys;

pub use ceiling::{set_hard_rlimits, set_hard_rlimits_with};
pub use codec::{decode_env, encode_env, env_pairs};
pub use manager::RlimitsManager;
pub use sys::{KernelRlimits, RlimitSyscalls, read_nr_open};

#[cfg(test)]
pub(crate) mod fake;
