//! # trellis-core
//!
//! The resource-limit and synchronization core of the Trellis runtime.
//!
//! This crate provides:
//! - **Codec**: sparse resource limits to and from `GARDEN_RLIMIT_*`
//!   environment entries, for crossing an `execve` boundary.
//! - **Transaction manager**: all-or-nothing application of a limit set
//!   to the current process, serialized process-wide.
//! - **Hard ceilings**: raising every hard limit to the kernel maximum
//!   before a container's first process is created.
//! - **Handshake**: the host/guest rendezvous channel.
//!
//! Kernel calls sit behind [`rlimit::RlimitSyscalls`] so the transactional
//! behaviour can be exercised without privileges.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod handshake;
pub mod rlimit;
