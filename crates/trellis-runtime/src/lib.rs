//! Container creation and startup for the Trellis runtime.
//!
//! The host half ([`HostContainerizer`]) runs hooks, raises hard limits,
//! clones the init process, pivots its root filesystem, then confirms
//! startup over the handshake channel. The guest half
//! ([`GuestContainerizer`]) runs inside the new process and answers it.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod command;
pub mod containerizer;
pub mod daemon;
pub mod execer;
pub mod initializer;

pub use containerizer::{
    ContainerDaemon, ContainerExecer, ContainerInitializer, GuestContainerizer, HardCeilings,
    HostContainerizer, KernelCeilings,
};
