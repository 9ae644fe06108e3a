//! Unified error types for the Trellis workspace.
//!
//! Every failure carries the context needed to diagnose it without
//! re-running: the limit kind, the containerizer step, or the command
//! that failed.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum TrellisError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A kernel get/set call for a single limit kind failed.
    #[error("{action} rlimit_{kind}: {source}")]
    Rlimit {
        /// Label of the limit kind, e.g. `nofile`.
        kind: &'static str,
        /// Which half of the get/set pair failed.
        action: &'static str,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// One or more saved limits could not be put back.
    #[error("restore rlimits failed: {}", restore_failures(failures))]
    Restore {
        /// Label of each kind that could not be restored, with the OS error
        /// its set returned.
        failures: Vec<(&'static str, std::io::Error)>,
    },

    /// The published open-file maximum could not be read.
    #[error("read nr_open: {message}")]
    NrOpen {
        /// Description of the read or parse failure.
        message: String,
    },

    /// The other side of the handshake did not answer in time.
    #[error("handshake timed out after {timeout:?}")]
    HandshakeTimeout {
        /// The wait bound that was exceeded.
        timeout: Duration,
    },

    /// The other side of the handshake explicitly reported a failure.
    #[error("remote signalled error: {message}")]
    Signalled {
        /// Failure context sent by the remote side.
        message: String,
    },

    /// The handshake channel itself is broken.
    #[error("handshake channel: {message}")]
    Handshake {
        /// Description of the channel failure.
        message: String,
    },

    /// An external command (hook, pivot tool, executor) failed.
    #[error("command {program} failed: {message}")]
    Command {
        /// Program that was invoked.
        program: String,
        /// Exit status or spawn error.
        message: String,
    },

    /// A containerizer step failed.
    #[error("containerizer: {step}: {source}")]
    Step {
        /// Name of the failing step.
        step: &'static str,
        /// Cause of the failure.
        source: Box<TrellisError>,
    },

    /// Reporting `original` to the other side failed as well.
    #[error("containerizer: signal error: {signal} (while signalling {original})")]
    SignalFailed {
        /// Why the error signal could not be delivered.
        signal: Box<TrellisError>,
        /// The failure that was being reported.
        original: Box<TrellisError>,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl TrellisError {
    /// Wraps `source` with the name of the containerizer step that failed.
    #[must_use]
    pub fn step(step: &'static str, source: Self) -> Self {
        Self::Step {
            step,
            source: Box::new(source),
        }
    }

    /// Returns true when the error originates from an explicit remote
    /// error signal, looking through step wrappers.
    #[must_use]
    pub fn is_signal_error(&self) -> bool {
        match self {
            Self::Signalled { .. } => true,
            Self::Step { source, .. } => source.is_signal_error(),
            _ => false,
        }
    }
}

fn restore_failures(failures: &[(&'static str, std::io::Error)]) -> String {
    failures
        .iter()
        .map(|(kind, source)| format!("rlimit_{kind}: {source}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TrellisError>;
