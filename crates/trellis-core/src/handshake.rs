//! Host/guest rendezvous over a connected Unix socket pair.
//!
//! The host keeps one end and the guest inherits the other at
//! [`HANDSHAKE_FD`]. Each side sends newline-delimited JSON signals and
//! waits for the other's with a bounded, non-polling read. There is no
//! shared memory across the namespace boundary.

use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use trellis_common::constants::{HANDSHAKE_FD, HANDSHAKE_FD_ENV};
use trellis_common::error::{Result, TrellisError};

/// Sending half of the handshake.
pub trait Signaller {
    /// Tells the other side it may proceed.
    ///
    /// # Errors
    ///
    /// Returns a `Handshake` error if the channel is broken.
    fn signal_success(&self) -> Result<()>;

    /// Tells the other side this side failed, carrying `err` as context.
    ///
    /// # Errors
    ///
    /// Returns a `Handshake` error if the channel is broken.
    fn signal_error(&self, err: &TrellisError) -> Result<()>;
}

/// Receiving half of the handshake.
pub trait Waiter {
    /// Blocks until the other side signals, or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns `HandshakeTimeout` when the bound is exceeded, `Signalled`
    /// when the other side reported an error, and `Handshake` when the
    /// channel closed or carried garbage.
    fn wait(&self, timeout: Duration) -> Result<()>;

    /// Returns true when `err` came from an explicit remote error signal.
    fn is_signal_error(&self, err: &TrellisError) -> bool {
        err.is_signal_error()
    }
}

/// Wire format of a single signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Signal {
    Success,
    Error { message: String },
}

/// One end of the handshake channel.
#[derive(Debug)]
pub struct HandshakeChannel {
    stream: UnixStream,
    pending: Mutex<Vec<u8>>,
}

impl HandshakeChannel {
    /// Creates a connected pair: `(host end, guest end)`.
    ///
    /// # Errors
    ///
    /// Returns an error if `socketpair(2)` fails.
    pub fn pair() -> Result<(Self, Self)> {
        let (host, guest) = UnixStream::pair().map_err(|e| TrellisError::Handshake {
            message: format!("create socket pair: {e}"),
        })?;
        Ok((Self::from_stream(host), Self::from_stream(guest)))
    }

    /// Wraps an already connected stream.
    #[must_use]
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Adopts the guest end inherited across `execve`.
    ///
    /// The descriptor is taken from `TRELLIS_HANDSHAKE_FD`, falling back to
    /// the fixed descriptor number, and marked close-on-exec so the
    /// container's own processes do not inherit it.
    ///
    /// # Errors
    ///
    /// Returns a `Handshake` error if the variable is malformed or the
    /// descriptor is not open.
    pub fn from_env() -> Result<Self> {
        let fd = match std::env::var(HANDSHAKE_FD_ENV) {
            Ok(raw) => raw.parse::<RawFd>().map_err(|e| TrellisError::Handshake {
                message: format!("invalid {HANDSHAKE_FD_ENV}={raw}: {e}"),
            })?,
            Err(_) => HANDSHAKE_FD,
        };

        Self::adopt(fd)
    }

    /// Takes ownership of the open descriptor `fd` and sets close-on-exec.
    fn adopt(fd: RawFd) -> Result<Self> {
        // SAFETY: F_GETFD only reads the descriptor flags; on a descriptor
        // that is not open it fails with EBADF and touches nothing.
        if unsafe { libc::fcntl(fd, libc::F_GETFD) } < 0 {
            return Err(TrellisError::Handshake {
                message: format!(
                    "inherited descriptor {fd}: {}",
                    std::io::Error::last_os_error()
                ),
            });
        }

        // SAFETY: `fd` was just checked to be open, and the borrow does
        // not outlive this call.
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        let flags = nix::fcntl::FdFlag::FD_CLOEXEC;
        let _ = nix::fcntl::fcntl(borrowed, nix::fcntl::FcntlArg::F_SETFD(flags)).map_err(|e| {
            TrellisError::Handshake {
                message: format!("inherited descriptor {fd}: {e}"),
            }
        })?;

        // SAFETY: the descriptor is open and was handed to this process
        // for its exclusive use by the host.
        let stream = unsafe { UnixStream::from_raw_fd(fd) };
        tracing::debug!(fd, "adopted inherited handshake channel");
        Ok(Self::from_stream(stream))
    }

    /// Gives up the wrapper, returning the underlying socket.
    #[must_use]
    pub fn into_stream(self) -> UnixStream {
        self.stream
    }

    /// Raw descriptor of this end, for installing it in a child.
    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn send(&self, signal: &Signal) -> Result<()> {
        let mut line = serde_json::to_vec(signal)?;
        line.push(b'\n');
        (&self.stream)
            .write_all(&line)
            .map_err(|e| TrellisError::Handshake {
                message: format!("send signal: {e}"),
            })
    }

    fn take_line(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
        let end = pending.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = pending.drain(..=end).collect();
        let _ = line.pop();
        Some(line)
    }

    fn receive(&self, timeout: Duration) -> Result<Signal> {
        let deadline = Instant::now() + timeout;
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut chunk = [0_u8; 256];

        loop {
            if let Some(line) = Self::take_line(&mut pending) {
                return serde_json::from_slice(&line).map_err(|e| TrellisError::Handshake {
                    message: format!("malformed signal: {e}"),
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TrellisError::HandshakeTimeout { timeout });
            }
            self.stream
                .set_read_timeout(Some(remaining))
                .map_err(|e| TrellisError::Handshake {
                    message: format!("arm read timeout: {e}"),
                })?;

            match (&self.stream).read(&mut chunk) {
                Ok(0) => {
                    return Err(TrellisError::Handshake {
                        message: "closed by peer".into(),
                    });
                }
                Ok(n) => pending.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(TrellisError::HandshakeTimeout { timeout });
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(TrellisError::Handshake {
                        message: format!("receive signal: {e}"),
                    });
                }
            }
        }
    }
}

impl Signaller for HandshakeChannel {
    fn signal_success(&self) -> Result<()> {
        tracing::debug!("signalling success");
        self.send(&Signal::Success)
    }

    fn signal_error(&self, err: &TrellisError) -> Result<()> {
        tracing::debug!(error = %err, "signalling error");
        self.send(&Signal::Error {
            message: err.to_string(),
        })
    }
}

impl Waiter for HandshakeChannel {
    fn wait(&self, timeout: Duration) -> Result<()> {
        match self.receive(timeout)? {
            Signal::Success => Ok(()),
            Signal::Error { message } => Err(TrellisError::Signalled { message }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_crosses_the_pair() {
        let (host, guest) = HandshakeChannel::pair().expect("pair");
        host.signal_success().expect("signal");
        guest.wait(Duration::from_secs(1)).expect("wait");
    }

    #[test]
    fn both_directions_are_independent() {
        let (host, guest) = HandshakeChannel::pair().expect("pair");
        host.signal_success().expect("host signal");
        guest.signal_success().expect("guest signal");
        host.wait(Duration::from_secs(1)).expect("host wait");
        guest.wait(Duration::from_secs(1)).expect("guest wait");
    }

    #[test]
    fn error_signal_is_reported_as_signal_error() {
        let (host, guest) = HandshakeChannel::pair().expect("pair");
        guest
            .signal_error(&TrellisError::Config {
                message: "mount failed".into(),
            })
            .expect("signal");

        let err = host.wait(Duration::from_secs(1)).unwrap_err();
        assert!(host.is_signal_error(&err));
        assert!(err.to_string().contains("mount failed"));
    }

    #[test]
    fn wait_times_out_without_signal() {
        let (host, _guest) = HandshakeChannel::pair().expect("pair");
        let started = Instant::now();
        let err = host.wait(Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, TrellisError::HandshakeTimeout { .. }));
        assert!(!host.is_signal_error(&err));
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn closed_peer_is_a_channel_error() {
        let (host, guest) = HandshakeChannel::pair().expect("pair");
        drop(guest);
        let err = host.wait(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, TrellisError::Handshake { .. }));
    }

    #[test]
    fn garbage_is_a_channel_error() {
        let (host, guest) = UnixStream::pair().expect("pair");
        let host = HandshakeChannel::from_stream(host);
        (&guest).write_all(b"not json\n").expect("write");
        let err = host.wait(Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("malformed signal"));
    }

    #[test]
    fn signals_split_across_writes_are_reassembled() {
        let (host, guest) = UnixStream::pair().expect("pair");
        let host = HandshakeChannel::from_stream(host);
        let writer = std::thread::spawn(move || {
            (&guest).write_all(br#"{"type":"suc"#).expect("write");
            std::thread::sleep(Duration::from_millis(50));
            (&guest).write_all(b"cess\"}\n").expect("write");
            guest
        });
        host.wait(Duration::from_secs(2)).expect("wait");
        drop(writer.join().expect("join"));
    }

    #[test]
    fn adopting_a_closed_descriptor_fails() {
        let err = HandshakeChannel::adopt(1_000_000).unwrap_err();
        match err {
            TrellisError::Handshake { message } => {
                assert!(message.starts_with("inherited descriptor 1000000"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn adopted_descriptor_is_close_on_exec_and_usable() {
        use std::os::fd::IntoRawFd;

        let (host, guest) = HandshakeChannel::pair().expect("pair");
        let fd = guest.into_stream().into_raw_fd();
        // SAFETY: clears the flags of a descriptor this test owns.
        assert_eq!(unsafe { libc::fcntl(fd, libc::F_SETFD, 0) }, 0);

        let guest = HandshakeChannel::adopt(fd).expect("adopt");
        // SAFETY: reads the flags of the descriptor `guest` now owns.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_eq!(flags & libc::FD_CLOEXEC, libc::FD_CLOEXEC);

        guest.signal_success().expect("signal");
        host.wait(Duration::from_secs(1)).expect("host wait");
    }

    #[test]
    fn wire_format_is_tagged_json() {
        let json = serde_json::to_string(&Signal::Error {
            message: "x".into(),
        })
        .expect("serialize");
        assert_eq!(json, r#"{"type":"error","message":"x"}"#);
        assert_eq!(
            serde_json::to_string(&Signal::Success).expect("serialize"),
            r#"{"type":"success"}"#
        );
    }
}
