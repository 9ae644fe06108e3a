//! Raising hard limits before a container's first process exists.
//!
//! Soft limits requested later can never exceed the hard ceiling they
//! inherit, so every hard ceiling is lifted to the kernel maximum first.
//! This only ever raises ceilings, so a partial failure needs no rollback.

use std::path::Path;

use trellis_common::constants::NR_OPEN_PATH;
use trellis_common::error::{Result, TrellisError};
use trellis_common::types::{RLIM_INFINITY, Rlimit, RlimitKind};

use super::sys::{KernelRlimits, RlimitSyscalls, read_nr_open};

/// Raises the hard ceiling of every limit kind of the current process.
///
/// # Errors
///
/// Returns an error if `/proc/sys/fs/nr_open` cannot be read or any
/// get/set pair fails; the error names the offending limit kind.
pub fn set_hard_rlimits() -> Result<()> {
    set_hard_rlimits_with(&KernelRlimits, Path::new(NR_OPEN_PATH))
}

/// Raises every hard ceiling through `syscalls`.
///
/// Every kind is lifted to infinity except `nofile`, whose ceiling is the
/// value published at `nr_open_path`. Soft values are left untouched.
///
/// # Errors
///
/// Same as [`set_hard_rlimits`].
pub fn set_hard_rlimits_with<S>(syscalls: &S, nr_open_path: &Path) -> Result<()>
where
    S: RlimitSyscalls + ?Sized,
{
    let max_nofile = read_nr_open(nr_open_path)?;

    for kind in RlimitKind::ALL {
        let ceiling = if kind == RlimitKind::Nofile {
            max_nofile
        } else {
            RLIM_INFINITY
        };
        set_hard_rlimit(syscalls, kind, ceiling)?;
    }

    tracing::info!(max_nofile, "hard rlimits raised");
    Ok(())
}

fn set_hard_rlimit<S>(syscalls: &S, kind: RlimitKind, ceiling: u64) -> Result<()>
where
    S: RlimitSyscalls + ?Sized,
{
    let current = syscalls.get(kind).map_err(|e| TrellisError::Rlimit {
        kind: kind.name(),
        action: "get system",
        source: e,
    })?;

    let raised = Rlimit {
        soft: current.soft,
        hard: ceiling,
    };
    syscalls.set(kind, raised).map_err(|e| TrellisError::Rlimit {
        kind: kind.name(),
        action: "setting hard",
        source: e,
    })?;
    tracing::debug!(kind = %kind, hard = ceiling, "hard rlimit raised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::fake::FakeRlimits;
    use super::*;

    fn nr_open_file(contents: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        std::fs::write(file.path(), contents).expect("write nr_open");
        file
    }

    #[test]
    fn raises_every_ceiling_and_keeps_soft() {
        let fake = FakeRlimits::privileged();
        let before = fake.snapshot();
        let nr_open = nr_open_file("1048576\n");

        set_hard_rlimits_with(&fake, nr_open.path()).expect("set hard rlimits");

        let after = fake.snapshot();
        for kind in RlimitKind::ALL {
            assert_eq!(after[&kind].soft, before[&kind].soft, "{kind}");
            let expected = if kind == RlimitKind::Nofile {
                1_048_576
            } else {
                RLIM_INFINITY
            };
            assert_eq!(after[&kind].hard, expected, "{kind}");
        }
    }

    #[test]
    fn unreadable_nr_open_aborts_before_any_change() {
        let fake = FakeRlimits::new();
        fake.clear_log();
        let err = set_hard_rlimits_with(&fake, Path::new("/nonexistent/nr_open")).unwrap_err();
        assert!(matches!(err, TrellisError::NrOpen { .. }));
        assert!(fake.set_log().is_empty());
    }

    #[test]
    fn failing_kind_is_named_in_error() {
        let fake = FakeRlimits::privileged();
        fake.fail_sets(RlimitKind::Memlock);
        let nr_open = nr_open_file("1048576");

        let err = set_hard_rlimits_with(&fake, nr_open.path()).unwrap_err();
        assert!(err.to_string().starts_with("setting hard rlimit_memlock"), "{err}");
    }

    #[test]
    fn nofile_ceiling_above_system_maximum_fails() {
        let fake = FakeRlimits::privileged();
        let nr_open = nr_open_file(&(FakeRlimits::NR_OPEN + 1).to_string());

        let err = set_hard_rlimits_with(&fake, nr_open.path()).unwrap_err();
        assert!(err.to_string().contains("rlimit_nofile"), "{err}");
        // Kinds before nofile in table order were raised and stay raised.
        assert_eq!(fake.snapshot()[&RlimitKind::Stack].hard, RLIM_INFINITY);
    }

    #[test]
    fn unprivileged_raise_of_nofile_is_refused() {
        let fake = FakeRlimits::new();
        let nr_open = nr_open_file("1048576");

        let err = set_hard_rlimits_with(&fake, nr_open.path()).unwrap_err();
        match err {
            TrellisError::Rlimit { kind, source, .. } => {
                assert_eq!(kind, "nofile");
                assert_eq!(source.raw_os_error(), Some(libc::EPERM));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fake.snapshot()[&RlimitKind::Nofile].hard, 4096);
    }
}
