//! External helper programs run by the host: hook scripts and the
//! root filesystem pivot tool.

use std::path::Path;
use std::process::Command;

use trellis_common::constants::{HOOK_BIN, PIVOTTER_BIN, TARGET_NS_PID_ENV};
use trellis_common::error::{Result, TrellisError};

/// Runs a prepared command to completion.
pub trait CommandRunner: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the command cannot be started or exits
    /// unsuccessfully.
    fn run(&self, cmd: &mut Command) -> Result<()>;
}

/// [`CommandRunner`] that spawns real processes and waits for them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, cmd: &mut Command) -> Result<()> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        tracing::debug!(program = %program, args = ?cmd.get_args().collect::<Vec<_>>(), "running command");

        let status = cmd.status().map_err(|e| TrellisError::Command {
            program: program.clone(),
            message: e.to_string(),
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(TrellisError::Command {
                program,
                message: format!("exited with {status}"),
            })
        }
    }
}

/// Builds `<lib_path>/hook <name>` with `env` added to its environment.
#[must_use]
pub fn hook_command(lib_path: &Path, name: &str, env: &[(String, String)]) -> Command {
    let mut cmd = Command::new(lib_path.join(HOOK_BIN));
    let _ = cmd.arg(name).envs(env.iter().map(|(k, v)| (k, v)));
    cmd
}

/// Builds `<lib_path>/pivotter -rootfs <rootfs>` aimed at `pid`.
///
/// The pivot tool sees only `TARGET_NS_PID` in its environment.
#[must_use]
pub fn pivot_command(lib_path: &Path, rootfs: &Path, pid: u32) -> Command {
    let mut cmd = Command::new(lib_path.join(PIVOTTER_BIN));
    let _ = cmd
        .arg("-rootfs")
        .arg(rootfs)
        .env_clear()
        .env(TARGET_NS_PID_ENV, pid.to_string());
    cmd
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use super::*;

    #[test]
    fn hook_command_names_the_hook() {
        let cmd = hook_command(
            Path::new("/usr/lib/trellis"),
            "parent-after-clone",
            &[("PID".into(), "42".into())],
        );
        assert_eq!(cmd.get_program(), OsStr::new("/usr/lib/trellis/hook"));
        assert_eq!(
            cmd.get_args().collect::<Vec<_>>(),
            vec![OsStr::new("parent-after-clone")]
        );
        assert!(
            cmd.get_envs()
                .any(|(k, v)| k == OsStr::new("PID") && v == Some(OsStr::new("42")))
        );
    }

    #[test]
    fn pivot_command_targets_pid() {
        let cmd = pivot_command(Path::new("/lib"), Path::new("/rootfs/c1"), 1234);
        assert_eq!(cmd.get_program(), OsStr::new("/lib/pivotter"));
        assert_eq!(
            cmd.get_args().collect::<Vec<_>>(),
            vec![OsStr::new("-rootfs"), OsStr::new("/rootfs/c1")]
        );
        let envs: Vec<_> = cmd.get_envs().collect();
        assert_eq!(
            envs,
            vec![(OsStr::new("TARGET_NS_PID"), Some(OsStr::new("1234")))]
        );
    }

    #[test]
    fn successful_command_is_ok() {
        ProcessRunner
            .run(Command::new("true").arg("ignored"))
            .expect("true succeeds");
    }

    #[test]
    fn non_zero_exit_is_a_command_error() {
        let err = ProcessRunner.run(&mut Command::new("false")).unwrap_err();
        match err {
            TrellisError::Command { program, message } => {
                assert_eq!(program, "false");
                assert!(message.contains("exit"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_program_is_a_command_error() {
        let err = ProcessRunner
            .run(&mut Command::new("/nonexistent/trellis-hook"))
            .unwrap_err();
        assert!(matches!(err, TrellisError::Command { .. }));
    }
}
