//! Configuration model for creating one container.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrellisError};
use crate::types::ResourceLimits;

/// Everything the host side needs to stand up a container process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerizerConfig {
    /// Container init binary executed inside the new namespaces.
    pub init_bin_path: PathBuf,
    /// Arguments passed to the init binary.
    pub init_args: Vec<String>,
    /// Root filesystem the container is pivoted into.
    pub rootfs_path: PathBuf,
    /// Directory holding the `hook` script and the `pivotter` tool.
    pub lib_path: PathBuf,
    /// Handshake wait bound, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Limits handed to the guest through its environment.
    pub limits: ResourceLimits,
}

impl Default for ContainerizerConfig {
    fn default() -> Self {
        Self {
            init_bin_path: PathBuf::new(),
            init_args: Vec::new(),
            rootfs_path: PathBuf::new(),
            lib_path: PathBuf::new(),
            handshake_timeout_ms: u64::try_from(
                crate::constants::DEFAULT_HANDSHAKE_TIMEOUT.as_millis(),
            )
            .unwrap_or(u64::MAX),
            limits: ResourceLimits::default(),
        }
    }
}

impl ContainerizerConfig {
    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON,
    /// or fails [`ContainerizerConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TrellisError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every path is absolute and the timeout is non-zero.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        for (field, path) in [
            ("init_bin_path", &self.init_bin_path),
            ("rootfs_path", &self.rootfs_path),
            ("lib_path", &self.lib_path),
        ] {
            if !path.is_absolute() {
                return Err(TrellisError::Config {
                    message: format!("{field} must be an absolute path, got {}", path.display()),
                });
            }
        }
        if self.handshake_timeout_ms == 0 {
            return Err(TrellisError::Config {
                message: "handshake_timeout_ms must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Handshake wait bound as a [`Duration`].
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ContainerizerConfig {
        ContainerizerConfig {
            init_bin_path: "/usr/lib/trellis/init".into(),
            rootfs_path: "/var/lib/trellis/rootfs/c1".into(),
            lib_path: "/usr/lib/trellis".into(),
            ..ContainerizerConfig::default()
        }
    }

    #[test]
    fn default_timeout_is_three_seconds() {
        assert_eq!(
            ContainerizerConfig::default().handshake_timeout(),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn relative_paths_are_rejected() {
        let mut config = valid();
        config.rootfs_path = "rootfs".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rootfs_path"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = valid();
        config.handshake_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_limits_from_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("container.json");
        std::fs::write(
            &path,
            r#"{
                "init_bin_path": "/usr/lib/trellis/init",
                "rootfs_path": "/var/lib/trellis/rootfs/c1",
                "lib_path": "/usr/lib/trellis",
                "limits": { "cpu": 9000, "nofile": 800 }
            }"#,
        )
        .expect("write config");

        let config = ContainerizerConfig::load(&path).expect("load");
        assert_eq!(config.limits.cpu, Some(9000));
        assert_eq!(config.limits.nofile, Some(800));
        assert_eq!(config.limits.stack, None);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = ContainerizerConfig::load(Path::new("/nonexistent/trellis.json")).unwrap_err();
        assert!(matches!(err, TrellisError::Io { .. }));
    }
}
