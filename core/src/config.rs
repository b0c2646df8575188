// Runtime settings
//
// Layered: built-in defaults, then an optional TOML file, then NULLBYTES_*
// environment variables.

use crate::methods::CustomToolset;
use crate::{WipeError, WipeResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on how long a cancel request may go unobserved
pub const MAX_POLL_INTERVAL_MS: u64 = 200;

const ENV_PREFIX: &str = "NULLBYTES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WipeSettings {
    /// Where compliance records are written
    pub records_dir: PathBuf,
    /// Scratch location used when `records_dir` (or `raw_log_dir`) is not writable
    pub fallback_dir: PathBuf,
    /// Where raw subprocess output is kept
    pub raw_log_dir: PathBuf,
    /// Bytes read from the start of the device by the verifier
    pub verify_sample_bytes: usize,
    pub poll_interval_ms: u64,
    /// Time between SIGTERM and SIGKILL on cancel
    pub termination_grace_secs: u64,
    pub auto_unmount: bool,
    /// Overrides the operator identity taken from the environment
    pub operator: Option<String>,
    pub custom_toolset: Option<CustomToolset>,
}

impl Default for WipeSettings {
    fn default() -> Self {
        Self {
            records_dir: PathBuf::from("/var/log/nullbytes"),
            fallback_dir: std::env::temp_dir().join("nullbytes"),
            raw_log_dir: PathBuf::from("/var/log/nullbytes/raw"),
            verify_sample_bytes: 512,
            poll_interval_ms: 100,
            termination_grace_secs: 5,
            auto_unmount: false,
            operator: None,
            custom_toolset: None,
        }
    }
}

impl WipeSettings {
    /// Load settings from `path` (or the per-user config file) and the environment.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(path: Option<&Path>) -> WipeResult<Self> {
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_config_path(),
        };

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            tracing::debug!(path = %file.display(), "Reading settings file");
            builder = builder.add_source(config::File::from(file.as_path()).required(path.is_some()));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .try_parsing(true),
        );

        let settings: WipeSettings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| WipeError::Config(e.to_string()))?;

        settings.validated()
    }

    /// `config.toml` in the platform config directory
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "nullbytes", "nullbytes")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    fn validated(mut self) -> WipeResult<Self> {
        if self.verify_sample_bytes == 0 {
            return Err(WipeError::Config(
                "verify_sample_bytes must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            tracing::warn!(
                requested = self.poll_interval_ms,
                max = MAX_POLL_INTERVAL_MS,
                "poll_interval_ms clamped"
            );
            self.poll_interval_ms = MAX_POLL_INTERVAL_MS;
        }
        Ok(self)
    }

    /// Cancellation poll interval, never above [`MAX_POLL_INTERVAL_MS`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(1, MAX_POLL_INTERVAL_MS))
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = WipeSettings::default();
        assert_eq!(settings.records_dir, PathBuf::from("/var/log/nullbytes"));
        assert_eq!(settings.verify_sample_bytes, 512);
        assert_eq!(settings.poll_interval(), Duration::from_millis(100));
        assert_eq!(settings.termination_grace(), Duration::from_secs(5));
        assert!(!settings.auto_unmount);
        assert!(settings.custom_toolset.is_none());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            r#"
records_dir = "/srv/records"
verify_sample_bytes = 4096
poll_interval_ms = 50
operator = "auditor"

[custom_toolset]
clear = [{ program = "blkdiscard", args = ["{device}"] }]
purge = [{ program = "shred", args = ["-n", "3", "{device}"] }]
destroy = [{ program = "shred", args = ["-n", "7", "{device}"] }]
"#,
        )
        .unwrap();

        let settings = WipeSettings::load(Some(&path)).unwrap();
        assert_eq!(settings.records_dir, PathBuf::from("/srv/records"));
        assert_eq!(settings.verify_sample_bytes, 4096);
        assert_eq!(settings.poll_interval_ms, 50);
        assert_eq!(settings.operator.as_deref(), Some("auditor"));
        assert_eq!(
            settings.custom_toolset.unwrap().clear[0].program,
            "blkdiscard"
        );
        // Unspecified fields keep their defaults
        assert_eq!(settings.termination_grace_secs, 5);
    }

    #[test]
    #[serial]
    fn test_explicit_missing_file_is_error() {
        let result = WipeSettings::load(Some(Path::new("/nonexistent/nullbytes.toml")));
        assert!(matches!(result, Err(WipeError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_poll_interval_clamped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "poll_interval_ms = 5000\n").unwrap();

        let settings = WipeSettings::load(Some(&path)).unwrap();
        assert_eq!(settings.poll_interval_ms, MAX_POLL_INTERVAL_MS);
    }

    #[test]
    #[serial]
    fn test_zero_sample_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "verify_sample_bytes = 0\n").unwrap();

        assert!(matches!(
            WipeSettings::load(Some(&path)),
            Err(WipeError::Config(_))
        ));
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "auto_unmount = false\n").unwrap();

        std::env::set_var("NULLBYTES_AUTO_UNMOUNT", "true");
        let settings = WipeSettings::load(Some(&path));
        std::env::remove_var("NULLBYTES_AUTO_UNMOUNT");

        assert!(settings.unwrap().auto_unmount);
    }
}
