//! Harness-wide settings
//!
//! Loaded from built-in defaults, an optional `casskit.toml` in the user's
//! config directory, and `CASSKIT_*` environment variables, in that order of
//! precedence (later wins).

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CASSKIT";

/// Settings shared by every node the harness starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Deadline for a node to become ready, in seconds
    pub startup_timeout_secs: u64,
    /// Grace period between graceful and forced stop, in seconds
    pub stop_timeout_secs: u64,
    /// Parent directory of per-node working directories
    pub working_root: PathBuf,
    /// Keep working directories after stop
    pub keep_working_directory: bool,
    /// Shared extraction cache for archive distributions
    pub cache_dir: PathBuf,
    /// Java installation used when a node does not name one
    pub java_home: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let temp = std::env::temp_dir();
        Self {
            startup_timeout_secs: 90,
            stop_timeout_secs: 10,
            working_root: temp.join("casskit").join("nodes"),
            keep_working_directory: false,
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| temp.clone())
                .join("casskit")
                .join("distributions"),
            java_home: None,
        }
    }
}

impl HarnessConfig {
    /// Load from the default file location and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load from `path` (optional) and the environment
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let settings: HarnessConfig = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write as TOML to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(format!("cannot serialize settings: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Reject settings no node could run with
    pub fn validate(&self) -> Result<()> {
        if self.startup_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "startup_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.working_root.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "working_root must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Default settings file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("casskit")
            .join("casskit.toml")
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let settings = HarnessConfig::load_from(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(settings, HarnessConfig::default());
        assert_eq!(settings.startup_timeout(), Duration::from_secs(90));
    }

    #[test]
    #[serial]
    fn test_file_and_environment_layers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("casskit.toml");
        std::fs::write(&path, "startup_timeout_secs = 30\nstop_timeout_secs = 3\n").unwrap();

        std::env::set_var("CASSKIT_STOP_TIMEOUT_SECS", "7");
        let settings = HarnessConfig::load_from(&path);
        std::env::remove_var("CASSKIT_STOP_TIMEOUT_SECS");

        let settings = settings.unwrap();
        assert_eq!(settings.startup_timeout_secs, 30);
        assert_eq!(settings.stop_timeout_secs, 7);
    }

    #[test]
    #[serial]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("casskit.toml");
        let settings = HarnessConfig {
            keep_working_directory: true,
            java_home: Some(PathBuf::from("/opt/java")),
            ..HarnessConfig::default()
        };

        settings.save_to(&path).unwrap();
        assert_eq!(HarnessConfig::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn test_zero_startup_timeout_is_rejected() {
        let settings = HarnessConfig {
            startup_timeout_secs: 0,
            ..HarnessConfig::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Validation(_))));
    }
}
