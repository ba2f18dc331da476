//! Configuration for the cache coordinator
//!
//! Loaded from a TOML file. Every section and field has a default, so a
//! partial file (or an empty one) is valid.

use crate::transaction::ReplayPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Coordinator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Mirror behaviour
    pub cache: CacheSettings,
    /// Transaction behaviour
    pub transaction: TransactionSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Remember confirmed-absent keys and fields
    pub negative_caching: bool,
    /// Write non-empty MGet/HMGet results back into the mirror
    pub mirror_batch_reads: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            negative_caching: true,
            mirror_batch_reads: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionSettings {
    /// What commit does after a deferred command fails
    pub replay_policy: ReplayPolicy,
    /// Evict mirror state written by deferred commands discarded at rollback
    pub revert_mirror_on_rollback: bool,
    /// Maximum log records per transaction
    pub max_log_entries: Option<usize>,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            replay_policy: ReplayPolicy::ContinueOnError,
            revert_mirror_on_rollback: true,
            max_log_entries: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level
    pub level: LogLevel,
    /// Log format
    pub format: LogFormat,
    /// Store calls at or above this many milliseconds are logged as slow, 0 disables
    pub slow_call_threshold_ms: u64,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
            slow_call_threshold_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    Text,
    Json,
}

impl MirrorConfig {
    /// Load and validate configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: MirrorConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Load from `path`, writing the defaults there first if it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        let config = MirrorConfig::default();
        config.save(path)?;
        info!("Created default configuration at {}", path.display());
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.transaction.max_log_entries == Some(0) {
            return Err(anyhow::anyhow!("Transaction max_log_entries cannot be 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = MirrorConfig::default();
        assert!(config.cache.negative_caching);
        assert!(config.cache.mirror_batch_reads);
        assert_eq!(
            config.transaction.replay_policy,
            ReplayPolicy::ContinueOnError
        );
        assert!(config.transaction.revert_mirror_on_rollback);
        assert_eq!(config.logging.slow_call_threshold_ms, 100);
    }

    #[test]
    fn test_config_validation() {
        let mut config = MirrorConfig::default();
        assert!(config.validate().is_ok());

        config.transaction.max_log_entries = Some(0);
        assert!(config.validate().is_err());

        config.transaction.max_log_entries = Some(16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: MirrorConfig = toml::from_str(
            r#"
            [transaction]
            replay_policy = "StopOnError"

            [logging]
            format = "Json"
            "#,
        )
        .unwrap();

        assert_eq!(config.transaction.replay_policy, ReplayPolicy::StopOnError);
        assert!(config.transaction.revert_mirror_on_rollback);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.cache.negative_caching);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("mirrorkv.toml");

        let mut config = MirrorConfig::default();
        config.cache.mirror_batch_reads = false;
        config.transaction.max_log_entries = Some(64);
        config.logging.level = LogLevel::Debug;
        config.save(&path).unwrap();

        assert_eq!(MirrorConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_or_default_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mirrorkv.toml");

        let config = MirrorConfig::load_or_default(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, MirrorConfig::default());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "[transaction]\nmax_log_entries = 0\n").unwrap();

        assert!(MirrorConfig::load(&path).is_err());
    }
}
