//! Configuration management for the backup engine.
//!
//! Loads configuration from a TOML file; every field has a default so a
//! partial file (or none at all) is valid.

use crate::options::{BackupOptions, ConflictStrategy, RestoreOptions};
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub walk: WalkConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding one sub-directory per backup id
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Extension appended to every sealed artifact
    #[serde(default = "default_artifact_extension")]
    pub artifact_extension: String,

    /// File name of the manifest sidecar written next to the artifacts
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_true")]
    pub encrypt: bool,

    #[serde(default = "default_true")]
    pub compress: bool,

    #[serde(default = "default_true")]
    pub incremental: bool,

    /// Re-hash restored files against the manifest
    #[serde(default = "default_true")]
    pub verify: bool,

    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WalkConfig {
    /// Follow symbolic links (skipped with a warning otherwise)
    #[serde(default)]
    pub follow_links: bool,

    /// File or directory names to leave out of every backup
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Semaphore permits shared by concurrent per-file transforms
    #[serde(default = "default_concurrency_budget")]
    pub concurrency_budget: usize,

    /// Streaming buffer size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_storage_root() -> PathBuf {
    PathBuf::from("./backups")
}

fn default_artifact_extension() -> String {
    "sealed".to_string()
}

fn default_manifest_file() -> String {
    "manifest.json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_concurrency_budget() -> usize {
    16
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            artifact_extension: default_artifact_extension(),
            manifest_file: default_manifest_file(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            encrypt: true,
            compress: true,
            incremental: true,
            verify: true,
            conflict_strategy: ConflictStrategy::default(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            concurrency_budget: default_concurrency_budget(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.performance.concurrency_budget == 0 {
            return Err(EngineError::Config(
                "performance.concurrency_budget must be at least 1".to_string(),
            ));
        }
        if self.performance.chunk_size == 0 {
            return Err(EngineError::Config(
                "performance.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.storage.artifact_extension.is_empty() {
            return Err(EngineError::Config(
                "storage.artifact_extension must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Backup options seeded from the configured defaults
    pub fn backup_options(&self) -> BackupOptions {
        BackupOptions {
            name: None,
            encrypt: self.defaults.encrypt,
            compress: self.defaults.compress,
            incremental: self.defaults.incremental,
        }
    }

    /// Restore options seeded from the configured defaults
    pub fn restore_options(&self) -> RestoreOptions {
        RestoreOptions {
            verify: self.defaults.verify,
            conflict_strategy: self.defaults.conflict_strategy,
        }
    }
}
