//! Caller-facing options for backup, restore and verify runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Options recognised by [`crate::BackupEngine::create_backup`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupOptions {
    /// Display label; derived from the creation timestamp when absent
    pub name: Option<String>,
    pub encrypt: bool,
    pub compress: bool,
    pub incremental: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            name: None,
            encrypt: true,
            compress: true,
            incremental: true,
        }
    }
}

/// What to do when a restore destination already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    Overwrite,
    #[default]
    Rename,
    Skip,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictStrategy::Overwrite => "overwrite",
            ConflictStrategy::Rename => "rename",
            ConflictStrategy::Skip => "skip",
        };
        f.write_str(s)
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(ConflictStrategy::Overwrite),
            "rename" => Ok(ConflictStrategy::Rename),
            "skip" => Ok(ConflictStrategy::Skip),
            other => Err(format!("unknown conflict strategy: {}", other)),
        }
    }
}

/// Options recognised by [`crate::RestoreEngine::restore_backup`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreOptions {
    pub verify: bool,
    pub conflict_strategy: ConflictStrategy,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            verify: true,
            conflict_strategy: ConflictStrategy::Rename,
        }
    }
}

/// Options recognised by [`crate::VerifyEngine::verify_backup`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyOptions {
    /// Decrypt each artifact and compare its plaintext hash with the manifest
    pub deep: bool,
}
