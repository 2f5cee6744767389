//! Persistence store interface.
//!
//! The engine never owns backup records, settings or the operation log; it
//! talks to whatever implements [`BackupStore`]. [`MemoryStore`] is an
//! in-process implementation for embedding and tests.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Opaque owner token passed through to the store; never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted backup run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub name: String,
    pub source_path: String,
    pub backup_path: PathBuf,
    /// Plaintext bytes of successfully sealed files
    pub size: u64,
    pub file_count: u64,
    pub encrypted: bool,
    /// Serialized [`crate::Manifest`]
    pub manifest: String,
    pub owner: Identity,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Exact source specification to match
    pub source_path: Option<String>,
}

impl RecordFilter {
    pub fn source(source_path: impl Into<String>) -> Self {
        Self {
            source_path: Some(source_path.into()),
        }
    }

    pub fn matches(&self, record: &BackupRecord) -> bool {
        self.source_path
            .as_deref()
            .map_or(true, |s| record.source_path == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// One entry of the store's operation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub category: String,
    pub message: String,
    pub details: serde_json::Value,
    pub level: LogLevel,
}

impl LogEntry {
    pub fn new(
        category: &str,
        level: LogLevel,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            category: category.to_string(),
            message: message.into(),
            details,
            level,
        }
    }
}

#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn get_setting(&self, key: &str, identity: &Identity) -> anyhow::Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str, identity: &Identity) -> anyhow::Result<()>;

    async fn create_backup_record(&self, record: &BackupRecord) -> anyhow::Result<()>;

    /// Records owned by `identity` matching `filter`, newest first
    async fn get_backup_records(
        &self,
        filter: &RecordFilter,
        limit: usize,
        identity: &Identity,
    ) -> anyhow::Result<Vec<BackupRecord>>;

    async fn get_backup_record_by_id(&self, id: &str) -> anyhow::Result<Option<BackupRecord>>;

    async fn add_log_entry(&self, entry: &LogEntry, identity: &Identity) -> anyhow::Result<()>;
}
