//! Collaborators shared by the backup, restore and verify engines.

use crate::config::Config;
use crate::keys::{EncryptionKey, KeyCache};
use crate::store::{BackupRecord, BackupStore, Identity, LogEntry, LogLevel};
use crate::transfer::Pipeline;
use crate::utils::errors::{EngineError, Result};
use std::sync::Arc;
use tracing::warn;

/// Store, key cache, pipeline and configuration behind cheap clones.
#[derive(Clone)]
pub struct EngineContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn BackupStore>,
    pub keys: Arc<KeyCache>,
    pub pipeline: Pipeline,
}

impl EngineContext {
    pub fn new(config: Config, store: Arc<dyn BackupStore>) -> Self {
        Self {
            keys: Arc::new(KeyCache::new(Arc::clone(&store))),
            pipeline: Pipeline::new(config.performance.chunk_size),
            config: Arc::new(config),
            store,
        }
    }

    /// Key for sealing a new backup, created on first use
    pub async fn sealing_key(
        &self,
        encrypted: bool,
        identity: &Identity,
    ) -> Result<Option<Arc<EncryptionKey>>> {
        if !encrypted {
            return Ok(None);
        }
        Ok(Some(self.keys.get_or_create(identity).await?))
    }

    /// Key for opening an existing backup; fails with `MissingKey` instead of
    /// creating one
    pub async fn opening_key(
        &self,
        encrypted: bool,
        identity: &Identity,
    ) -> Result<Option<Arc<EncryptionKey>>> {
        if !encrypted {
            return Ok(None);
        }
        Ok(Some(self.keys.get_existing(identity).await?))
    }

    pub async fn find_record(&self, backup_id: &str) -> Result<BackupRecord> {
        self.store
            .get_backup_record_by_id(backup_id)
            .await?
            .ok_or_else(|| EngineError::BackupNotFound(backup_id.to_string()))
    }

    /// Mirror an outcome into the store's log. A failing log write never
    /// changes the outcome of the operation being logged.
    pub async fn log(
        &self,
        category: &str,
        level: LogLevel,
        message: impl Into<String>,
        details: serde_json::Value,
        identity: &Identity,
    ) {
        let entry = LogEntry::new(category, level, message, details);
        if let Err(e) = self.store.add_log_entry(&entry, identity).await {
            warn!("Failed to write {} log entry: {:#}", category, e);
        }
    }
}
