//! In-memory [`BackupStore`].

use super::{BackupRecord, BackupStore, Identity, LogEntry, RecordFilter};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    settings: RwLock<HashMap<(Identity, String), String>>,
    records: RwLock<Vec<BackupRecord>>,
    logs: RwLock<Vec<(Identity, LogEntry)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the operation log, oldest first
    pub async fn log_entries(&self) -> Vec<(Identity, LogEntry)> {
        self.logs.read().await.clone()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl BackupStore for MemoryStore {
    async fn get_setting(&self, key: &str, identity: &Identity) -> anyhow::Result<Option<String>> {
        let settings = self.settings.read().await;
        Ok(settings.get(&(identity.clone(), key.to_string())).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str, identity: &Identity) -> anyhow::Result<()> {
        let mut settings = self.settings.write().await;
        settings.insert((identity.clone(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn create_backup_record(&self, record: &BackupRecord) -> anyhow::Result<()> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == record.id) {
            anyhow::bail!("backup record {} already exists", record.id);
        }
        records.push(record.clone());
        Ok(())
    }

    async fn get_backup_records(
        &self,
        filter: &RecordFilter,
        limit: usize,
        identity: &Identity,
    ) -> anyhow::Result<Vec<BackupRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<BackupRecord> = records
            .iter()
            .filter(|r| &r.owner == identity && filter.matches(r))
            .cloned()
            .collect();
        // Newest first; among equal timestamps the later insertion wins
        matching.sort_by_key(|r| r.created_at);
        matching.reverse();
        matching.truncate(limit);
        Ok(matching)
    }

    async fn get_backup_record_by_id(&self, id: &str) -> anyhow::Result<Option<BackupRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn add_log_entry(&self, entry: &LogEntry, identity: &Identity) -> anyhow::Result<()> {
        let mut logs = self.logs.write().await;
        logs.push((identity.clone(), entry.clone()));
        Ok(())
    }
}
