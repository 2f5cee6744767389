//! SQLite-backed [`BackupStore`].

use crate::db::connection::DbPool;
use crate::models::{backup_record, log_entry, settings};
use async_trait::async_trait;
use backup_engine::{BackupRecord, BackupStore, Identity, LogEntry, RecordFilter};

#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Run `f` with a pooled connection on the blocking thread pool
    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| anyhow::anyhow!(e))?
    }
}

#[async_trait]
impl BackupStore for SqliteStore {
    async fn get_setting(&self, key: &str, identity: &Identity) -> anyhow::Result<Option<String>> {
        let (key, identity) = (key.to_string(), identity.to_string());
        self.with_conn(move |conn| settings::get(conn, &identity, &key)).await
    }

    async fn set_setting(&self, key: &str, value: &str, identity: &Identity) -> anyhow::Result<()> {
        let (key, value, identity) = (key.to_string(), value.to_string(), identity.to_string());
        self.with_conn(move |conn| settings::set(conn, &identity, &key, &value)).await
    }

    async fn create_backup_record(&self, record: &BackupRecord) -> anyhow::Result<()> {
        let record = record.clone();
        self.with_conn(move |conn| backup_record::create(conn, &record)).await
    }

    async fn get_backup_records(
        &self,
        filter: &RecordFilter,
        limit: usize,
        identity: &Identity,
    ) -> anyhow::Result<Vec<BackupRecord>> {
        let (filter, identity) = (filter.clone(), identity.to_string());
        self.with_conn(move |conn| backup_record::find_filtered(conn, &identity, &filter, limit))
            .await
    }

    async fn get_backup_record_by_id(&self, id: &str) -> anyhow::Result<Option<BackupRecord>> {
        let id = id.to_string();
        self.with_conn(move |conn| backup_record::find_by_id(conn, &id)).await
    }

    async fn add_log_entry(&self, entry: &LogEntry, identity: &Identity) -> anyhow::Result<()> {
        let (entry, identity) = (entry.clone(), identity.to_string());
        self.with_conn(move |conn| log_entry::create(conn, &identity, &entry)).await
    }
}
