use backup_engine::{BackupRecord, Identity, RecordFilter};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use std::path::PathBuf;

/// Fixed-width UTC timestamps so text ordering matches time ordering
pub fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_record(row: &Row) -> rusqlite::Result<BackupRecord> {
    let created_at: String = row.get("created_at")?;
    Ok(BackupRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        source_path: row.get("source_path")?,
        backup_path: PathBuf::from(row.get::<_, String>("backup_path")?),
        size: row.get::<_, i64>("size")?.max(0) as u64,
        file_count: row.get::<_, i64>("file_count")?.max(0) as u64,
        encrypted: row.get::<_, i64>("encrypted")? != 0,
        manifest: row.get("manifest")?,
        owner: Identity::new(row.get::<_, String>("owner")?),
        created_at: parse_timestamp(&created_at)?,
    })
}

pub fn create(conn: &Connection, record: &BackupRecord) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO backup_records (id, name, source_path, backup_path, size, file_count, encrypted, manifest, owner, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.id,
            record.name,
            record.source_path,
            record.backup_path.to_string_lossy().to_string(),
            record.size as i64,
            record.file_count as i64,
            record.encrypted as i64,
            record.manifest,
            record.owner.as_str(),
            timestamp(&record.created_at),
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<BackupRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM backup_records WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], |row| row_to_record(row))?;
    Ok(rows.next().transpose()?)
}

/// Records of `owner` matching `filter`, newest first
pub fn find_filtered(
    conn: &Connection,
    owner: &str,
    filter: &RecordFilter,
    limit: usize,
) -> anyhow::Result<Vec<BackupRecord>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let records = match &filter.source_path {
        Some(source) => {
            let mut stmt = conn.prepare(
                "SELECT * FROM backup_records WHERE owner = ? AND source_path = ?
                 ORDER BY created_at DESC, rowid DESC LIMIT ?",
            )?;
            let rows = stmt.query_map(params![owner, source, limit], |row| row_to_record(row))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT * FROM backup_records WHERE owner = ?
                 ORDER BY created_at DESC, rowid DESC LIMIT ?",
            )?;
            let rows = stmt.query_map(params![owner, limit], |row| row_to_record(row))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    Ok(records)
}
