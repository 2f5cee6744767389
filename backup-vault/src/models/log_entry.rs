use backup_engine::{LogEntry, LogLevel};
use rusqlite::{params, Connection, Row};
use serde::Serialize;

/// A stored log entry as listed by the CLI
#[derive(Debug, Clone, Serialize)]
pub struct StoredLogEntry {
    pub id: i64,
    pub category: String,
    pub level: String,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: String,
}

fn row_to_entry(row: &Row) -> rusqlite::Result<StoredLogEntry> {
    let details: String = row.get("details")?;
    Ok(StoredLogEntry {
        id: row.get("id")?,
        category: row.get("category")?,
        level: row.get("level")?,
        message: row.get("message")?,
        details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
        created_at: row.get("created_at")?,
    })
}

pub fn create(conn: &Connection, identity: &str, entry: &LogEntry) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO log_entries (identity, category, level, message, details) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            identity,
            entry.category,
            entry.level.as_str(),
            entry.message,
            entry.details.to_string(),
        ],
    )?;
    Ok(())
}

/// Most recent entries of `identity`, optionally narrowed to one level
pub fn find_recent(
    conn: &Connection,
    identity: &str,
    level: Option<LogLevel>,
    limit: usize,
) -> anyhow::Result<Vec<StoredLogEntry>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "SELECT * FROM log_entries WHERE identity = ?1 AND (?2 IS NULL OR level = ?2)
         ORDER BY id DESC LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![identity, level.map(|l| l.as_str()), limit], |row| {
        row_to_entry(row)
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
