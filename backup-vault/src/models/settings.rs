use rusqlite::{params, Connection};

pub fn get(conn: &Connection, identity: &str, key: &str) -> anyhow::Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM settings WHERE identity = ? AND key = ?")?;
    let mut rows = stmt.query_map(params![identity, key], |row| row.get::<_, String>(0))?;
    Ok(rows.next().transpose()?)
}

pub fn set(conn: &Connection, identity: &str, key: &str, value: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings (identity, key, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(identity, key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
        params![identity, key, value],
    )?;
    Ok(())
}
