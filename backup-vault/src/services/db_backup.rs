use std::path::{Path, PathBuf};

const MAX_BACKUPS: usize = 7;
const PREFIX: &str = "vault-";

/// Copy the database into `data_dir/backups` once per day, keeping the
/// newest seven copies. Returns the new snapshot path, if one was made.
pub fn backup_database(db_path: &Path, data_dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    if !db_path.exists() {
        return Ok(None);
    }

    let backup_dir = data_dir.join("backups");
    std::fs::create_dir_all(&backup_dir)?;

    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let backup_name = format!("{}{}.db", PREFIX, today);
    let backup_path = backup_dir.join(&backup_name);

    if backup_path.exists() {
        tracing::debug!("[DB Backup] Today's backup already exists, skipping");
        return Ok(None);
    }

    std::fs::copy(db_path, &backup_path)?;
    tracing::info!("[DB Backup] Created backup: {}", backup_name);

    // Cleanup old backups
    let mut backups: Vec<_> = std::fs::read_dir(&backup_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(PREFIX))
        .collect();

    backups.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    for old in backups.into_iter().skip(MAX_BACKUPS) {
        let _ = std::fs::remove_file(old.path());
        tracing::info!("[DB Backup] Removed old backup: {}", old.file_name().to_string_lossy());
    }

    Ok(Some(backup_path))
}
