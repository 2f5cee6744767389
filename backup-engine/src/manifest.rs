//! Manifest types describing one backup run.
//!
//! A manifest records every file sealed by a backup together with the
//! plaintext hash used for verification. It is stored inline in the backup
//! record and as a JSON sidecar in the backup directory so either copy can
//! restore the backup on its own.

use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Why a file was included in a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeReason {
    /// Not present in the baseline manifest
    New,
    /// Size differs or modification time is newer than the baseline
    Modified,
    /// Non-incremental run: every discovered file is included
    Full,
}

/// One file within a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to `source_root`; join key for change detection
    pub relative_path: String,

    /// Source path item this file was discovered under
    pub source_root: PathBuf,

    /// Root label + relative path; unique across all source roots
    pub unique_path: String,

    pub original_path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,

    /// Hex SHA-256 of the plaintext at backup time (empty for failed entries)
    pub hash: String,

    /// Sealed artifact location
    pub stored_path: PathBuf,

    pub reason: ChangeReason,

    /// Set when sealing failed; the entry is then excluded from restore
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileEntry {
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Immutable description of a backup run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    pub name: String,

    /// Source specification exactly as given (semicolon-joined paths)
    pub source: String,

    pub backup_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub encrypted: bool,
    pub compressed: bool,
    pub incremental: bool,

    /// Discovery order
    pub files: Vec<FileEntry>,
}

impl Manifest {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::Manifest(e.to_string()))
    }

    /// Entries that were sealed successfully
    pub fn restorable(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.iter().filter(|f| !f.is_failed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.iter().filter(|f| f.is_failed())
    }

    /// Total plaintext bytes of successfully sealed entries
    pub fn total_size(&self) -> u64 {
        self.restorable().map(|f| f.size).sum()
    }

    /// Entries recorded for one source root, used as a change-detection baseline
    pub fn entries_for_root<'a>(&'a self, root: &'a Path) -> impl Iterator<Item = &'a FileEntry> {
        self.files.iter().filter(move |f| f.source_root == root)
    }

    /// Write the manifest as a sidecar file inside `dir`.
    pub async fn write_sidecar(&self, dir: &Path, file_name: &str) -> Result<PathBuf> {
        let path = dir.join(file_name);
        tokio::fs::write(&path, self.to_json()?).await?;
        Ok(path)
    }

    /// Read a sidecar manifest from `dir`.
    pub async fn read_sidecar(dir: &Path, file_name: &str) -> Result<Self> {
        let path = dir.join(file_name);
        let json = tokio::fs::read_to_string(&path).await.map_err(|e| {
            EngineError::Manifest(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(rel: &str, error: Option<&str>) -> FileEntry {
        FileEntry {
            relative_path: rel.to_string(),
            source_root: PathBuf::from("/data/docs"),
            unique_path: format!("docs/{}", rel),
            original_path: PathBuf::from("/data/docs").join(rel),
            size: 42,
            modified: Utc::now(),
            hash: if error.is_some() { String::new() } else { "ab".repeat(32) },
            stored_path: PathBuf::from("/backups/b1").join(format!("docs/{}.sealed", rel)),
            reason: ChangeReason::New,
            error: error.map(str::to_string),
        }
    }

    fn sample() -> Manifest {
        Manifest {
            id: "b1".to_string(),
            name: "nightly".to_string(),
            source: "/data/docs;/data/mail".to_string(),
            backup_path: PathBuf::from("/backups/b1"),
            created_at: Utc::now(),
            encrypted: true,
            compressed: true,
            incremental: false,
            files: vec![entry("a.txt", None), entry("b.txt", Some("permission denied"))],
        }
    }

    #[test]
    fn test_json_round_trip_keeps_failed_entries() {
        let manifest = sample();
        let decoded = Manifest::from_json(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(decoded, manifest);
        assert_eq!(decoded.failed().count(), 1);
        assert_eq!(decoded.files[1].error.as_deref(), Some("permission denied"));
    }

    #[test]
    fn test_restorable_and_total_size() {
        let manifest = sample();
        let names: Vec<_> = manifest.restorable().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(names, vec!["a.txt"]);
        assert_eq!(manifest.total_size(), 42);
    }

    #[test]
    fn test_reason_serializes_lowercase() {
        let json = serde_json::to_string(&ChangeReason::Modified).unwrap();
        assert_eq!(json, "\"modified\"");
    }

    #[test]
    fn test_garbage_is_manifest_error() {
        assert!(matches!(Manifest::from_json("{not json"), Err(EngineError::Manifest(_))));
    }

    #[tokio::test]
    async fn test_sidecar_round_trip() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let manifest = sample();
        manifest.write_sidecar(dir.path(), "manifest.json").await.unwrap();
        let loaded = Manifest::read_sidecar(dir.path(), "manifest.json").await.unwrap();
        assert_eq!(loaded, manifest);
        Ok(())
    }
}
