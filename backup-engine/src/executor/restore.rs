//! Restore of a recorded backup into a target directory.
//!
//! Files are restored one at a time. A missing artifact, an unsafe path or a
//! failed open is recorded against that file and the restore carries on.

use super::context::EngineContext;
use crate::keys::EncryptionKey;
use crate::manifest::{FileEntry, Manifest};
use crate::options::{ConflictStrategy, RestoreOptions};
use crate::store::{Identity, LogLevel};
use crate::transfer::hash::hash_file;
use crate::transfer::{FileProgress, Progress, ProgressEvent, TransformOptions};
use crate::utils::errors::{EngineError, Result};
use chrono::Local;
use serde::Serialize;
use serde_json::json;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreStatus {
    Restored,
    Skipped,
    Failed,
}

/// Per-file restore result
#[derive(Debug, Clone, Serialize)]
pub struct RestoreDetail {
    pub file: String,
    /// Where the file was written (or would have been, when skipped)
    pub target: Option<PathBuf>,
    pub status: RestoreStatus,
    pub error: Option<String>,
}

/// Hash comparison of one restored file
#[derive(Debug, Clone, Serialize)]
pub struct HashCheck {
    pub file: String,
    pub restored_path: PathBuf,
    pub expected: String,
    pub actual: Option<String>,
    pub hash_match: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub backup_id: String,
    pub target_dir: PathBuf,
    pub files_restored: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub details: Vec<RestoreDetail>,
    /// Present only when verification was requested
    pub verification_results: Option<Vec<HashCheck>>,
}

impl RestoreOutcome {
    fn new(backup_id: &str, target_dir: &Path) -> Self {
        Self {
            backup_id: backup_id.to_string(),
            target_dir: target_dir.to_path_buf(),
            files_restored: 0,
            files_skipped: 0,
            files_failed: 0,
            details: Vec::new(),
            verification_results: None,
        }
    }

    fn push(&mut self, detail: RestoreDetail) {
        match detail.status {
            RestoreStatus::Restored => self.files_restored += 1,
            RestoreStatus::Skipped => self.files_skipped += 1,
            RestoreStatus::Failed => self.files_failed += 1,
        }
        self.details.push(detail);
    }

    /// Verified files whose hash did not match
    pub fn mismatches(&self) -> usize {
        self.verification_results
            .as_ref()
            .map_or(0, |checks| checks.iter().filter(|c| !c.hash_match).count())
    }
}

/// Where artifacts are looked up
#[derive(Clone, Copy)]
enum ArtifactSource<'a> {
    /// Paths exactly as recorded in the manifest
    Recorded,
    /// Recorded paths rebased onto a backup directory that was moved
    Relocated(&'a Path),
}

pub struct RestoreEngine {
    ctx: EngineContext,
}

impl RestoreEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Restore backup `backup_id` from its store record into `target_dir`.
    pub async fn restore_backup(
        &self,
        backup_id: &str,
        target_dir: &Path,
        options: &RestoreOptions,
        progress: &Progress,
    ) -> Result<RestoreOutcome> {
        info!("Restoring backup {} into {}", backup_id, target_dir.display());

        let record = match self.ctx.find_record(backup_id).await {
            Ok(record) => record,
            Err(e) => {
                error!("Restore of {} failed: {}", backup_id, e);
                progress.emit(ProgressEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let result = async {
            let manifest = Manifest::from_json(&record.manifest)?;
            self.restore_manifest(&manifest, ArtifactSource::Recorded, target_dir, options, &record.owner, progress)
                .await
        }
        .await;
        self.finish(backup_id, target_dir, &record.owner, result, progress)
            .await
    }

    /// Restore straight from the manifest sidecar in `backup_dir`, for a
    /// backup whose store record is gone. Artifacts are looked up under
    /// `backup_dir` even if the directory was moved since the backup ran.
    pub async fn restore_from_sidecar(
        &self,
        backup_dir: &Path,
        target_dir: &Path,
        options: &RestoreOptions,
        identity: &Identity,
        progress: &Progress,
    ) -> Result<RestoreOutcome> {
        info!(
            "Restoring from sidecar in {} into {}",
            backup_dir.display(),
            target_dir.display()
        );
        let label = backup_dir.display().to_string();

        let result = async {
            let manifest = Manifest::read_sidecar(backup_dir, &self.ctx.config.storage.manifest_file).await?;
            let source = ArtifactSource::Relocated(backup_dir);
            self.restore_manifest(&manifest, source, target_dir, options, identity, progress)
                .await
        }
        .await;
        self.finish(&label, target_dir, identity, result, progress).await
    }

    async fn finish(
        &self,
        backup_id: &str,
        target_dir: &Path,
        identity: &Identity,
        result: Result<RestoreOutcome>,
        progress: &Progress,
    ) -> Result<RestoreOutcome> {
        match result {
            Ok(outcome) => {
                let level = if outcome.files_failed > 0 || outcome.mismatches() > 0 {
                    LogLevel::Warn
                } else {
                    LogLevel::Info
                };
                info!(
                    "Restore of {} finished: {} restored, {} skipped, {} failed",
                    outcome.backup_id, outcome.files_restored, outcome.files_skipped, outcome.files_failed
                );
                self.ctx
                    .log(
                        "restore",
                        level,
                        format!(
                            "Restored {} files from backup {}",
                            outcome.files_restored, outcome.backup_id
                        ),
                        json!({
                            "backup_id": outcome.backup_id,
                            "target": target_dir.display().to_string(),
                            "restored": outcome.files_restored,
                            "skipped": outcome.files_skipped,
                            "failed": outcome.files_failed,
                            "hash_mismatches": outcome.mismatches(),
                        }),
                        identity,
                    )
                    .await;
                progress.emit(ProgressEvent::Complete {
                    backup_id: outcome.backup_id.clone(),
                    files: outcome.files_restored,
                    bytes: 0,
                });
                Ok(outcome)
            }
            Err(e) => {
                error!("Restore of {} failed: {}", backup_id, e);
                progress.emit(ProgressEvent::Error {
                    message: e.to_string(),
                });
                self.ctx
                    .log(
                        "restore",
                        LogLevel::Error,
                        format!("Restore of backup {} failed: {}", backup_id, e),
                        json!({
                            "backup_id": backup_id,
                            "target": target_dir.display().to_string(),
                        }),
                        identity,
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn restore_manifest(
        &self,
        manifest: &Manifest,
        source: ArtifactSource<'_>,
        target_dir: &Path,
        options: &RestoreOptions,
        owner: &Identity,
        progress: &Progress,
    ) -> Result<RestoreOutcome> {
        let entries: Vec<&FileEntry> = manifest.restorable().collect();
        if entries.is_empty() {
            return Err(EngineError::RestoreNoFiles(manifest.id.clone()));
        }
        let total = entries.len();
        progress.emit(ProgressEvent::Init {
            backup_id: manifest.id.clone(),
            total_files: total,
        });

        let key = self.ctx.opening_key(manifest.encrypted, owner).await?;
        let transform = TransformOptions {
            compress: manifest.compressed,
            encrypt: manifest.encrypted,
        };
        tokio::fs::create_dir_all(target_dir).await?;

        let mut outcome = RestoreOutcome::new(&manifest.id, target_dir);
        let mut checks = options.verify.then(Vec::new);

        for (index, entry) in entries.into_iter().enumerate() {
            let artifact = match source {
                ArtifactSource::Recorded => entry.stored_path.clone(),
                ArtifactSource::Relocated(dir) => relocate(entry, manifest, dir),
            };

            let (detail, check) = self
                .restore_entry(entry, &artifact, target_dir, options, transform, key.as_deref())
                .await;
            if let (Some(checks), Some(check)) = (checks.as_mut(), check) {
                checks.push(check);
            }
            outcome.push(detail);

            progress.emit(ProgressEvent::Restore(FileProgress::new(
                entry.unique_path.clone(),
                index + 1,
                total,
            )));
        }

        outcome.verification_results = checks;
        Ok(outcome)
    }

    async fn restore_entry(
        &self,
        entry: &FileEntry,
        artifact: &Path,
        target_dir: &Path,
        options: &RestoreOptions,
        transform: TransformOptions,
        key: Option<&EncryptionKey>,
    ) -> (RestoreDetail, Option<HashCheck>) {
        let detail = |target: Option<PathBuf>, status, error| RestoreDetail {
            file: entry.unique_path.clone(),
            target,
            status,
            error,
        };
        let failed = |target: Option<PathBuf>, message: String| {
            warn!("Cannot restore {}: {}", entry.unique_path, message);
            detail(target, RestoreStatus::Failed, Some(message))
        };

        if !tokio::fs::try_exists(artifact).await.unwrap_or(false) {
            return (
                failed(None, format!("sealed artifact missing: {}", artifact.display())),
                None,
            );
        }

        let Some(relative) = contained_path(&entry.unique_path) else {
            return (failed(None, "path escapes the target directory".to_string()), None);
        };
        let mut dest = target_dir.join(relative);

        // `reserved` means this restore created `dest` and owns it on failure
        let reserved = match reserve(&dest).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => match options.conflict_strategy {
                ConflictStrategy::Skip => {
                    debug!("Skipping existing {}", dest.display());
                    return (detail(Some(dest), RestoreStatus::Skipped, None), None);
                }
                ConflictStrategy::Rename => match reserve_renamed(&dest).await {
                    Ok(renamed) => {
                        dest = renamed;
                        true
                    }
                    Err(e) => return (failed(Some(dest), e.to_string()), None),
                },
                ConflictStrategy::Overwrite => false,
            },
            Err(e) => return (failed(Some(dest), e.to_string()), None),
        };

        if let Err(e) = self.ctx.pipeline.open(artifact, &dest, transform, key).await {
            if reserved {
                let _ = tokio::fs::remove_file(&dest).await;
            }
            return (failed(Some(dest), e.to_string()), None);
        }

        let check = if options.verify {
            Some(self.check_hash(entry, &dest).await)
        } else {
            None
        };

        (detail(Some(dest), RestoreStatus::Restored, None), check)
    }

    async fn check_hash(&self, entry: &FileEntry, restored: &Path) -> HashCheck {
        let actual = match hash_file(restored, self.ctx.config.performance.chunk_size).await {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!("Cannot hash restored {}: {}", restored.display(), e);
                None
            }
        };
        let hash_match = actual.as_deref() == Some(entry.hash.as_str());
        if !hash_match {
            warn!("Hash mismatch for restored {}", restored.display());
        }
        HashCheck {
            file: entry.unique_path.clone(),
            restored_path: restored.to_path_buf(),
            expected: entry.hash.clone(),
            actual,
            hash_match,
        }
    }
}

/// `unique_path` as a relative path with only normal components
fn contained_path(unique_path: &str) -> Option<PathBuf> {
    let path = Path::new(unique_path);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

fn relocate(entry: &FileEntry, manifest: &Manifest, backup_dir: &Path) -> PathBuf {
    match entry.stored_path.strip_prefix(&manifest.backup_path) {
        Ok(inner) => backup_dir.join(inner),
        Err(_) => entry.stored_path.clone(),
    }
}

/// Atomically claim `path` by creating it empty; fails with `AlreadyExists`
/// when something is already there.
async fn reserve(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map(|_| ())
}

/// Claim `{stem}_restored_{timestamp}{.ext}` next to `dest`, counting up on
/// collision.
async fn reserve_renamed(dest: &Path) -> std::io::Result<PathBuf> {
    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = dest
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamp = Local::now().format("%Y%m%d_%H%M%S");

    let mut candidate = dest.with_file_name(format!("{}_restored_{}{}", stem, stamp, ext));
    let mut n = 2;
    loop {
        match reserve(&candidate).await {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                candidate = dest.with_file_name(format!("{}_restored_{}_{}{}", stem, stamp, n, ext));
                n += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::executor::{BackupEngine, BackupOutcome};
    use crate::manifest::ChangeReason;
    use crate::options::BackupOptions;
    use crate::store::{BackupRecord, BackupStore, MemoryStore};
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    const HELLO_WORLD_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    struct Fixture {
        dir: TempDir,
        store: Arc<MemoryStore>,
        backup: BackupEngine,
        restore: RestoreEngine,
        identity: Identity,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = Config::default();
            config.storage.root = dir.path().join("storage");
            let store = Arc::new(MemoryStore::new());
            let ctx = EngineContext::new(config, store.clone());
            Self {
                backup: BackupEngine::new(ctx.clone()),
                restore: RestoreEngine::new(ctx),
                dir,
                store,
                identity: Identity::new("alice"),
            }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.dir.path().join(rel)
        }

        /// Back up a `docs` directory holding `files`
        async fn backup_docs(&self, files: &[(&str, &[u8])]) -> BackupOutcome {
            let docs = self.path("docs");
            for (name, data) in files {
                let path = docs.join(name);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, data).unwrap();
            }
            let options = BackupOptions {
                incremental: false,
                ..Default::default()
            };
            self.backup
                .create_backup(docs.to_str().unwrap(), &options, &self.identity, &Progress::none())
                .await
                .unwrap()
        }

        async fn restore(&self, backup_id: &str, strategy: ConflictStrategy) -> RestoreOutcome {
            let options = RestoreOptions {
                verify: true,
                conflict_strategy: strategy,
            };
            self.restore
                .restore_backup(backup_id, &self.path("target"), &options, &Progress::none())
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_restore_single_file_with_verification() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let src = fx.path("src");
        std::fs::create_dir(&src)?;
        std::fs::write(src.join("notes.txt"), b"hello world")?;
        let options = BackupOptions {
            incremental: false,
            ..Default::default()
        };
        let backup = fx
            .backup
            .create_backup(src.join("notes.txt").to_str().unwrap(), &options, &fx.identity, &Progress::none())
            .await?;

        let phases = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&phases);
        let progress = Progress::new(move |e| sink.lock().unwrap().push(e.phase()));
        let target = fx.path("restored");
        let outcome = fx
            .restore
            .restore_backup(&backup.backup_id, &target, &RestoreOptions::default(), &progress)
            .await?;

        assert_eq!(outcome.files_restored, 1);
        assert_eq!(std::fs::read(target.join("notes/notes.txt"))?, b"hello world");
        let checks = outcome.verification_results.unwrap();
        assert_eq!(checks.len(), 1);
        assert!(checks[0].hash_match);
        assert_eq!(checks[0].actual.as_deref(), Some(HELLO_WORLD_SHA256));
        assert_eq!(*phases.lock().unwrap(), vec!["init", "restore", "complete"]);

        let logs = fx.store.log_entries().await;
        assert_eq!(logs.last().unwrap().1.category, "restore");
        Ok(())
    }

    #[tokio::test]
    async fn test_skip_leaves_existing_files() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let backup = fx.backup_docs(&[("a.txt", b"alpha"), ("sub/b.txt", b"beta")]).await;

        let first = fx.restore(&backup.backup_id, ConflictStrategy::Skip).await;
        assert_eq!(first.files_restored, 2);

        let restored_a = fx.path("target/docs/a.txt");
        std::fs::write(&restored_a, b"edited locally")?;
        let second = fx.restore(&backup.backup_id, ConflictStrategy::Skip).await;
        assert_eq!(second.files_restored, 0);
        assert_eq!(second.files_skipped, 2);
        assert_eq!(second.verification_results.as_ref().map(Vec::len), Some(0));
        assert_eq!(std::fs::read(&restored_a)?, b"edited locally");
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_keeps_originals() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let backup = fx.backup_docs(&[("a.txt", b"alpha"), ("b.txt", b"beta")]).await;
        fx.restore(&backup.backup_id, ConflictStrategy::Rename).await;

        let restored_a = fx.path("target/docs/a.txt");
        std::fs::write(&restored_a, b"edited locally")?;
        let second = fx.restore(&backup.backup_id, ConflictStrategy::Rename).await;
        assert_eq!(second.files_restored, 2);
        assert_eq!(second.mismatches(), 0);

        // Originals untouched, exactly one new file per original
        assert_eq!(std::fs::read(&restored_a)?, b"edited locally");
        let mut names: Vec<String> = std::fs::read_dir(fx.path("target/docs"))?
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names.len(), 4);
        assert!(names.iter().filter(|n| n.starts_with("a_restored_") && n.ends_with(".txt")).count() == 1);
        assert!(names.iter().filter(|n| n.starts_with("b_restored_") && n.ends_with(".txt")).count() == 1);

        let renamed = second.details[0].target.clone().unwrap();
        assert_eq!(std::fs::read(renamed)?, b"alpha");
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_twice_within_one_second() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let dest = dir.path().join("a.txt");
        std::fs::write(&dest, b"x")?;

        // Each claim creates its file, so back-to-back claims never collide
        let first = reserve_renamed(&dest).await?;
        assert!(first.exists());
        let second = reserve_renamed(&dest).await?;
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("_2.txt"));

        let err = reserve(&dest).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&dest)?, b"x");
        Ok(())
    }

    #[tokio::test]
    async fn test_overwrite_replaces_existing() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let backup = fx.backup_docs(&[("a.txt", b"alpha")]).await;
        fx.restore(&backup.backup_id, ConflictStrategy::Overwrite).await;

        let restored_a = fx.path("target/docs/a.txt");
        std::fs::write(&restored_a, b"edited locally")?;
        let second = fx.restore(&backup.backup_id, ConflictStrategy::Overwrite).await;
        assert_eq!(second.files_restored, 1);
        assert_eq!(std::fs::read(&restored_a)?, b"alpha");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_artifact_is_per_file_failure() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let backup = fx.backup_docs(&[("a.txt", b"alpha"), ("b.txt", b"beta")]).await;
        std::fs::remove_file(&backup.manifest.files[0].stored_path)?;

        let outcome = fx.restore(&backup.backup_id, ConflictStrategy::Rename).await;
        assert_eq!(outcome.files_restored, 1);
        assert_eq!(outcome.files_failed, 1);
        assert_eq!(outcome.details[0].status, RestoreStatus::Failed);
        assert!(outcome.details[0].error.as_ref().unwrap().contains("missing"));

        let logs = fx.store.log_entries().await;
        assert_eq!(logs.last().unwrap().1.level, LogLevel::Warn);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_backup() {
        let fx = Fixture::new();
        let err = fx
            .restore
            .restore_backup("nope", &fx.path("target"), &RestoreOptions::default(), &Progress::none())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BackupNotFound(_)));
    }

    fn record_with(fx: &Fixture, id: &str, files: Vec<FileEntry>) -> BackupRecord {
        let manifest = Manifest {
            id: id.to_string(),
            name: "handmade".to_string(),
            source: "/data/docs".to_string(),
            backup_path: fx.path("storage").join(id),
            created_at: Utc::now(),
            encrypted: false,
            compressed: false,
            incremental: false,
            files,
        };
        BackupRecord {
            id: id.to_string(),
            name: manifest.name.clone(),
            source_path: manifest.source.clone(),
            backup_path: manifest.backup_path.clone(),
            size: 0,
            file_count: 0,
            encrypted: false,
            manifest: manifest.to_json().unwrap(),
            owner: fx.identity.clone(),
            created_at: manifest.created_at,
        }
    }

    fn entry(unique_path: &str, stored_path: PathBuf, error: Option<&str>) -> FileEntry {
        FileEntry {
            relative_path: "a.txt".to_string(),
            source_root: PathBuf::from("/data/docs"),
            unique_path: unique_path.to_string(),
            original_path: PathBuf::from("/data/docs/a.txt"),
            size: 5,
            modified: Utc::now(),
            hash: String::new(),
            stored_path,
            reason: ChangeReason::Full,
            error: error.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_only_failed_entries_is_restore_no_files() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let record = record_with(
            &fx,
            "all-failed",
            vec![entry("docs/a.txt", fx.path("x.sealed"), Some("unreadable"))],
        );
        fx.store.create_backup_record(&record).await?;

        let err = fx
            .restore
            .restore_backup("all-failed", &fx.path("target"), &RestoreOptions::default(), &Progress::none())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RestoreNoFiles(_)));
        assert_eq!(fx.store.log_entries().await.last().unwrap().1.level, LogLevel::Error);
        Ok(())
    }

    #[tokio::test]
    async fn test_escaping_path_is_rejected() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let artifact = fx.path("evil.sealed");
        std::fs::write(&artifact, b"pwned")?;
        let record = record_with(&fx, "escape", vec![entry("../../evil.txt", artifact, None)]);
        fx.store.create_backup_record(&record).await?;

        let outcome = fx.restore("escape", ConflictStrategy::Overwrite).await;
        assert_eq!(outcome.files_failed, 1);
        assert!(!fx.path("evil.txt").exists());
        Ok(())
    }

    #[test]
    fn test_contained_path() {
        assert_eq!(contained_path("docs/a.txt"), Some(PathBuf::from("docs/a.txt")));
        assert_eq!(contained_path("./docs/a.txt"), Some(PathBuf::from("docs/a.txt")));
        assert_eq!(contained_path("docs/../../a.txt"), None);
        assert_eq!(contained_path("/etc/passwd"), None);
        assert_eq!(contained_path(""), None);
    }

    #[tokio::test]
    async fn test_restore_from_moved_sidecar() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let backup = fx.backup_docs(&[("a.txt", b"alpha"), ("sub/b.txt", b"beta")]).await;

        let moved = fx.path("moved-backup");
        std::fs::rename(&backup.manifest.backup_path, &moved)?;

        let outcome = fx
            .restore
            .restore_from_sidecar(&moved, &fx.path("target"), &RestoreOptions::default(), &fx.identity, &Progress::none())
            .await?;
        assert_eq!(outcome.files_restored, 2);
        assert_eq!(outcome.mismatches(), 0);
        assert_eq!(std::fs::read(fx.path("target/docs/sub/b.txt"))?, b"beta");
        Ok(())
    }

    #[tokio::test]
    async fn test_identity_without_key_fails_cleanly() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let backup = fx.backup_docs(&[("a.txt", b"alpha")]).await;
        let mallory = Identity::new("mallory");

        let err = fx
            .restore
            .restore_from_sidecar(
                &backup.manifest.backup_path,
                &fx.path("target"),
                &RestoreOptions::default(),
                &mallory,
                &Progress::none(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingKey(_)));
        assert!(fx.store.get_setting(crate::keys::KEY_SETTING, &mallory).await?.is_none());
        assert!(!fx.path("target/docs/a.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_open_releases_claimed_destination() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let backup = fx.backup_docs(&[("a.txt", b"alpha")]).await;
        std::fs::write(&backup.manifest.files[0].stored_path, b"garbage")?;

        let outcome = fx.restore(&backup.backup_id, ConflictStrategy::Rename).await;
        assert_eq!(outcome.files_failed, 1);
        assert!(!fx.path("target/docs/a.txt").exists());
        Ok(())
    }
}
