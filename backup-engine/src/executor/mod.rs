//! Backup orchestration.
//!
//! A run goes through pre-flight, baseline lookup, change detection, sealing
//! of every selected file under a weighted semaphore, and finally persistence
//! of the manifest (sidecar + store record). A file that fails to seal is
//! recorded as a failed entry; it never aborts the run.

pub mod context;
pub mod preflight;
pub mod restore;
pub mod verify;

pub use context::EngineContext;
pub use restore::{HashCheck, RestoreDetail, RestoreEngine, RestoreOutcome, RestoreStatus};
pub use verify::{FileCheck, FileStatus, ScanSummary, VerificationReport, VerifyEngine};

use crate::detect::{detect_changes, label_roots, Candidate, DetectMode, Detection, SourceRoot};
use crate::fs::WalkOptions;
use crate::keys::EncryptionKey;
use crate::manifest::{FileEntry, Manifest};
use crate::options::BackupOptions;
use crate::store::{BackupRecord, Identity, LogLevel, RecordFilter};
use crate::transfer::progress::format_bytes;
use crate::transfer::{FileProgress, Progress, ProgressEvent, SealSummary, TransformOptions};
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Returns the number of semaphore permits a file should acquire based on its
/// size, scaled to the configured budget. Many small files run concurrently;
/// very large files run alone.
///
/// | File size       | Permits        |
/// |-----------------|----------------|
/// | < 10 MB         | 1              |
/// | 10 – 100 MB     | budget / 32    |
/// | 100 – 500 MB    | budget / 4     |
/// | 500 MB – 1 GB   | budget / 2     |
/// | > 1 GB          | budget         |
fn concurrency_weight(file_size: u64, budget: u32) -> u32 {
    let budget = budget.max(1);
    let weight = match file_size {
        0..=10_485_759              => 1,           // < 10 MB
        10_485_760..=104_857_599    => budget / 32, // 10 – 100 MB
        104_857_600..=524_287_999   => budget / 4,  // 100 – 500 MB
        524_288_000..=1_073_741_823 => budget / 2,  // 500 MB – 1 GB
        _ => budget,                                // > 1 GB
    };
    weight.clamp(1, budget)
}

/// Result of a backup run
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub backup_id: String,
    pub manifest: Manifest,
    /// Successfully sealed files only
    pub files_backed_up: usize,
    pub files_failed: usize,
    /// Plaintext bytes of the successfully sealed files
    pub total_size: u64,
}

/// Main backup orchestrator
pub struct BackupEngine {
    ctx: EngineContext,
}

impl BackupEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Back up every path of the `;`-separated `source_spec`.
    pub async fn create_backup(
        &self,
        source_spec: &str,
        options: &BackupOptions,
        identity: &Identity,
        progress: &Progress,
    ) -> Result<BackupOutcome> {
        let started = std::time::Instant::now();
        info!("Starting backup of '{}' (incremental: {})", source_spec, options.incremental);

        match self.run_backup(source_spec, options, identity, progress).await {
            Ok(outcome) => {
                info!(
                    "Backup {} completed: {} files ({} failed), {} in {}s",
                    outcome.backup_id,
                    outcome.files_backed_up,
                    outcome.files_failed,
                    format_bytes(outcome.total_size),
                    started.elapsed().as_secs()
                );
                Ok(outcome)
            }
            Err(e) => {
                error!("Backup of '{}' failed: {}", source_spec, e);
                progress.emit(ProgressEvent::Error {
                    message: e.to_string(),
                });
                self.ctx
                    .log(
                        "backup",
                        LogLevel::Error,
                        format!("Backup failed: {}", e),
                        json!({ "source": source_spec }),
                        identity,
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn run_backup(
        &self,
        source_spec: &str,
        options: &BackupOptions,
        identity: &Identity,
        progress: &Progress,
    ) -> Result<BackupOutcome> {
        let config = &self.ctx.config;
        let sources = preflight::parse_sources(source_spec)?;
        preflight::run_preflight(&sources, &config.storage.root).await?;

        let baseline = if options.incremental {
            self.load_baseline(source_spec, identity).await?
        } else {
            None
        };

        let roots = label_roots(sources, &config.storage.manifest_file);
        let detection = self.detect(&roots, options.incremental, baseline).await?;
        info!(
            "Change detection: {} to back up ({}), {} unchanged",
            detection.to_backup.len(),
            format_bytes(detection.to_backup_bytes()),
            detection.unchanged
        );
        progress.emit(ProgressEvent::Detection {
            sources: roots.len(),
            to_backup: detection.to_backup.len(),
            unchanged: detection.unchanged,
            total_bytes: detection.to_backup_bytes(),
        });

        let key = self.ctx.sealing_key(options.encrypt, identity).await?;
        let backup_id = uuid::Uuid::new_v4().to_string();
        let backup_dir = config.storage.root.join(&backup_id);
        tokio::fs::create_dir_all(&backup_dir).await?;

        let transform = TransformOptions {
            compress: options.compress,
            encrypt: options.encrypt,
        };
        let files = self
            .seal_all(detection.to_backup, &backup_dir, transform, key, progress)
            .await;

        let created_at = Utc::now();
        let manifest = Manifest {
            id: backup_id.clone(),
            name: options.name.clone().unwrap_or_else(|| default_name(created_at)),
            source: source_spec.to_string(),
            backup_path: backup_dir.clone(),
            created_at,
            encrypted: options.encrypt,
            compressed: options.compress,
            incremental: options.incremental,
            files,
        };
        if let Err(e) = self.persist(&manifest, identity).await {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&backup_dir).await {
                warn!("Could not remove {} after failed backup: {}", backup_dir.display(), cleanup);
            }
            return Err(e);
        }

        let files_backed_up = manifest.restorable().count();
        let files_failed = manifest.failed().count();
        let total_size = manifest.total_size();

        let (level, message) = if files_failed > 0 && files_backed_up == 0 {
            (
                LogLevel::Error,
                format!("Backup {} failed: all {} files failed", manifest.name, files_failed),
            )
        } else if files_failed > 0 {
            (
                LogLevel::Warn,
                format!(
                    "Backup {} completed: {} files, {} ({} failed)",
                    manifest.name,
                    files_backed_up,
                    format_bytes(total_size),
                    files_failed
                ),
            )
        } else {
            (
                LogLevel::Info,
                format!(
                    "Backup {} completed: {} files, {}",
                    manifest.name,
                    files_backed_up,
                    format_bytes(total_size)
                ),
            )
        };
        self.ctx
            .log(
                "backup",
                level,
                message,
                json!({
                    "backup_id": backup_id,
                    "source": source_spec,
                    "files": files_backed_up,
                    "failed": files_failed,
                    "unchanged": detection.unchanged,
                    "size": total_size,
                }),
                identity,
            )
            .await;

        progress.emit(ProgressEvent::Complete {
            backup_id: backup_id.clone(),
            files: files_backed_up,
            bytes: total_size,
        });

        Ok(BackupOutcome {
            backup_id,
            manifest,
            files_backed_up,
            files_failed,
            total_size,
        })
    }

    /// Write the sidecar, then the store record.
    async fn persist(&self, manifest: &Manifest, identity: &Identity) -> Result<()> {
        manifest
            .write_sidecar(&manifest.backup_path, &self.ctx.config.storage.manifest_file)
            .await?;
        let record = BackupRecord {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            source_path: manifest.source.clone(),
            backup_path: manifest.backup_path.clone(),
            size: manifest.total_size(),
            file_count: manifest.restorable().count() as u64,
            encrypted: manifest.encrypted,
            manifest: manifest.to_json()?,
            owner: identity.clone(),
            created_at: manifest.created_at,
        };
        Ok(self.ctx.store.create_backup_record(&record).await?)
    }

    /// Latest manifest recorded for exactly this source spec. A manifest that
    /// no longer parses is ignored and the run becomes a full scan.
    async fn load_baseline(
        &self,
        source_spec: &str,
        identity: &Identity,
    ) -> Result<Option<Arc<Manifest>>> {
        let records = self
            .ctx
            .store
            .get_backup_records(&RecordFilter::source(source_spec), 1, identity)
            .await?;

        let Some(record) = records.into_iter().next() else {
            info!("No previous backup of '{}', running a full scan", source_spec);
            return Ok(None);
        };

        match Manifest::from_json(&record.manifest) {
            Ok(manifest) => {
                info!("Using backup {} as incremental baseline", record.id);
                Ok(Some(Arc::new(manifest)))
            }
            Err(e) => {
                warn!("Ignoring unreadable baseline {}: {}", record.id, e);
                Ok(None)
            }
        }
    }

    async fn detect(
        &self,
        roots: &[SourceRoot],
        incremental: bool,
        baseline: Option<Arc<Manifest>>,
    ) -> Result<Detection> {
        let walk = WalkOptions {
            follow_links: self.ctx.config.walk.follow_links,
            exclude_patterns: self.ctx.config.walk.exclude_patterns.clone(),
        };

        let mut detection = Detection::default();
        for root in roots {
            let root = root.clone();
            let walk = walk.clone();
            let baseline = baseline.clone();

            // Directory walk is blocking I/O
            let found = tokio::task::spawn_blocking(move || {
                let mode = if incremental {
                    DetectMode::Incremental(baseline.as_deref())
                } else {
                    DetectMode::Full
                };
                detect_changes(&root, &walk, mode)
            })
            .await
            .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;

            detection.merge(found);
        }
        Ok(detection)
    }

    /// Seal every candidate concurrently, returning entries in discovery order.
    async fn seal_all(
        &self,
        candidates: Vec<Candidate>,
        backup_dir: &Path,
        transform: TransformOptions,
        key: Option<Arc<EncryptionKey>>,
        progress: &Progress,
    ) -> Vec<FileEntry> {
        let budget = self
            .ctx
            .config
            .performance
            .concurrency_budget
            .clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize)) as u32;
        let semaphore = Arc::new(Semaphore::new(budget as usize));
        let total = candidates.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let extension = &self.ctx.config.storage.artifact_extension;

        let mut handles = Vec::with_capacity(total);
        for candidate in candidates {
            let stored_path = backup_dir.join(format!("{}.{}", candidate.unique_path, extension));
            let fallback = (candidate.clone(), stored_path.clone());

            let sem = Arc::clone(&semaphore);
            let pipeline = self.ctx.pipeline.clone();
            let key = key.clone();
            let completed = Arc::clone(&completed);
            let progress = progress.clone();

            let handle = tokio::spawn(async move {
                let weight = concurrency_weight(candidate.file.size, budget);
                let result = if candidate.file.path.to_str().is_none() {
                    Err(EngineError::TransformFailed("file name is not valid UTF-8".to_string()))
                } else {
                    match sem.acquire_many(weight).await {
                        Ok(_permit) => {
                            pipeline
                                .seal(&candidate.file.path, &stored_path, transform, key.as_deref())
                                .await
                        }
                        Err(e) => Err(EngineError::TransformFailed(format!("semaphore closed: {}", e))),
                    }
                };

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                progress.emit(ProgressEvent::Backup(FileProgress::new(
                    candidate.unique_path.clone(),
                    done,
                    total,
                )));
                build_entry(candidate, stored_path, result)
            });
            handles.push((fallback, handle));
        }

        let mut entries = Vec::with_capacity(total);
        for ((candidate, stored_path), handle) in handles {
            match handle.await {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!("Seal task for {} panicked: {}", candidate.unique_path, e);
                    entries.push(build_entry(
                        candidate,
                        stored_path,
                        Err(EngineError::TransformFailed(format!("task failed: {}", e))),
                    ));
                }
            }
        }
        entries
    }

    /// Records for `source` (all sources when `None`), newest first
    pub async fn list_backups(
        &self,
        source: Option<&str>,
        limit: usize,
        identity: &Identity,
    ) -> Result<Vec<BackupRecord>> {
        let filter = match source {
            Some(source) => RecordFilter::source(source),
            None => RecordFilter::default(),
        };
        Ok(self.ctx.store.get_backup_records(&filter, limit, identity).await?)
    }
}

fn build_entry(candidate: Candidate, stored_path: PathBuf, result: Result<SealSummary>) -> FileEntry {
    let Candidate {
        file,
        source_root,
        unique_path,
        reason,
    } = candidate;

    let (size, hash, error) = match result {
        Ok(summary) => (summary.plaintext_bytes, summary.plaintext_hash, None),
        Err(e) => {
            warn!("Failed to back up {}: {}", file.path.display(), e);
            (file.size, String::new(), Some(e.to_string()))
        }
    };

    FileEntry {
        relative_path: file.relative_path,
        source_root,
        unique_path,
        // Lossy so the manifest always serializes; such files are failed entries
        original_path: PathBuf::from(file.path.to_string_lossy().into_owned()),
        size,
        modified: file.modified,
        hash,
        stored_path,
        reason,
        error,
    }
}

fn default_name(created_at: DateTime<Utc>) -> String {
    format!("Backup {}", created_at.format("%Y-%m-%d %H:%M:%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::manifest::ChangeReason;
    use crate::store::{BackupStore, LogEntry, MemoryStore};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const HELLO_WORLD_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn engine(storage: &Path) -> (BackupEngine, Arc<MemoryStore>) {
        let mut config = Config::default();
        config.storage.root = storage.to_path_buf();
        let store = Arc::new(MemoryStore::new());
        let ctx = EngineContext::new(config, store.clone());
        (BackupEngine::new(ctx), store)
    }

    fn full_options() -> BackupOptions {
        BackupOptions {
            incremental: false,
            ..Default::default()
        }
    }

    fn recording_progress() -> (Progress, Arc<Mutex<Vec<&'static str>>>) {
        let phases = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&phases);
        let progress = Progress::new(move |e| sink.lock().unwrap().push(e.phase()));
        (progress, phases)
    }

    #[test]
    fn test_concurrency_weight() {
        // Small files: 1 permit
        assert_eq!(concurrency_weight(0, 16), 1);
        assert_eq!(concurrency_weight(1_000, 16), 1);
        assert_eq!(concurrency_weight(10_485_759, 16), 1);

        // 10 – 100 MB with a small budget still takes at least one permit
        assert_eq!(concurrency_weight(10_485_760, 16), 1);
        assert_eq!(concurrency_weight(50_000_000, 64), 2);

        // 100 – 500 MB
        assert_eq!(concurrency_weight(104_857_600, 16), 4);

        // 500 MB – 1 GB
        assert_eq!(concurrency_weight(524_288_000, 16), 8);

        // > 1 GB: the whole budget
        assert_eq!(concurrency_weight(1_073_741_824, 16), 16);
        assert_eq!(concurrency_weight(u64::MAX, 1), 1);
    }

    #[tokio::test]
    async fn test_single_file_backup() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("src");
        std::fs::create_dir(&src)?;
        let notes = src.join("notes.txt");
        std::fs::write(&notes, b"hello world")?;
        let storage = dir.path().join("storage");
        let (engine, store) = engine(&storage);
        let identity = Identity::new("alice");
        let (progress, phases) = recording_progress();

        let outcome = engine
            .create_backup(notes.to_str().unwrap(), &full_options(), &identity, &progress)
            .await?;

        assert_eq!(outcome.files_backed_up, 1);
        assert_eq!(outcome.total_size, 11);
        assert_eq!(std::fs::read_dir(&storage)?.count(), 1);

        let entry = &outcome.manifest.files[0];
        assert_eq!(entry.hash, HELLO_WORLD_SHA256);
        assert_eq!(entry.reason, ChangeReason::Full);
        assert_eq!(entry.relative_path, "notes.txt");
        assert_eq!(entry.unique_path, "notes/notes.txt");
        assert!(entry.stored_path.ends_with("notes/notes.txt.sealed"));
        assert!(entry.stored_path.exists());

        // Sidecar and store record carry the same manifest
        let sidecar = Manifest::read_sidecar(&outcome.manifest.backup_path, "manifest.json").await?;
        assert_eq!(sidecar, outcome.manifest);
        let record = store.get_backup_record_by_id(&outcome.backup_id).await?.unwrap();
        assert_eq!(record.file_count, 1);
        assert_eq!(record.size, 11);
        assert!(record.encrypted);
        assert_eq!(record.owner, identity);
        assert_eq!(Manifest::from_json(&record.manifest)?, outcome.manifest);

        let logs = store.log_entries().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].1.category, "backup");
        assert_eq!(logs[0].1.level, LogLevel::Info);

        assert_eq!(*phases.lock().unwrap(), vec!["detection", "backup", "complete"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_incremental_backs_up_only_changes() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let docs = dir.path().join("docs");
        std::fs::create_dir(&docs)?;
        std::fs::write(docs.join("a.txt"), b"alpha")?;
        std::fs::write(docs.join("b.txt"), b"beta")?;
        let (engine, _store) = engine(&dir.path().join("storage"));
        let identity = Identity::new("alice");
        let spec = docs.to_str().unwrap();
        let options = BackupOptions::default();

        let first = engine.create_backup(spec, &options, &identity, &Progress::none()).await?;
        assert_eq!(first.files_backed_up, 2);
        assert!(first.manifest.files.iter().all(|f| f.reason == ChangeReason::New));

        std::fs::write(docs.join("b.txt"), b"beta, but longer")?;
        let second = engine.create_backup(spec, &options, &identity, &Progress::none()).await?;
        assert_eq!(second.files_backed_up, 1);
        assert_eq!(second.manifest.files[0].relative_path, "b.txt");
        assert_eq!(second.manifest.files[0].reason, ChangeReason::Modified);

        // The second manifest holds only b.txt, so a.txt is new against it
        std::fs::write(docs.join("c.txt"), b"gamma")?;
        let third = engine.create_backup(spec, &options, &identity, &Progress::none()).await?;
        let names: Vec<_> = third.manifest.files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "c.txt"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_incremental_unchanged_modified_and_new() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let docs = dir.path().join("docs");
        std::fs::create_dir(&docs)?;
        std::fs::write(docs.join("a.txt"), b"alpha")?;
        std::fs::write(docs.join("b.txt"), b"beta")?;
        let (engine, _store) = engine(&dir.path().join("storage"));
        let identity = Identity::new("alice");
        let spec = docs.to_str().unwrap();
        let options = BackupOptions::default();

        engine.create_backup(spec, &options, &identity, &Progress::none()).await?;

        std::fs::write(docs.join("b.txt"), b"beta, but longer")?;
        std::fs::write(docs.join("c.txt"), b"gamma")?;
        let next = engine.create_backup(spec, &options, &identity, &Progress::none()).await?;

        let selected: Vec<_> = next
            .manifest
            .files
            .iter()
            .map(|f| (f.relative_path.as_str(), f.reason))
            .collect();
        assert_eq!(selected, vec![("b.txt", ChangeReason::Modified), ("c.txt", ChangeReason::New)]);
        assert_eq!(next.files_failed, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_baselines_are_per_identity() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let docs = dir.path().join("docs");
        std::fs::create_dir(&docs)?;
        std::fs::write(docs.join("a.txt"), b"alpha")?;
        let (engine, _store) = engine(&dir.path().join("storage"));
        let spec = docs.to_str().unwrap();

        engine
            .create_backup(spec, &BackupOptions::default(), &Identity::new("alice"), &Progress::none())
            .await?;
        let bob = engine
            .create_backup(spec, &BackupOptions::default(), &Identity::new("bob"), &Progress::none())
            .await?;
        assert_eq!(bob.files_backed_up, 1);
        assert_eq!(bob.manifest.files[0].reason, ChangeReason::New);
        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_roots_with_same_name() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let first = dir.path().join("one/docs");
        let second = dir.path().join("two/docs");
        std::fs::create_dir_all(&first)?;
        std::fs::create_dir_all(&second)?;
        std::fs::write(first.join("readme.md"), b"first")?;
        std::fs::write(second.join("readme.md"), b"second")?;
        let (engine, _store) = engine(&dir.path().join("storage"));

        let spec = format!("{} ; {}", first.display(), second.display());
        let outcome = engine
            .create_backup(&spec, &full_options(), &Identity::new("alice"), &Progress::none())
            .await?;

        let unique: Vec<_> = outcome.manifest.files.iter().map(|f| f.unique_path.as_str()).collect();
        assert_eq!(unique, vec!["docs/readme.md", "docs-2/readme.md"]);
        assert_eq!(outcome.manifest.files[0].source_root, first);
        assert_eq!(outcome.manifest.files[1].source_root, second);
        Ok(())
    }

    #[tokio::test]
    async fn test_unencrypted_uncompressed_artifact_is_plaintext() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let docs = dir.path().join("docs");
        std::fs::create_dir(&docs)?;
        std::fs::write(docs.join("plain.txt"), b"readable")?;
        let (engine, store) = engine(&dir.path().join("storage"));
        let identity = Identity::new("alice");
        let options = BackupOptions {
            encrypt: false,
            compress: false,
            incremental: false,
            name: Some("plain copy".to_string()),
        };

        let outcome = engine
            .create_backup(docs.to_str().unwrap(), &options, &identity, &Progress::none())
            .await?;
        assert_eq!(outcome.manifest.name, "plain copy");
        assert_eq!(std::fs::read(&outcome.manifest.files[0].stored_path)?, b"readable");
        // No key is generated for an unencrypted run
        assert!(store.get_setting(crate::keys::KEY_SETTING, &identity).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_preflight_failure_leaves_no_trace() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let docs = dir.path().join("docs");
        std::fs::create_dir(&docs)?;
        let storage = dir.path().join("storage");
        let (engine, store) = engine(&storage);
        let identity = Identity::new("alice");
        let (progress, phases) = recording_progress();

        // One good source and one missing: all or nothing
        let spec = format!("{};{}", docs.display(), dir.path().join("missing").display());
        let err = engine
            .create_backup(&spec, &full_options(), &identity, &progress)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::PreflightFailed(_)));
        assert_eq!(store.record_count().await, 0);
        assert!(!storage.exists());
        assert_eq!(*phases.lock().unwrap(), vec!["error"]);

        let logs = store.log_entries().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].1.level, LogLevel::Error);
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_non_utf8_names_are_failed_entries() -> anyhow::Result<()> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new()?;
        let docs = dir.path().join("docs");
        std::fs::create_dir(&docs)?;
        std::fs::write(docs.join("good.txt"), b"fine")?;
        std::fs::write(docs.join(OsStr::from_bytes(b"a\xff")), b"x")?;
        std::fs::write(docs.join(OsStr::from_bytes(b"a\xfe")), b"y")?;
        let (engine, store) = engine(&dir.path().join("storage"));

        let outcome = engine
            .create_backup(docs.to_str().unwrap(), &full_options(), &Identity::new("alice"), &Progress::none())
            .await?;

        assert_eq!(outcome.files_backed_up, 1);
        assert_eq!(outcome.files_failed, 2);
        assert!(outcome.manifest.failed().all(|f| f.error.as_deref().unwrap().contains("UTF-8")));
        let record = store.get_backup_record_by_id(&outcome.backup_id).await?.unwrap();
        assert_eq!(Manifest::from_json(&record.manifest)?, outcome.manifest);
        Ok(())
    }

    /// Delegates to a `MemoryStore` but refuses to save backup records
    struct RejectingStore(MemoryStore);

    #[async_trait::async_trait]
    impl BackupStore for RejectingStore {
        async fn get_setting(&self, key: &str, identity: &Identity) -> anyhow::Result<Option<String>> {
            self.0.get_setting(key, identity).await
        }
        async fn set_setting(&self, key: &str, value: &str, identity: &Identity) -> anyhow::Result<()> {
            self.0.set_setting(key, value, identity).await
        }
        async fn create_backup_record(&self, _record: &BackupRecord) -> anyhow::Result<()> {
            anyhow::bail!("database is locked")
        }
        async fn get_backup_records(
            &self,
            filter: &RecordFilter,
            limit: usize,
            identity: &Identity,
        ) -> anyhow::Result<Vec<BackupRecord>> {
            self.0.get_backup_records(filter, limit, identity).await
        }
        async fn get_backup_record_by_id(&self, id: &str) -> anyhow::Result<Option<BackupRecord>> {
            self.0.get_backup_record_by_id(id).await
        }
        async fn add_log_entry(&self, entry: &LogEntry, identity: &Identity) -> anyhow::Result<()> {
            self.0.add_log_entry(entry, identity).await
        }
    }

    #[tokio::test]
    async fn test_failed_record_write_removes_backup_dir() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let docs = dir.path().join("docs");
        std::fs::create_dir(&docs)?;
        std::fs::write(docs.join("a.txt"), b"alpha")?;
        let storage = dir.path().join("storage");
        let mut config = Config::default();
        config.storage.root = storage.clone();
        let engine = BackupEngine::new(EngineContext::new(config, Arc::new(RejectingStore(MemoryStore::new()))));

        let err = engine
            .create_backup(docs.to_str().unwrap(), &full_options(), &Identity::new("alice"), &Progress::none())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Store(_)));
        assert_eq!(std::fs::read_dir(&storage)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_source_named_like_the_sidecar() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let odd = dir.path().join("manifest.json");
        std::fs::create_dir(&odd)?;
        std::fs::write(odd.join("a.txt"), b"alpha")?;
        let (engine, _store) = engine(&dir.path().join("storage"));

        let outcome = engine
            .create_backup(odd.to_str().unwrap(), &full_options(), &Identity::new("alice"), &Progress::none())
            .await?;

        assert_eq!(outcome.manifest.files[0].unique_path, "manifest.json-2/a.txt");
        let sidecar = Manifest::read_sidecar(&outcome.manifest.backup_path, "manifest.json").await?;
        assert_eq!(sidecar, outcome.manifest);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_source_spec() {
        let dir = TempDir::new().unwrap();
        let (engine, store) = engine(dir.path());

        let err = engine
            .create_backup("  ;  ", &full_options(), &Identity::new("alice"), &Progress::none())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoSourceProvided));
        assert_eq!(store.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_empty_directory_produces_empty_backup() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let docs = dir.path().join("docs");
        std::fs::create_dir(&docs)?;
        let (engine, store) = engine(&dir.path().join("storage"));

        let outcome = engine
            .create_backup(docs.to_str().unwrap(), &full_options(), &Identity::new("alice"), &Progress::none())
            .await?;
        assert_eq!(outcome.files_backed_up, 0);
        assert!(outcome.manifest.files.is_empty());
        assert_eq!(store.record_count().await, 1);
        Ok(())
    }

    #[test]
    fn test_failed_seal_becomes_failed_entry() {
        let candidate = Candidate {
            file: crate::fs::FileInfo {
                path: PathBuf::from("/data/docs/a.txt"),
                relative_path: "a.txt".to_string(),
                size: 42,
                modified: Utc::now(),
            },
            source_root: PathBuf::from("/data/docs"),
            unique_path: "docs/a.txt".to_string(),
            reason: ChangeReason::New,
        };

        let entry = build_entry(
            candidate,
            PathBuf::from("/backups/x/docs/a.txt.sealed"),
            Err(EngineError::TransformFailed("disk full".to_string())),
        );
        assert!(entry.is_failed());
        assert!(entry.hash.is_empty());
        assert_eq!(entry.size, 42);
        assert!(entry.error.unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn test_list_backups_newest_first() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let docs = dir.path().join("docs");
        std::fs::create_dir(&docs)?;
        std::fs::write(docs.join("a.txt"), b"alpha")?;
        let (engine, _store) = engine(&dir.path().join("storage"));
        let identity = Identity::new("alice");
        let spec = docs.to_str().unwrap();

        let first = engine.create_backup(spec, &full_options(), &identity, &Progress::none()).await?;
        let second = engine.create_backup(spec, &full_options(), &identity, &Progress::none()).await?;

        let listed = engine.list_backups(Some(spec), 10, &identity).await?;
        let ids: Vec<_> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![second.backup_id.as_str(), first.backup_id.as_str()]);

        assert_eq!(engine.list_backups(None, 1, &identity).await?.len(), 1);
        assert!(engine.list_backups(Some("/elsewhere"), 10, &identity).await?.is_empty());
        assert!(engine.list_backups(None, 10, &Identity::new("bob")).await?.is_empty());
        Ok(())
    }
}
