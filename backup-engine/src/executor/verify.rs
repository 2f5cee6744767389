//! Read-only integrity report for a recorded backup.
//!
//! Checks that every sealed artifact is still present, optionally re-opens it
//! to compare the plaintext hash, and passes each present artifact through
//! the malware scanner. Nothing in the store or the backup directory is
//! modified, so a verification can be repeated at any time.

use super::context::EngineContext;
use crate::keys::EncryptionKey;
use crate::manifest::{FileEntry, Manifest};
use crate::options::VerifyOptions;
use crate::scanner::{MalwareScanner, ScanOutcome};
use crate::store::LogLevel;
use crate::transfer::cipher::IV_LEN;
use crate::transfer::{FileProgress, HashingSink, Progress, ProgressEvent, TransformOptions};
use crate::utils::errors::Result;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Valid,
    Invalid,
    Missing,
}

/// Verification result for one manifest entry
#[derive(Debug, Clone, Serialize)]
pub struct FileCheck {
    pub file: String,
    pub stored_path: PathBuf,
    pub status: FileStatus,
    pub error: Option<String>,
    /// Absent for missing artifacts, which are never scanned
    pub scan: Option<ScanOutcome>,
    pub threat: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub scanned: usize,
    pub clean: usize,
    pub threats: usize,
    pub errors: usize,
    pub skipped: usize,
}

impl ScanSummary {
    fn record(&mut self, outcome: &ScanOutcome) {
        if outcome.skipped {
            self.skipped += 1;
            return;
        }
        self.scanned += 1;
        if outcome.error.is_some() {
            self.errors += 1;
        } else if outcome.threat.is_some() {
            self.threats += 1;
        } else if outcome.is_clean {
            self.clean += 1;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub backup_id: String,
    pub files_checked: usize,
    pub files_valid: usize,
    pub files_invalid: usize,
    pub files_missing: usize,
    pub virus_scan: ScanSummary,
    pub details: Vec<FileCheck>,
}

impl VerificationReport {
    /// Every artifact present and valid, and no threats found
    pub fn is_healthy(&self) -> bool {
        self.files_invalid == 0 && self.files_missing == 0 && self.virus_scan.threats == 0
    }
}

pub struct VerifyEngine {
    ctx: EngineContext,
    scanner: Arc<dyn MalwareScanner>,
}

impl VerifyEngine {
    pub fn new(ctx: EngineContext, scanner: Arc<dyn MalwareScanner>) -> Self {
        Self { ctx, scanner }
    }

    pub async fn verify_backup(
        &self,
        backup_id: &str,
        options: &VerifyOptions,
        progress: &Progress,
    ) -> Result<VerificationReport> {
        info!("Verifying backup {} (deep: {})", backup_id, options.deep);

        let record = match self.ctx.find_record(backup_id).await {
            Ok(record) => record,
            Err(e) => {
                error!("Verification of {} failed: {}", backup_id, e);
                progress.emit(ProgressEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let result = async {
            let manifest = Manifest::from_json(&record.manifest)?;
            self.verify_manifest(&manifest, options, &record.owner, progress).await
        }
        .await;

        match result {
            Ok(report) => {
                info!(
                    "Verification of {}: {} valid, {} invalid, {} missing, {} threats",
                    backup_id, report.files_valid, report.files_invalid, report.files_missing,
                    report.virus_scan.threats
                );
                let level = if report.is_healthy() { LogLevel::Info } else { LogLevel::Warn };
                self.ctx
                    .log(
                        "verify",
                        level,
                        format!(
                            "Verified backup {}: {}/{} files valid",
                            backup_id, report.files_valid, report.files_checked
                        ),
                        json!({
                            "backup_id": backup_id,
                            "deep": options.deep,
                            "checked": report.files_checked,
                            "valid": report.files_valid,
                            "invalid": report.files_invalid,
                            "missing": report.files_missing,
                            "virus_scan": report.virus_scan,
                        }),
                        &record.owner,
                    )
                    .await;
                progress.emit(ProgressEvent::Complete {
                    backup_id: backup_id.to_string(),
                    files: report.files_valid,
                    bytes: record.size,
                });
                Ok(report)
            }
            Err(e) => {
                error!("Verification of {} failed: {}", backup_id, e);
                progress.emit(ProgressEvent::Error {
                    message: e.to_string(),
                });
                self.ctx
                    .log(
                        "verify",
                        LogLevel::Error,
                        format!("Verification of backup {} failed: {}", backup_id, e),
                        json!({ "backup_id": backup_id }),
                        &record.owner,
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn verify_manifest(
        &self,
        manifest: &Manifest,
        options: &VerifyOptions,
        owner: &crate::store::Identity,
        progress: &Progress,
    ) -> Result<VerificationReport> {
        let entries: Vec<&FileEntry> = manifest.restorable().collect();
        let total = entries.len();
        progress.emit(ProgressEvent::Init {
            backup_id: manifest.id.clone(),
            total_files: total,
        });

        let key = if options.deep {
            self.ctx.opening_key(manifest.encrypted, owner).await?
        } else {
            None
        };
        let transform = TransformOptions {
            compress: manifest.compressed,
            encrypt: manifest.encrypted,
        };

        let mut report = VerificationReport {
            backup_id: manifest.id.clone(),
            files_checked: total,
            files_valid: 0,
            files_invalid: 0,
            files_missing: 0,
            virus_scan: ScanSummary::default(),
            details: Vec::with_capacity(total),
        };

        for (index, entry) in entries.into_iter().enumerate() {
            let mut check = self
                .check_entry(entry, options.deep, manifest.encrypted, transform, key.as_deref())
                .await;

            if check.status != FileStatus::Missing {
                let outcome = self.scanner.scan_file(&entry.stored_path).await;
                report.virus_scan.record(&outcome);
                if let Some(threat) = &outcome.threat {
                    warn!("Threat {} found in {}", threat, entry.stored_path.display());
                    check.threat = Some(threat.clone());
                }
                check.scan = Some(outcome);
            }

            match check.status {
                FileStatus::Valid => report.files_valid += 1,
                FileStatus::Invalid => report.files_invalid += 1,
                FileStatus::Missing => report.files_missing += 1,
            }
            report.details.push(check);

            progress.emit(ProgressEvent::Verify(FileProgress::new(
                entry.unique_path.clone(),
                index + 1,
                total,
            )));
        }

        Ok(report)
    }

    async fn check_entry(
        &self,
        entry: &FileEntry,
        deep: bool,
        encrypted: bool,
        transform: TransformOptions,
        key: Option<&EncryptionKey>,
    ) -> FileCheck {
        let mut check = FileCheck {
            file: entry.unique_path.clone(),
            stored_path: entry.stored_path.clone(),
            status: FileStatus::Valid,
            error: None,
            scan: None,
            threat: None,
        };

        let metadata = match tokio::fs::metadata(&entry.stored_path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                check.status = FileStatus::Invalid;
                check.error = Some("artifact is not a regular file".to_string());
                return check;
            }
            Err(e) => {
                warn!("Artifact missing for {}: {}", entry.unique_path, e);
                check.status = FileStatus::Missing;
                check.error = Some(e.to_string());
                return check;
            }
        };

        if encrypted && metadata.len() < IV_LEN as u64 {
            check.status = FileStatus::Invalid;
            check.error = Some(format!(
                "artifact is {} bytes, shorter than its IV",
                metadata.len()
            ));
            return check;
        }

        if deep {
            let opened = self
                .ctx
                .pipeline
                .open_into(&entry.stored_path, HashingSink::new(), transform, key)
                .await;
            match opened {
                Ok(sink) => {
                    let actual = sink.finalize();
                    if actual != entry.hash {
                        check.status = FileStatus::Invalid;
                        check.error = Some(format!(
                            "plaintext hash mismatch: expected {}, got {}",
                            entry.hash, actual
                        ));
                    }
                }
                Err(e) => {
                    check.status = FileStatus::Invalid;
                    check.error = Some(e.to_string());
                }
            }
        }

        if let Some(error) = &check.error {
            warn!("Artifact for {} is invalid: {}", entry.unique_path, error);
        }
        check
    }
}
