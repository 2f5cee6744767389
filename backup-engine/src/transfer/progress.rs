//! Phase-based progress reporting for backup, restore and verify runs.
//!
//! Consumers receive [`ProgressEvent`]s through a [`Progress`] observer. Only
//! the order of phases is guaranteed; any phase may be absent (an aborted
//! run emits `error` without `complete`).

use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum ProgressEvent {
    /// Change detection finished
    Detection {
        sources: usize,
        to_backup: usize,
        unchanged: usize,
        total_bytes: u64,
    },
    /// Restore or verify loaded its manifest
    Init { backup_id: String, total_files: usize },
    Backup(FileProgress),
    Restore(FileProgress),
    Verify(FileProgress),
    Complete {
        backup_id: String,
        files: usize,
        bytes: u64,
    },
    Error { message: String },
}

impl ProgressEvent {
    pub fn phase(&self) -> &'static str {
        match self {
            ProgressEvent::Detection { .. } => "detection",
            ProgressEvent::Init { .. } => "init",
            ProgressEvent::Backup(_) => "backup",
            ProgressEvent::Restore(_) => "restore",
            ProgressEvent::Verify(_) => "verify",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }
}

/// Per-file progress within a running phase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileProgress {
    /// File just processed
    pub file: String,

    /// Number of files processed so far
    pub processed: usize,

    /// Total number of files
    pub total: usize,

    /// Percentage complete (0-100)
    pub percent: f64,
}

impl FileProgress {
    pub fn new(file: impl Into<String>, processed: usize, total: usize) -> Self {
        let percent = if total > 0 {
            ((processed as f64 / total as f64) * 100.0).min(100.0)
        } else {
            100.0
        };
        Self {
            file: file.into(),
            processed,
            total,
            percent,
        }
    }
}

type Observer = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Cloneable progress observer; the default drops every event
#[derive(Clone, Default)]
pub struct Progress {
    observer: Option<Observer>,
}

impl Progress {
    pub fn new<F>(observer: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            observer: Some(Arc::new(observer)),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}
