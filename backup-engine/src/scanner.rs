//! Malware scanner interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Outcome of scanning one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub is_clean: bool,
    pub threat: Option<String>,
    /// The scanner did not look at the file (unavailable, unsupported, ...)
    pub skipped: bool,
    /// The scan itself failed; recorded, never fatal
    pub error: Option<String>,
}

impl ScanOutcome {
    pub fn clean() -> Self {
        Self {
            is_clean: true,
            ..Default::default()
        }
    }

    pub fn infected(threat: impl Into<String>) -> Self {
        Self {
            threat: Some(threat.into()),
            ..Default::default()
        }
    }

    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait MalwareScanner: Send + Sync {
    async fn scan_file(&self, path: &Path) -> ScanOutcome;
}

/// Scanner used when no real scanner is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScanner;

#[async_trait]
impl MalwareScanner for NoopScanner {
    async fn scan_file(&self, _path: &Path) -> ScanOutcome {
        ScanOutcome::skipped()
    }
}
