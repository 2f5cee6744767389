//! Backup Engine Library
//!
//! Local encrypted incremental backups: change detection against the previous
//! manifest, per-file gzip + AES-256-CBC sealing, restore with conflict
//! handling and hash verification, and read-only integrity reports.
//!
//! Persistence and malware scanning are collaborators supplied by the caller
//! through [`BackupStore`] and [`MalwareScanner`].

pub mod config;
pub mod detect;
pub mod executor;
pub mod fs;
pub mod keys;
pub mod manifest;
pub mod options;
pub mod scanner;
pub mod store;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{
    BackupEngine, BackupOutcome, EngineContext, RestoreEngine, RestoreOutcome, VerificationReport,
    VerifyEngine,
};
pub use manifest::{ChangeReason, FileEntry, Manifest};
pub use options::{BackupOptions, ConflictStrategy, RestoreOptions, VerifyOptions};
pub use scanner::{MalwareScanner, NoopScanner, ScanOutcome};
pub use store::{BackupRecord, BackupStore, Identity, LogEntry, LogLevel, MemoryStore, RecordFilter};
pub use transfer::{Progress, ProgressEvent};
pub use utils::errors::{EngineError, Result};
