//! Error types for the backup engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No source path provided")]
    NoSourceProvided,

    #[error("Pre-flight check failed: {0}")]
    PreflightFailed(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Backup {0} has no restorable files")]
    RestoreNoFiles(String),

    #[error("No encryption key stored for {0}")]
    MissingKey(String),

    #[error("Corrupt artifact: {0}")]
    CorruptArtifact(String),

    #[error("Transform failed: {0}")]
    TransformFailed(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
