//! Pre-flight checks run before anything is written.

use crate::utils::errors::{EngineError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Split a `;`-separated source spec into distinct, trimmed paths.
pub fn parse_sources(spec: &str) -> Result<Vec<PathBuf>> {
    let mut sources: Vec<PathBuf> = Vec::new();
    for item in spec.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let path = PathBuf::from(item);
        if !sources.contains(&path) {
            sources.push(path);
        }
    }
    if sources.is_empty() {
        return Err(EngineError::NoSourceProvided);
    }
    Ok(sources)
}

/// Every source must exist and be readable, and the storage root writable.
pub async fn run_preflight(sources: &[PathBuf], storage_root: &Path) -> Result<()> {
    for source in sources {
        check_source(source)
            .await
            .map_err(|e| EngineError::PreflightFailed(format!("{}: {}", source.display(), e)))?;
    }

    check_writable(storage_root).await.map_err(|e| {
        EngineError::PreflightFailed(format!(
            "storage root {} is not writable: {}",
            storage_root.display(),
            e
        ))
    })?;

    debug!("Pre-flight passed for {} source(s)", sources.len());
    Ok(())
}

async fn check_source(path: &Path) -> std::io::Result<()> {
    let metadata = fs::metadata(path).await?;
    if metadata.is_dir() {
        fs::read_dir(path).await?;
    } else if metadata.is_file() {
        fs::File::open(path).await?;
    } else {
        return Err(std::io::Error::other("not a regular file or directory"));
    }
    Ok(())
}

async fn check_writable(root: &Path) -> std::io::Result<()> {
    fs::create_dir_all(root).await?;
    let marker = root.join(format!(".write-check-{}", uuid::Uuid::new_v4().simple()));
    fs::write(&marker, b"check").await?;
    fs::remove_file(&marker).await
}
