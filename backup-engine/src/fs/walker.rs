//! Source discovery.
//!
//! Enumerates the regular files under a source path. A directory source is
//! walked recursively; a single file source yields exactly one entry keyed by
//! its base name. Symlinks (when not followed) and unreadable entries are
//! skipped with a warning rather than failing the walk.

use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Exclude patterns matched against each file or directory name
    pub exclude_patterns: Vec<String>,
}

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the source root, `/`-separated
    pub relative_path: String,

    /// File size in bytes
    pub size: u64,

    /// Last modified time
    pub modified: DateTime<Utc>,
}

impl FileInfo {
    fn new(path: PathBuf, relative_path: String, metadata: &Metadata) -> std::io::Result<Self> {
        Ok(Self {
            path,
            relative_path,
            size: metadata.len(),
            modified: DateTime::<Utc>::from(metadata.modified()?),
        })
    }
}

/// Join path components with `/` so keys are stable across platforms
fn relative_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Enumerate the files of a source path.
///
/// # Returns
/// * `Ok(Vec<FileInfo>)` - Files in discovery order
/// * `Err(io::Error)` - If the source itself cannot be read
pub fn walk_source(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let root_meta = std::fs::metadata(root)?;
    if root_meta.is_file() {
        let relative_path = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string());
        return Ok(vec![FileInfo::new(root.to_path_buf(), relative_path, &root_meta)?]);
    }

    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !should_exclude(e, &options.exclude_patterns));

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::other(format!("cannot walk {}", root.display()))
                }));
            }
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            warn!("Skipping symlink: {}", entry.path().display());
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let path = entry.path().to_path_buf();
        let relative_path = relative_key(path.strip_prefix(root).unwrap_or(&path));
        let info = entry
            .metadata()
            .map_err(std::io::Error::from)
            .and_then(|metadata| FileInfo::new(path, relative_path, &metadata));
        match info {
            Ok(info) => files.push(info),
            Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
        }
    }

    Ok(files)
}

/// Check if a directory entry should be excluded based on patterns
fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    patterns.iter().any(|p| file_name == p.as_str())
}
