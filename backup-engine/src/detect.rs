//! Change detection against a prior manifest.
//!
//! Uses size + mtime as the change heuristic (same as rsync's default quick
//! check). A same-size edit that also keeps or rewinds the mtime is not
//! detected; content hashes are only computed for files already selected.

use crate::fs::walker::{walk_source, FileInfo, WalkOptions};
use crate::manifest::{ChangeReason, FileEntry, Manifest};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// How discovered files are classified.
#[derive(Debug, Clone, Copy)]
pub enum DetectMode<'a> {
    /// Non-incremental run: everything is backed up with reason `full`
    Full,
    /// Compare against a baseline; `None` means no prior backup exists
    Incremental(Option<&'a Manifest>),
}

/// A source path item with the label used to disambiguate its files in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoot {
    pub path: PathBuf,
    pub label: String,
}

impl SourceRoot {
    /// Label a directory by its name and a single file by its stem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = if path.is_file() { path.file_stem() } else { path.file_name() };
        let label = name
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "root".to_string());
        Self { path, label }
    }

    pub fn unique_path(&self, relative_path: &str) -> String {
        format!("{}/{}", self.label, relative_path)
    }
}

/// Label each root, suffixing `-2`, `-3`, ... when a name is already taken.
/// `reserved` (the manifest sidecar name) is never handed out as-is.
pub fn label_roots(sources: Vec<PathBuf>, reserved: &str) -> Vec<SourceRoot> {
    let mut taken = HashSet::from([reserved.to_string()]);
    sources
        .into_iter()
        .map(|path| {
            let mut root = SourceRoot::new(path);
            let base = root.label.clone();
            let mut n = 1;
            while !taken.insert(root.label.clone()) {
                n += 1;
                root.label = format!("{}-{}", base, n);
            }
            root
        })
        .collect()
}

/// A file selected for backup, tagged with the root it came from.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub file: FileInfo,
    pub source_root: PathBuf,
    pub unique_path: String,
    pub reason: ChangeReason,
}

/// Result of classifying one source root
#[derive(Debug, Default)]
pub struct Detection {
    pub to_backup: Vec<Candidate>,
    pub unchanged: usize,
}

impl Detection {
    pub fn to_backup_bytes(&self) -> u64 {
        self.to_backup.iter().map(|c| c.file.size).sum()
    }

    /// Concatenate another root's detection onto this one
    pub fn merge(&mut self, other: Detection) {
        self.to_backup.extend(other.to_backup);
        self.unchanged += other.unchanged;
    }
}

/// Walk `root` and classify every file against `mode`.
pub fn detect_changes(
    root: &SourceRoot,
    walk: &WalkOptions,
    mode: DetectMode<'_>,
) -> std::io::Result<Detection> {
    let files = walk_source(&root.path, walk)?;
    Ok(classify(files, root, mode))
}

/// Classify already-discovered files of one root.
pub fn classify(files: Vec<FileInfo>, root: &SourceRoot, mode: DetectMode<'_>) -> Detection {
    let baseline: Option<HashMap<&str, &FileEntry>> = match mode {
        DetectMode::Incremental(Some(manifest)) => Some(
            manifest
                .entries_for_root(&root.path)
                .filter(|e| !e.is_failed())
                .map(|e| (e.relative_path.as_str(), e))
                .collect(),
        ),
        _ => None,
    };

    let mut detection = Detection::default();
    for file in files {
        let reason = match (&mode, &baseline) {
            (DetectMode::Full, _) => Some(ChangeReason::Full),
            (_, None) => Some(ChangeReason::New),
            (_, Some(prior)) => match prior.get(file.relative_path.as_str()) {
                None => Some(ChangeReason::New),
                Some(entry) if is_modified(&file, entry) => Some(ChangeReason::Modified),
                Some(_) => None,
            },
        };

        match reason {
            Some(reason) => detection.to_backup.push(Candidate {
                unique_path: root.unique_path(&file.relative_path),
                source_root: root.path.clone(),
                file,
                reason,
            }),
            None => detection.unchanged += 1,
        }
    }
    detection
}

fn is_modified(file: &FileInfo, prior: &FileEntry) -> bool {
    file.size != prior.size || file.modified > prior.modified
}
