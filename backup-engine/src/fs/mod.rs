//! File system access: source discovery.

pub mod walker;

pub use walker::{walk_source, FileInfo, WalkOptions};
