//! Data movement: the seal/open pipeline, hashing and progress reporting.

pub mod cipher;
pub mod hash;
pub mod pipeline;
pub mod progress;

pub use hash::{hash_file, HashingSink};
pub use pipeline::{Pipeline, SealSummary, TransformOptions};
pub use progress::{FileProgress, Progress, ProgressEvent};
