use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation interrupted")]
    Interrupted,

    #[error("slot index out of range: {0}")]
    IndexOutOfRange(usize),

    #[error("index invariant violated: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, ShareError>;

/// Canonicalizes a path, returning the original if canonicalization fails.
///
/// Removal paths use this: the file may already be gone from disk, in which
/// case the caller-supplied path is assumed to be canonical already.
pub fn canonicalize_existing_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Strictly canonicalizes a path, returning `None` when it no longer resolves.
pub fn canonicalize_strict(path: &Path) -> Option<PathBuf> {
    fs::canonicalize(path).ok()
}
