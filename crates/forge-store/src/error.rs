//! Error types for persisted state
//!
//! Persistence is best effort: stores log these and carry on with their
//! in-memory state. They surface only from explicit maintenance calls.

use std::path::{Path, PathBuf};

/// Errors reading or writing persisted state
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error on a state path
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// State could not be encoded
    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),

    /// Persisted state exists but cannot be decoded
    #[error("corrupt state file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

impl StoreError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create corruption error for path
    pub fn corrupt(path: &Path, message: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// Write `contents` via a sibling temp file and rename
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io_error(parent, e))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| StoreError::io_error(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io_error(path, e))
}

/// Remove a file, treating "already gone" as success
pub(crate) async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io_error(path, e)),
    }
}
