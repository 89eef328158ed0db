//! Current scene slot
//!
//! Process-wide single-writer slot holding the most recently rendered
//! source, with a version counter. Requests snapshot `(version, source)` at
//! start; a successful render publishes against the version it started
//! from. The write always lands (last writer wins), but reports whether the
//! base was stale so callers can surface that the write superseded work
//! they never saw.

use crate::error::{remove_if_exists, write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Immutable view of the slot at one moment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub version: u64,
    pub source: Option<String>,
}

impl SceneSnapshot {
    /// Source text, empty when nothing has been rendered yet
    #[inline]
    #[must_use]
    pub fn state_text(&self) -> &str {
        self.source.as_deref().unwrap_or("")
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.source.as_deref().map_or(true, |s| s.trim().is_empty())
    }
}

/// Outcome of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotWrite {
    /// Version after the write
    pub version: u64,
    /// The slot had moved past the writer's base version
    pub stale_base: bool,
}

/// Versioned current-scene slot persisted to a single file
#[derive(Debug)]
pub struct CurrentSlot {
    path: PathBuf,
    state: Mutex<SceneSnapshot>,
}

impl CurrentSlot {
    /// Load the slot persisted at `path`
    ///
    /// A persisted source starts at version 1; an empty slot at version 0.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(source) if !source.trim().is_empty() => SceneSnapshot {
                version: 1,
                source: Some(source),
            },
            Ok(_) => SceneSnapshot::default(),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), "cannot read current scene: {e}");
                }
                SceneSnapshot::default()
            }
        };
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current `(version, source)`
    pub async fn snapshot(&self) -> SceneSnapshot {
        self.state.lock().await.clone()
    }

    /// Replace the source, reporting whether `base_version` was stale
    pub async fn publish(&self, base_version: u64, source: impl Into<String>) -> SlotWrite {
        let source = source.into();
        let mut state = self.state.lock().await;
        let stale_base = state.version != base_version;
        if stale_base {
            tracing::warn!(
                base = base_version,
                current = state.version,
                "current scene changed since this request started; overwriting"
            );
        }
        state.version += 1;
        state.source = Some(source);

        if let Some(source) = &state.source {
            if let Err(e) = write_atomic(&self.path, source.as_bytes()).await {
                tracing::warn!("failed to persist current scene: {e}");
            }
        }

        SlotWrite {
            version: state.version,
            stale_base,
        }
    }

    /// Empty the slot and delete the persisted file
    ///
    /// # Errors
    /// Returns the IO error if the file cannot be removed
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.version += 1;
        state.source = None;
        remove_if_exists(&self.path).await
    }
}
