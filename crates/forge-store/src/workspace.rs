//! On-disk layout
//!
//! ```text
//! <root>/state/   cache.json, history.json, current_scene.py
//! <root>/work/    req_<id>/ per-request scratch, swept when a server starts
//! <root>/media/   rendered media, served under the public prefix
//! ```

use crate::error::StoreError;
use std::path::{Path, PathBuf};

/// Directory layout under one data root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create any missing directories, leaving existing content alone
    ///
    /// Safe to call while another process serves from the same root.
    ///
    /// # Errors
    /// Returns the IO error if a directory cannot be created
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let workspace = Self::new(root);
        for dir in [workspace.state_dir(), workspace.media_dir(), workspace.work_dir()] {
            create_dir(&dir).await?;
        }
        tracing::debug!(root = %workspace.root.display(), "workspace opened");
        Ok(workspace)
    }

    /// Open the layout and sweep stale per-request scratch space
    ///
    /// Media and state survive. Only the process that owns the root (the
    /// server, at startup) should do this.
    ///
    /// # Errors
    /// Returns the IO error if a directory cannot be created or wiped
    pub async fn prepare(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let workspace = Self::open(root).await?;
        workspace.sweep_scratch().await?;
        Ok(workspace)
    }

    /// Remove every per-request scratch directory
    ///
    /// # Errors
    /// Returns the IO error if the work directory cannot be wiped
    pub async fn sweep_scratch(&self) -> Result<(), StoreError> {
        empty_dir(&self.work_dir()).await?;
        tracing::debug!(root = %self.root.display(), "scratch space swept");
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.root.join("work")
    }

    #[must_use]
    pub fn media_dir(&self) -> PathBuf {
        self.root.join("media")
    }

    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.state_dir().join("cache.json")
    }

    #[must_use]
    pub fn history_path(&self) -> PathBuf {
        self.state_dir().join("history.json")
    }

    #[must_use]
    pub fn current_path(&self) -> PathBuf {
        self.state_dir().join("current_scene.py")
    }

    /// Create the scratch directory for one request
    ///
    /// # Errors
    /// Returns the IO error if the directory cannot be created
    pub async fn request_dir(&self, request_id: &str) -> Result<PathBuf, StoreError> {
        let dir = self.work_dir().join(format!("req_{request_id}"));
        create_dir(&dir).await?;
        Ok(dir)
    }

    /// Remove a request's scratch directory; failures are logged
    pub async fn release_request_dir(&self, dir: &Path) {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = %dir.display(), "failed to clean request directory: {e}");
            }
        }
    }

    /// Delete all rendered media and scratch space
    ///
    /// # Errors
    /// Returns the IO error if a directory cannot be wiped
    pub async fn reset(&self) -> Result<(), StoreError> {
        empty_dir(&self.media_dir()).await?;
        empty_dir(&self.work_dir()).await?;
        Ok(())
    }
}

async fn create_dir(dir: &Path) -> Result<(), StoreError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StoreError::io_error(dir, e))
}

/// Remove `dir` with its contents and recreate it empty
async fn empty_dir(dir: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(StoreError::io_error(dir, e)),
    }
    create_dir(dir).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prepare_wipes_work_but_keeps_media_and_state() {
        let root = tempfile::tempdir().unwrap();
        let first = Workspace::prepare(root.path()).await.unwrap();
        let req = first.request_dir("abc").await.unwrap();
        std::fs::write(req.join("scene.py"), "x").unwrap();
        std::fs::write(first.media_dir().join("video_1.mp4"), "x").unwrap();
        std::fs::write(first.history_path(), "[]").unwrap();

        let second = Workspace::prepare(root.path()).await.unwrap();
        assert!(!req.exists());
        assert!(second.work_dir().exists());
        assert!(second.media_dir().join("video_1.mp4").exists());
        assert!(second.history_path().exists());
    }

    #[tokio::test]
    async fn open_keeps_in_flight_request_dirs() {
        let root = tempfile::tempdir().unwrap();
        let serving = Workspace::prepare(root.path()).await.unwrap();
        let req = serving.request_dir("live").await.unwrap();
        std::fs::write(req.join("scene.py"), "x").unwrap();

        let second = Workspace::open(root.path()).await.unwrap();
        Workspace::open(root.path()).await.unwrap();
        assert!(req.join("scene.py").exists());
        assert_eq!(second.work_dir(), serving.work_dir());

        serving.sweep_scratch().await.unwrap();
        assert!(!req.exists());
        assert!(serving.work_dir().exists());
    }

    #[tokio::test]
    async fn reset_deletes_media() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::prepare(root.path()).await.unwrap();
        std::fs::write(workspace.media_dir().join("video_1.mp4"), "x").unwrap();

        workspace.reset().await.unwrap();
        assert!(workspace.media_dir().exists());
        assert!(!workspace.media_dir().join("video_1.mp4").exists());
    }

    #[tokio::test]
    async fn release_request_dir_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::prepare(root.path()).await.unwrap();
        let dir = workspace.request_dir("r1").await.unwrap();
        workspace.release_request_dir(&dir).await;
        workspace.release_request_dir(&dir).await;
        assert!(!dir.exists());
    }
}
