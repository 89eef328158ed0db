//! Fingerprint result cache using moka
//!
//! Maps `Fingerprint(request, state)` to the reference of the media it
//! produced. The whole map is persisted as one JSON object after every
//! store; a missing or corrupt file yields an empty cache.
//!
//! The in-memory layer has no capacity bound, matching the persisted map.

use crate::error::{remove_if_exists, write_atomic, StoreError};
use forge_artifact::{ArtifactRef, Fingerprint};
use moka::future::Cache;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries in cache
    pub entry_count: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Persistent fingerprint → artifact cache
#[derive(Debug)]
pub struct FingerprintCache {
    inner: Cache<Fingerprint, ArtifactRef>,
    path: PathBuf,
    /// Serializes snapshot writes
    write_lock: Mutex<()>,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
}

impl FingerprintCache {
    /// Load the cache persisted at `path`
    ///
    /// Never fails: unreadable or corrupt state is logged and ignored.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = Self {
            inner: Cache::builder().build(),
            path,
            write_lock: Mutex::new(()),
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
        };

        match load_map(&cache.path).await {
            Ok(map) => {
                let count = map.len();
                for (fingerprint, artifact) in map {
                    cache.inner.insert(fingerprint, artifact).await;
                }
                tracing::debug!(entries = count, "fingerprint cache loaded");
            }
            Err(e) => tracing::warn!("starting with empty fingerprint cache: {e}"),
        }
        cache
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached artifact for `request` issued against `state`
    pub async fn lookup(&self, request: &str, state: &str) -> Option<ArtifactRef> {
        self.get(&Fingerprint::compute(request, state)).await
    }

    /// Cached artifact for a precomputed fingerprint
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<ArtifactRef> {
        use std::sync::atomic::Ordering;
        let found = self.inner.get(fingerprint).await;
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Record the artifact produced by `request` against `state` and persist
    pub async fn store(&self, request: &str, state: &str, artifact: ArtifactRef) -> Fingerprint {
        let fingerprint = Fingerprint::compute(request, state);
        self.insert(fingerprint, artifact).await;
        fingerprint
    }

    /// Insert under a precomputed fingerprint and persist
    pub async fn insert(&self, fingerprint: Fingerprint, artifact: ArtifactRef) {
        self.inner.insert(fingerprint, artifact).await;
        if let Err(e) = self.persist().await {
            tracing::warn!("failed to persist fingerprint cache: {e}");
        }
    }

    /// Write the current map to disk
    ///
    /// # Errors
    /// Returns the encode or IO error
    pub async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let snapshot: BTreeMap<String, String> = self
            .inner
            .iter()
            .map(|(fingerprint, artifact)| (fingerprint.to_string(), artifact.as_str().to_string()))
            .collect();
        let json = serde_json::to_vec_pretty(&snapshot)?;
        write_atomic(&self.path, &json).await
    }

    /// Drop every entry and the persisted file
    ///
    /// # Errors
    /// Returns the IO error if the file cannot be removed
    pub async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
        remove_if_exists(&self.path).await
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        use std::sync::atomic::Ordering;
        CacheStats {
            entry_count: self.inner.iter().count() as u64,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

async fn load_map(path: &Path) -> Result<BTreeMap<Fingerprint, ArtifactRef>, StoreError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(StoreError::io_error(path, e)),
    };
    let entries: BTreeMap<String, String> =
        serde_json::from_str(&raw).map_err(|e| StoreError::corrupt(path, e.to_string()))?;

    let mut map = BTreeMap::new();
    for (key, value) in entries {
        match key.parse::<Fingerprint>() {
            Ok(fingerprint) => {
                map.insert(fingerprint, ArtifactRef::new(value));
            }
            Err(e) => tracing::warn!(key = %key, "skipping cache entry with bad fingerprint: {e}"),
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_lookup_hits() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FingerprintCache::open(dir.path().join("cache.json")).await;
        assert!(cache.lookup("circle", "").await.is_none());

        cache
            .store("circle", "", ArtifactRef::new("/static/video_1.mp4"))
            .await;
        assert_eq!(
            cache.lookup("circle", "").await,
            Some(ArtifactRef::new("/static/video_1.mp4"))
        );
        assert!(cache.lookup("circle", "class A(Scene): pass").await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn persisted_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/cache.json");
        {
            let cache = FingerprintCache::open(&path).await;
            cache.store("square", "s", ArtifactRef::new("/static/a.mp4")).await;
        }
        let raw = std::fs::read_to_string(&path).unwrap();
        let map: BTreeMap<String, String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            map.get(&Fingerprint::compute("square", "s").to_string()).map(String::as_str),
            Some("/static/a.mp4")
        );

        let reopened = FingerprintCache::open(&path).await;
        assert_eq!(
            reopened.lookup("square", "s").await,
            Some(ArtifactRef::new("/static/a.mp4"))
        );
    }

    #[tokio::test]
    async fn corrupt_file_yields_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let cache = FingerprintCache::open(&path).await;
        assert_eq!(cache.stats().entry_count, 0);
        cache.store("x", "", ArtifactRef::new("/static/x.mp4")).await;
        assert!(cache.lookup("x", "").await.is_some());
    }

    #[tokio::test]
    async fn clear_removes_entries_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = FingerprintCache::open(&path).await;
        cache.store("x", "", ArtifactRef::new("/static/x.mp4")).await;
        assert!(path.exists());

        cache.clear().await.unwrap();
        assert!(cache.lookup("x", "").await.is_none());
        assert!(!path.exists());
    }
}
