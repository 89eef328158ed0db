//! Rendered artifact references

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Public reference to a rendered media file (URL path or file path)
///
/// Opaque to the orchestrator: whatever the media directory is served under,
/// followed by the file name, e.g. `/static/video_01hx....mp4`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    /// Wrap an existing reference string
    #[inline]
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Build a reference from a public prefix and a file name
    #[must_use]
    pub fn under_prefix(prefix: &str, file_name: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self(format!("{prefix}/{file_name}"))
    }

    /// Borrow as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name component of the reference
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl Display for ArtifactRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ArtifactRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}
