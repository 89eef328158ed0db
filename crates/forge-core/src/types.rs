//! Core types for the orchestrator
//!
//! Defines the request-side types:
//! - Request identity and the immutable [`RenderRequest`]
//! - Stage timing reported with results
//! - The synchronous render and health probe payloads

use chrono::{DateTime, Utc};
use forge_artifact::ArtifactRef;
use forge_kernel::ClientId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;
use ulid::Ulid;

/// Unique request identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Ulid);

impl RequestId {
    /// Generate new request ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Stem of the media files this request produces
    #[must_use]
    pub fn output_stem(&self) -> String {
        format!("video_{self}")
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_string().to_lowercase())
    }
}

/// One natural-language request, immutable once submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub id: RequestId,
    pub client_id: ClientId,
    pub intent_text: String,
    pub submitted_at: DateTime<Utc>,
}

impl RenderRequest {
    #[must_use]
    pub fn new(client_id: ClientId, intent_text: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            client_id,
            intent_text: intent_text.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// Seconds spent in the generation stages and overall
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub generator: f64,
    pub analyzer: f64,
    pub improver: f64,
    pub total: f64,
}

impl Timing {
    /// Same figures in whole milliseconds, keyed by stage
    #[must_use]
    pub fn as_millis(&self) -> BTreeMap<String, u64> {
        [
            ("generator", self.generator),
            ("analyzer", self.analyzer),
            ("improver", self.improver),
            ("total", self.total),
        ]
        .into_iter()
        .map(|(stage, secs)| {
            let millis = Duration::try_from_secs_f64(secs).map_or(0, |d| d.as_millis());
            (stage.to_string(), u64::try_from(millis).unwrap_or(u64::MAX))
        })
        .collect()
    }
}

/// Synchronous render of a given source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRenderRequest {
    pub code: String,
    /// Scopes preemption; a fresh id is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
}

impl SyncRenderRequest {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            client_id: None,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: ClientId) -> Self {
        self.client_id = Some(client);
        self
    }
}

/// Outcome of a synchronous render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyncRenderResponse {
    Success {
        #[serde(rename = "videoUrl")]
        video_url: ArtifactRef,
        /// Standard base64 of the media file
        #[serde(rename = "videoBase64")]
        video_base64: String,
    },
    Failure {
        /// Bounded diagnostic
        error: String,
    },
}

impl SyncRenderResponse {
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Liveness probe payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    pub live_renders: usize,
    pub max_live_renders: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn output_stem_uses_lowercase_id() {
        let id = RequestId::new();
        let stem = id.output_stem();
        assert!(stem.starts_with("video_"));
        assert_eq!(stem, stem.to_lowercase());
    }

    #[test]
    fn timing_converts_to_millis() {
        let timing = Timing {
            generator: 1.5,
            analyzer: 0.25,
            improver: 0.0,
            total: 2.0,
        };
        let millis = timing.as_millis();
        assert_eq!(millis["generator"], 1500);
        assert_eq!(millis["analyzer"], 250);
        assert_eq!(millis["total"], 2000);
    }

    #[test]
    fn sync_response_serializes_like_the_http_api() {
        let ok = SyncRenderResponse::Success {
            video_url: ArtifactRef::new("/static/video_1.mp4"),
            video_base64: "TVA0".into(),
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["videoUrl"], "/static/video_1.mp4");
        assert_eq!(json["videoBase64"], "TVA0");

        let failed: SyncRenderResponse =
            serde_json::from_str(r#"{"error":"NameError"}"#).unwrap();
        assert!(!failed.is_success());
    }
}
