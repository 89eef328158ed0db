//! Event channel payloads
//!
//! Clients send [`ClientMessage`]s and receive, per request, zero or more
//! progress events, at most one preview, then exactly one result or error.
//! Every event goes out as a [`RequestEvent`] naming its request, so a
//! client with overlapping requests can tell their streams apart.

use crate::types::{RequestId, Timing};
use forge_artifact::ArtifactRef;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Natural-language request through the full pipeline
    Prompt { prompt: String },
    /// Render the given source as is
    RenderCode { code: String },
    /// Rewrite the given source according to an instruction, without rendering
    ModifyCode { code: String, instruction: String },
}

/// Pipeline step named in progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    Init,
    Intent,
    Generator,
    Analyzer,
    Improver,
    Preview,
    Render,
    /// Source modification
    Ai,
}

/// Status of a result event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
}

/// Outbound event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Progress {
        step: ProgressStep,
        message: String,
    },
    Preview {
        url: ArtifactRef,
        message: String,
    },
    Result {
        status: ResultStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        video: Option<ArtifactRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timing: Option<Timing>,
        /// Served from the fingerprint cache
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        cached: bool,
        /// The current scene had moved on since this request started
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        stale_base: bool,
        /// The backend was unreachable and the current scene was rendered
        /// unchanged; nothing was cached or published
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        degraded: bool,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl ServerEvent {
    #[must_use]
    pub fn progress(step: ProgressStep, message: impl Into<String>) -> Self {
        Self::Progress {
            step,
            message: message.into(),
        }
    }

    /// Successful result carrying only a source
    #[must_use]
    pub fn code_result(code: impl Into<String>) -> Self {
        Self::Result {
            status: ResultStatus::Success,
            video: None,
            code: Some(code.into()),
            timing: None,
            cached: false,
            stale_base: false,
            degraded: false,
        }
    }

    /// Successful result carrying a rendered video
    #[must_use]
    pub fn video_result(video: ArtifactRef, code: impl Into<String>) -> Self {
        Self::Result {
            status: ResultStatus::Success,
            video: Some(video),
            code: Some(code.into()),
            timing: None,
            cached: false,
            stale_base: false,
            degraded: false,
        }
    }

    /// Result served from the fingerprint cache
    #[must_use]
    pub fn cached_result(video: ArtifactRef) -> Self {
        Self::Result {
            status: ResultStatus::Success,
            video: Some(video),
            code: None,
            timing: None,
            cached: true,
            stale_base: false,
            degraded: false,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>, details: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            details,
        }
    }

    /// Whether this event ends a request's stream
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Error { .. })
    }
}

/// An outbound event stamped with its request
///
/// On the wire the request id sits beside the event's own fields:
/// `{"request_id": "...", "type": "progress", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub request_id: RequestId,
    #[serde(flatten)]
    pub event: ServerEvent,
}

impl RequestEvent {
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.event.is_terminal()
    }
}

/// Sending half of one request's event stream
///
/// A closed receiver means the client went away; the request still runs to
/// completion so state stays consistent, and further events are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    request: RequestId,
    tx: mpsc::UnboundedSender<RequestEvent>,
}

impl EventSink {
    #[must_use]
    pub fn new(request: RequestId, tx: mpsc::UnboundedSender<RequestEvent>) -> Self {
        Self { request, tx }
    }

    /// Sink paired with a fresh receiver
    #[must_use]
    pub fn channel(request: RequestId) -> (Self, mpsc::UnboundedReceiver<RequestEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(request, tx), rx)
    }

    #[inline]
    #[must_use]
    pub fn request(&self) -> RequestId {
        self.request
    }

    pub fn send(&self, event: ServerEvent) {
        let event = RequestEvent {
            request_id: self.request,
            event,
        };
        if self.tx.send(event).is_err() {
            tracing::debug!(request = %self.request, "event receiver closed; dropping event");
        }
    }

    pub fn progress(&self, step: ProgressStep, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(request = %self.request, ?step, "{message}");
        self.send(ServerEvent::progress(step, message));
    }
}
