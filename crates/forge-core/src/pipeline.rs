//! Per-request pipeline state
//!
//! ```text
//! Init → Intent → Draft → ValidateDraft → Critique → Refine → ValidateFinal
//!      → Preview → Render{0..=max_retries} → Done | Failed
//! ```
//!
//! Owned by a single request task and dropped when it terminates. Stages
//! only move forward; `Render` repeats with a growing attempt number.

use crate::types::Timing;
use forge_store::SceneSnapshot;
use std::fmt::{self, Display, Formatter};

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Init,
    Intent,
    Draft,
    ValidateDraft,
    Critique,
    Refine,
    ValidateFinal,
    Preview,
    Render { attempt: u32 },
    Done,
    Failed,
}

impl PipelineStage {
    const fn rank(self) -> u8 {
        match self {
            Self::Init => 0,
            Self::Intent => 1,
            Self::Draft => 2,
            Self::ValidateDraft => 3,
            Self::Critique => 4,
            Self::Refine => 5,
            Self::ValidateFinal => 6,
            Self::Preview => 7,
            Self::Render { .. } => 8,
            Self::Done | Self::Failed => 9,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `next` may follow `self`
    ///
    /// Stages may be skipped but never revisited, except `Render`, which
    /// may repeat with a higher attempt number. Terminal stages are final.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Self::Render { attempt: a }, Self::Render { attempt: b }) => b > a,
            _ => next.rank() > self.rank(),
        }
    }
}

impl Display for PipelineStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::Intent => f.write_str("intent"),
            Self::Draft => f.write_str("draft"),
            Self::ValidateDraft => f.write_str("validate_draft"),
            Self::Critique => f.write_str("critique"),
            Self::Refine => f.write_str("refine"),
            Self::ValidateFinal => f.write_str("validate_final"),
            Self::Preview => f.write_str("preview"),
            Self::Render { attempt } => write!(f, "render[{attempt}]"),
            Self::Done => f.write_str("done"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Working state of one request
#[derive(Debug, Clone)]
pub struct PipelineState {
    stage: PipelineStage,
    /// Current scene as seen at INIT; the cache key and publish base
    pub snapshot: SceneSnapshot,
    pub intent_summary: Option<serde_json::Value>,
    pub draft: String,
    pub critique: String,
    /// Source handed to the renderer; replaced by each repair
    pub refined: String,
    pub retry_count: u32,
    /// Neither draft nor refinement reached the backend, so the source is
    /// the scene seen at INIT
    pub degraded: bool,
    pub timing: Timing,
}

impl PipelineState {
    #[must_use]
    pub fn new(snapshot: SceneSnapshot) -> Self {
        Self {
            stage: PipelineStage::Init,
            snapshot,
            intent_summary: None,
            draft: String::new(),
            critique: String::new(),
            refined: String::new(),
            retry_count: 0,
            degraded: false,
            timing: Timing::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Move to `next`; backward moves are ignored and logged
    pub fn advance(&mut self, next: PipelineStage) {
        if self.stage.can_advance_to(next) {
            tracing::debug!(from = %self.stage, to = %next, "stage transition");
            self.stage = next;
            if let PipelineStage::Render { attempt } = next {
                self.retry_count = attempt;
            }
        } else {
            tracing::warn!(from = %self.stage, to = %next, "ignored backward stage transition");
        }
    }
}
