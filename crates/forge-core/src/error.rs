//! Error types for the orchestrator
//!
//! [`ForgeError`] folds the leaf crates' errors into one type and sorts
//! them into the classes the pipeline reacts to:
//! - transient completion failures degrade a stage
//! - execution failures spend the repair budget
//! - admission and preemption failures end the request immediately

use forge_artifact::bounded_tail;
use forge_kernel::ProcessError;
use forge_llm::LlmError;
use forge_store::StoreError;
use std::path::PathBuf;

/// Main orchestrator error type
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    /// Completion backend failed
    #[error("completion failed: {0}")]
    Llm(#[from] LlmError),

    /// Render process failed
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Renderer exited cleanly but left no media behind
    #[error("render finished but no media file was produced")]
    MissingMedia,

    /// Persistent state could not be read or written
    #[error("state error: {0}")]
    Store(#[from] StoreError),

    /// Scratch or media file operation failed
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl ForgeError {
    /// Create IO error with path context
    #[inline]
    #[must_use]
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a regenerated source could fix this failure
    #[inline]
    #[must_use]
    pub fn is_repairable(&self) -> bool {
        match self {
            Self::Process(e) => e.is_repairable(),
            Self::MissingMedia => true,
            _ => false,
        }
    }

    /// Whether the request ended because a newer one from the same client
    /// took over
    #[inline]
    #[must_use]
    pub fn is_preempted(&self) -> bool {
        matches!(self, Self::Process(ProcessError::Preempted { .. }))
    }

    /// User-facing message for an error event
    #[must_use]
    pub fn headline(&self) -> &'static str {
        match self {
            Self::Process(ProcessError::Busy { .. }) => "render capacity exhausted, try again shortly",
            Self::Process(ProcessError::Preempted { .. }) => "render superseded by a newer request",
            Self::Process(_) | Self::MissingMedia => "render failed",
            Self::Llm(_) => "completion backend failed",
            Self::Store(_) | Self::Io { .. } | Self::Config(_) => "internal error",
        }
    }

    /// Diagnostic text bounded to `limit` characters
    #[must_use]
    pub fn diagnostic(&self, limit: usize) -> String {
        let text = match self {
            Self::Process(e) => e.diagnostic(),
            other => other.to_string(),
        };
        bounded_tail(&text, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn execution_failures_are_repairable() {
        let exit = ForgeError::from(ProcessError::NonZeroExit {
            code: Some(1),
            stderr_tail: "NameError".into(),
        });
        let timeout = ForgeError::from(ProcessError::TimedOut {
            after: Duration::from_secs(300),
            stderr_tail: String::new(),
        });
        assert!(exit.is_repairable());
        assert!(timeout.is_repairable());
        assert!(ForgeError::MissingMedia.is_repairable());
    }

    #[test]
    fn admission_and_preemption_are_terminal() {
        let busy = ForgeError::from(ProcessError::Busy { limit: 8 });
        let preempted = ForgeError::from(ProcessError::Preempted {
            stderr_tail: String::new(),
        });
        assert!(!busy.is_repairable());
        assert!(!preempted.is_repairable());
        assert!(preempted.is_preempted());
        assert!(ForgeError::Config("bad".into()).headline().contains("internal"));
    }

    #[test]
    fn diagnostic_is_bounded_to_the_tail() {
        let err = ForgeError::from(ProcessError::NonZeroExit {
            code: Some(1),
            stderr_tail: format!("{}NameError: x", "a".repeat(600)),
        });
        let diagnostic = err.diagnostic(20);
        assert_eq!(diagnostic.chars().count(), 20);
        assert!(diagnostic.ends_with("NameError: x"));
    }
}
