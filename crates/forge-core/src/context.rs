//! Generation context
//!
//! What the prompts know about the world: a structural view of the current
//! scene, and the report combining it with recent history.

use forge_artifact::{bounded_head, scan_static_objects, IntrospectedObject, SceneAnalysis};
use forge_store::{ContextSummary, ConversationEntry, SceneSnapshot};
use serde::{Deserialize, Serialize};

/// Characters of the current source quoted into prompts
pub const CODE_PREVIEW_LIMIT: usize = 500;

/// Entries listed in a context report
pub const REPORT_ENTRIES: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStatus {
    #[default]
    NoCode,
    HasCode,
}

/// Structural view of the current scene
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentState {
    pub status: StateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<SceneAnalysis>,
    pub objects: Vec<String>,
    pub object_count: usize,
    pub has_axes: bool,
}

impl CurrentState {
    #[must_use]
    pub fn analyze(snapshot: &SceneSnapshot) -> Self {
        if snapshot.is_empty() {
            return Self::default();
        }
        let source = snapshot.state_text();
        let analysis = SceneAnalysis::analyze(source);
        let objects: Vec<String> = scan_static_objects(source)
            .iter()
            .map(IntrospectedObject::descriptor)
            .collect();
        Self {
            status: StateStatus::HasCode,
            code_preview: Some(bounded_head(source, CODE_PREVIEW_LIMIT)),
            object_count: objects.len(),
            has_axes: analysis.has_axes,
            analysis: Some(analysis),
            objects,
        }
    }
}

/// Snapshot of the engine's conversational context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextReport {
    pub summary: ContextSummary,
    pub current_state: CurrentState,
    /// Newest entries, oldest first
    pub recent: Vec<ConversationEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_slot_has_no_code() {
        let state = CurrentState::analyze(&SceneSnapshot::default());
        assert_eq!(state, CurrentState::default());
        assert_eq!(state.status, StateStatus::NoCode);
    }

    #[test]
    fn analyses_current_source() {
        let source = "from manim import *\n\nclass Plot(Scene):\n    def construct(self):\n        axes = Axes()\n        dot = Dot()\n        self.add(axes, dot)\n";
        let state = CurrentState::analyze(&SceneSnapshot {
            version: 3,
            source: Some(source.to_string()),
        });
        assert_eq!(state.status, StateStatus::HasCode);
        assert!(state.has_axes);
        assert_eq!(state.object_count, 2);
        assert_eq!(
            state.analysis.and_then(|a| a.scene_class).as_deref(),
            Some("Plot")
        );
        assert_eq!(state.code_preview.as_deref(), Some(source));
    }

    #[test]
    fn preview_is_bounded() {
        let source = format!("class Big(Scene):\n    def construct(self):\n{}", "        x = 1\n".repeat(100));
        let state = CurrentState::analyze(&SceneSnapshot {
            version: 1,
            source: Some(source),
        });
        let preview = state.code_preview.unwrap();
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), CODE_PREVIEW_LIMIT + 3);
    }
}
