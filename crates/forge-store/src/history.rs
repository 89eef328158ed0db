//! Conversation store
//!
//! Bounded ring of past requests and their outcomes, persisted as pretty
//! JSON after every append. Summaries over the most recent entries feed
//! the generation prompts as context.

use crate::error::{remove_if_exists, write_atomic, StoreError};
use chrono::{DateTime, Utc};
use forge_artifact::{ArtifactRef, IntrospectedObject, SceneAnalysis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Default number of retained entries
pub const DEFAULT_HISTORY_CAPACITY: usize = 15;

/// Coarse classification of what a request asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Add,
    Modify,
    New,
    Other,
}

const ADD_KEYWORDS: &[&str] = &["添加", "再加", "增加", "add ", "also ", "another "];
const MODIFY_KEYWORDS: &[&str] = &["修改", "改变", "改成", "modify", "change", "make it", "turn "];
const NEW_KEYWORDS: &[&str] = &["新建", "创建", "重新", "new ", "create", "start over"];

impl IntentKind {
    /// Substring-based guess; a hint only
    #[must_use]
    pub fn classify(request: &str) -> Self {
        let text = format!("{} ", request.to_lowercase());
        let has = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));
        if has(ADD_KEYWORDS) {
            Self::Add
        } else if has(MODIFY_KEYWORDS) {
            Self::Modify
        } else if has(NEW_KEYWORDS) {
            Self::New
        } else {
            Self::Other
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Modify => "modify",
            Self::New => "new",
            Self::Other => "other",
        }
    }
}

/// One completed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub timestamp: DateTime<Utc>,
    pub request_text: String,
    /// Final source (the last attempt when the request failed)
    #[serde(default)]
    pub final_artifact: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<ArtifactRef>,
    #[serde(default)]
    pub introspected_objects: Vec<IntrospectedObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_summary: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critique: Option<String>,
    #[serde(default)]
    pub analysis: SceneAnalysis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Milliseconds spent per stage
    #[serde(default)]
    pub timing: BTreeMap<String, u64>,
}

impl ConversationEntry {
    /// Entry for `request_text`, stamped now, not yet successful
    #[must_use]
    pub fn new(request_text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            request_text: request_text.into(),
            final_artifact: String::new(),
            success: false,
            artifact_ref: None,
            introspected_objects: Vec::new(),
            intent_summary: None,
            draft_excerpt: None,
            critique: None,
            analysis: SceneAnalysis::default(),
            error: None,
            timing: BTreeMap::new(),
        }
    }

    /// Set the final source and its structural analysis
    #[must_use]
    pub fn with_artifact(mut self, source: impl Into<String>) -> Self {
        self.final_artifact = source.into();
        self.analysis = SceneAnalysis::analyze(&self.final_artifact);
        self
    }

    #[must_use]
    pub fn succeeded(mut self, artifact_ref: ArtifactRef, objects: Vec<IntrospectedObject>) -> Self {
        self.success = true;
        self.artifact_ref = Some(artifact_ref);
        self.introspected_objects = objects;
        self.error = None;
        self
    }

    #[must_use]
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn intent(&self) -> IntentKind {
        IntentKind::classify(&self.request_text)
    }
}

/// Derived context over recent entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSummary {
    /// Prompt-ready text; empty when there is no history
    pub text: String,
    /// Object descriptors, deduplicated, first-seen order
    pub objects: Vec<String>,
    pub uses_axes: bool,
    pub intent_tally: BTreeMap<IntentKind, usize>,
    pub entries_considered: usize,
}

impl ContextSummary {
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries_considered == 0
    }
}

/// Bounded, persisted conversation history
#[derive(Debug)]
pub struct ConversationStore {
    path: PathBuf,
    capacity: usize,
    entries: Mutex<VecDeque<ConversationEntry>>,
}

impl ConversationStore {
    /// Load the history persisted at `path`, keeping at most `capacity`
    /// newest entries
    ///
    /// Never fails: unreadable or corrupt state is logged and ignored.
    pub async fn open(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let capacity = capacity.max(1);
        let mut entries = match load_entries(&path).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("starting with empty conversation history: {e}");
                VecDeque::new()
            }
        };
        while entries.len() > capacity {
            entries.pop_front();
        }
        Self {
            path,
            capacity,
            entries: Mutex::new(entries),
        }
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append, evicting the oldest entries beyond capacity, then persist
    pub async fn append(&self, entry: ConversationEntry) {
        let mut entries = self.entries.lock().await;
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        if let Err(e) = persist(&self.path, &entries).await {
            tracing::warn!("failed to persist conversation history: {e}");
        }
    }

    /// All entries, oldest first
    pub async fn load(&self) -> Vec<ConversationEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }

    /// The `n` newest entries, oldest first
    pub async fn recent(&self, n: usize) -> Vec<ConversationEntry> {
        let entries = self.entries.lock().await;
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Summarise the `last_k` newest entries
    pub async fn summarize(&self, last_k: usize) -> ContextSummary {
        summarize_entries(&self.recent(last_k).await)
    }

    /// Drop every entry and the persisted file
    ///
    /// # Errors
    /// Returns the IO error if the file cannot be removed
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.clear();
        remove_if_exists(&self.path).await
    }
}

/// Build a summary from entries given oldest first
#[must_use]
pub fn summarize_entries(entries: &[ConversationEntry]) -> ContextSummary {
    let mut summary = ContextSummary {
        entries_considered: entries.len(),
        ..ContextSummary::default()
    };
    if entries.is_empty() {
        return summary;
    }

    let mut lines = vec![format!("Recent conversation (last {}):", entries.len())];
    for (idx, entry) in entries.iter().enumerate() {
        let intent = entry.intent();
        *summary.intent_tally.entry(intent).or_insert(0) += 1;

        let descriptors: Vec<String> = entry
            .introspected_objects
            .iter()
            .map(IntrospectedObject::descriptor)
            .collect();
        for descriptor in &descriptors {
            if !summary.objects.contains(descriptor) {
                summary.objects.push(descriptor.clone());
            }
        }
        summary.uses_axes |= entry.analysis.has_axes;

        let outcome = if entry.success { "success" } else { "failed" };
        let mut line = format!(
            "{}. [{}] \"{}\" -> {}",
            idx + 1,
            intent.as_str(),
            entry.request_text.trim(),
            outcome
        );
        if !descriptors.is_empty() {
            line.push_str(&format!(" (objects: {})", descriptors.join(", ")));
        }
        lines.push(line);
    }

    if !summary.objects.is_empty() {
        lines.push(format!("Objects on screen: {}", summary.objects.join(", ")));
    }
    if summary.uses_axes {
        lines.push("Style: uses coordinate axes".to_string());
    }
    summary.text = lines.join("\n");
    summary
}

async fn load_entries(path: &Path) -> Result<VecDeque<ConversationEntry>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::corrupt(path, e.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(VecDeque::new()),
        Err(e) => Err(StoreError::io_error(path, e)),
    }
}

async fn persist(path: &Path, entries: &VecDeque<ConversationEntry>) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(entries)?;
    write_atomic(path, &json).await
}
