//! SceneForge State Layer
//!
//! Persisted, shared state of the render engine:
//! - [`FingerprintCache`]: request/state fingerprint → rendered media
//! - [`ConversationStore`]: bounded history with context summaries
//! - [`CurrentSlot`]: versioned current scene, single writer
//! - [`Workspace`]: on-disk layout, startup cleanup and reset
//!
//! All persistence is best effort. Write failures are logged and the
//! in-memory state stays authoritative; missing or corrupt files on load
//! yield empty state.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cache;
pub mod current;
pub mod error;
pub mod history;
pub mod workspace;

pub use cache::{CacheStats, FingerprintCache};
pub use current::{CurrentSlot, SceneSnapshot, SlotWrite};
pub use error::StoreError;
pub use history::{
    summarize_entries, ContextSummary, ConversationEntry, ConversationStore, IntentKind,
    DEFAULT_HISTORY_CAPACITY,
};
pub use workspace::Workspace;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
