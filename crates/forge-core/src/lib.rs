//! SceneForge Core - the render orchestrator
//!
//! Turns natural-language requests into rendered scenes:
//! - Drives the generation pipeline (intent, draft, critique, refinement)
//! - Validates generated sources for completeness
//! - Renders through the bounded, preempting process manager with repair
//! - Records history, the current scene and the fingerprint cache
//! - Streams ordered progress events to each client
//!
//! # Example
//!
//! ```rust,ignore
//! use forge_core::prelude::*;
//!
//! # async fn example(backend: Arc<dyn CompletionBackend>) -> Result<(), ForgeError> {
//! let engine = Arc::new(RenderOrchestrator::open(ForgeConfig::new(), backend).await?);
//! let (mut session, mut events) = Session::open(Arc::clone(&engine), ClientId::generate());
//!
//! session.dispatch(ClientMessage::Prompt { prompt: "a red circle".into() });
//! while let Some(event) = events.recv().await {
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod session;
pub mod types;

pub use config::ForgeConfig;
pub use context::{ContextReport, CurrentState, StateStatus};
pub use error::ForgeError;
pub use events::{
    ClientMessage, EventSink, ProgressStep, RequestEvent, ResultStatus, ServerEvent,
};
pub use orchestrator::RenderOrchestrator;
pub use pipeline::{PipelineStage, PipelineState};
pub use session::Session;
pub use types::{
    HealthStatus, RenderRequest, RequestId, SyncRenderRequest, SyncRenderResponse, Timing,
};

pub use forge_kernel::ClientId;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with SceneForge Core
    pub use crate::{
        ClientId, ClientMessage, ForgeConfig, ForgeError, RenderOrchestrator, RequestEvent,
        ServerEvent, Session, SyncRenderRequest, SyncRenderResponse,
    };
    pub use forge_llm::CompletionBackend;
    pub use std::sync::Arc;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
