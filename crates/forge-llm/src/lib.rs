//! SceneForge completion backends
//!
//! - [`CompletionBackend`]: the text-completion capability the pipeline drives
//! - [`OpenAiCompatibleClient`]: HTTP client for `/chat/completions` endpoints
//!
//! # Example
//!
//! ```rust,ignore
//! use forge_llm::{CompletionBackend, CompletionRequest, LlmConfig, OpenAiCompatibleClient};
//!
//! let client = OpenAiCompatibleClient::new(LlmConfig::default().with_api_key(key))?;
//! let reply = client
//!     .complete(CompletionRequest::new("You write scenes.", "a red circle").with_temperature(0.7))
//!     .await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod backend;
mod openai;

pub use backend::{ChatMessage, CompletionBackend, CompletionRequest, LlmError, Role};
pub use openai::{LlmConfig, OpenAiCompatibleClient};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
