//! SceneForge Render Kernel
//!
//! Everything that touches the renderer process:
//! - [`ProcessManager`]: bounded-concurrency, per-client-preempting runner
//! - [`JobGroup`]: terminate a render and all its descendants
//! - [`RenderCommand`]: renderer command line, [`find_media`] for its output
//! - [`Introspector`]: observer wrapping and [`read_dump`] with static fallback
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use forge_kernel::prelude::*;
//!
//! let manager = ProcessManager::new(8);
//! let observed = Introspector::wrap(&source, "MathScene", &dump_path);
//! let command = RenderCommand::new(&program, &file, &observed.entry_point)
//!     .with_media_dir(&media)
//!     .with_output_stem("video_01");
//! let output = manager.run(&client, command, Duration::from_secs(300)).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod client;
pub mod command;
pub mod group;
pub mod introspect;
pub mod process;

pub use client::ClientId;
pub use command::{find_media, RenderCommand};
pub use group::{JobGroup, TERMINATE_GRACE};
pub use introspect::{read_dump, Introspector, ObservedArtifact, DUMP_PATH_ENV};
pub use process::{
    LiveRender, ProcessError, ProcessManager, ProcessOutput, ProcessStats,
    DEFAULT_DIAGNOSTIC_LIMIT, DEFAULT_MAX_LIVE,
};

/// Common imports
pub mod prelude {
    pub use crate::{
        find_media, read_dump, ClientId, Introspector, ObservedArtifact, ProcessError,
        ProcessManager, ProcessOutput, RenderCommand,
    };
    pub use std::time::Duration;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
