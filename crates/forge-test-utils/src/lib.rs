//! Testing utilities for the SceneForge workspace
//!
//! Shared fixtures: a scripted completion backend, fake renderer scripts and
//! canned scene sources.

#![allow(missing_docs)]

use async_trait::async_trait;
use forge_llm::{CompletionBackend, CompletionRequest, LlmError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A complete scene that passes the completeness gate
pub const VALID_SCENE: &str = "from manim import *

class MathScene(Scene):
    def construct(self):
        circle = Circle(color=RED)
        self.play(Create(circle))
        self.wait(1)
";

/// A second complete scene, distinct from [`VALID_SCENE`]
pub const SQUARE_SCENE: &str = "from manim import *

class MathScene(Scene):
    def construct(self):
        square = Square(color=BLUE)
        self.play(Create(square))
        self.wait(1)
";

/// Wrap code in a python fence the way completion replies usually do
#[must_use]
pub fn fenced(code: &str) -> String {
    format!("Here is the scene:\n```python\n{code}\n```\n")
}

/// One reply of a [`ScriptedBackend`]
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail,
}

/// Completion backend that replays scripted replies and records requests
///
/// When the script runs out, every further call returns the fallback reply
/// (a fenced [`VALID_SCENE`] by default).
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    replies: Arc<Mutex<VecDeque<ScriptedReply>>>,
    calls: Arc<Mutex<Vec<CompletionRequest>>>,
    fallback: Arc<Mutex<ScriptedReply>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            fallback: Arc::new(Mutex::new(ScriptedReply::Text(fenced(VALID_SCENE)))),
        }
    }

    /// Backend that always answers with `reply`
    #[must_use]
    pub fn always(reply: impl Into<String>) -> Self {
        let backend = Self::new();
        *backend.fallback.lock() = ScriptedReply::Text(reply.into());
        backend
    }

    /// Backend whose every call fails
    #[must_use]
    pub fn failing() -> Self {
        let backend = Self::new();
        *backend.fallback.lock() = ScriptedReply::Fail;
        backend
    }

    /// Queue a reply
    #[must_use]
    pub fn then(self, reply: impl Into<String>) -> Self {
        self.replies.lock().push_back(ScriptedReply::Text(reply.into()));
        self
    }

    /// Queue a failure
    #[must_use]
    pub fn then_fail(self) -> Self {
        self.replies.lock().push_back(ScriptedReply::Fail);
        self
    }

    /// Number of calls made so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Every recorded request, in call order
    #[must_use]
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().clone()
    }

    /// Calls whose system prompt contains `marker`
    #[must_use]
    pub fn calls_with_system(&self, marker: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| {
                c.messages
                    .first()
                    .is_some_and(|m| m.content.contains(marker))
            })
            .count()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.calls.lock().push(request);
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone());
        match reply {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Fail => Err(LlmError::Request("scripted failure".to_string())),
        }
    }
}

/// Behaviour of a fake renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererMode {
    /// Write the media file (and the object dump when requested), exit 0
    Succeed,
    /// Print an error to stderr, exit 1
    Fail,
    /// Exit 0 without producing media
    SucceedWithoutMedia,
    /// Sleep for the given seconds, then behave like [`RendererMode::Succeed`]
    Sleep(u64),
    /// Fail the first `n` invocations, then succeed
    FailTimes(u32),
    /// Sleep for the given seconds on the first invocation only, then succeed
    SlowFirst(u64),
}

/// Shell script standing in for the renderer
///
/// Accepts the renderer's argument shape
/// (`<quality> --media_dir DIR -o STEM FILE SCENE [-s]`).
#[derive(Debug)]
pub struct FakeRenderer {
    dir: TempDir,
    script: PathBuf,
}

impl FakeRenderer {
    /// Write a fake renderer script
    ///
    /// # Panics
    /// Panics if the temp directory or script cannot be written
    #[must_use]
    pub fn new(mode: RendererMode) -> Self {
        let dir = tempfile::tempdir().expect("temp dir for fake renderer");
        let script = dir.path().join("fake_renderer.sh");
        let counter = dir.path().join("invocations");
        std::fs::write(&script, Self::script_body(mode, &counter)).expect("write fake renderer");
        Self { dir, script }
    }

    /// Program vector to configure as the render program
    #[must_use]
    pub fn program(&self) -> Vec<String> {
        vec!["/bin/sh".to_string(), self.script.display().to_string()]
    }

    /// How many times the script has run
    #[must_use]
    pub fn invocations(&self) -> u32 {
        std::fs::read_to_string(self.dir.path().join("invocations"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    fn script_body(mode: RendererMode, counter: &Path) -> String {
        let behaviour = match mode {
            RendererMode::Succeed => "produce".to_string(),
            RendererMode::Fail => "fail".to_string(),
            RendererMode::SucceedWithoutMedia => "exit 0".to_string(),
            RendererMode::Sleep(secs) => format!("sleep {secs}\nproduce"),
            RendererMode::FailTimes(n) => {
                format!("if [ \"$count\" -le {n} ]; then fail; fi\nproduce")
            }
            RendererMode::SlowFirst(secs) => {
                format!("if [ \"$count\" -le 1 ]; then sleep {secs}; fi\nproduce")
            }
        };
        format!(
            r##"#!/bin/sh
count=$(cat "{counter}" 2>/dev/null || echo 0)
count=$((count + 1))
echo "$count" > "{counter}"

media=""
stem=""
single=0
prev=""
for arg in "$@"; do
  case "$prev" in
    --media_dir) media="$arg" ;;
    -o) stem="$arg" ;;
  esac
  if [ "$arg" = "-s" ]; then single=1; fi
  prev="$arg"
done

fail() {{
  echo "Traceback (most recent call last):" >&2
  echo "NameError: name 'Circl' is not defined" >&2
  exit 1
}}

produce() {{
  if [ "$single" = "1" ]; then
    mkdir -p "$media/images/scene"
    printf 'PNG' > "$media/images/scene/$stem.png"
  else
    mkdir -p "$media/videos/scene/480p15"
    printf 'MP4DATA' > "$media/videos/scene/480p15/$stem.mp4"
    if [ -n "$FORGE_OBJECT_DUMP" ]; then
      printf '[{{"type": "Circle", "position": [0.0, 0.0, 0.0], "color": "#FC6255"}}]' > "$FORGE_OBJECT_DUMP"
    fi
  fi
  echo "File ready at $stem"
  exit 0
}}

{behaviour}
"##,
            counter = counter.display(),
        )
    }
}

/// Temporary data root for engine tests
#[derive(Debug)]
pub struct TempWorkspace {
    dir: TempDir,
}

impl TempWorkspace {
    /// # Panics
    /// Panics if the temp directory cannot be created
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp workspace"),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

impl Default for TempWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
