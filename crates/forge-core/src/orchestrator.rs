//! The render orchestrator
//!
//! Owns the shared engine state and drives each request through the
//! pipeline:
//! 1. Snapshot the current scene, answer from the fingerprint cache on a hit
//! 2. Intent, draft, critique and refinement completions, each degrading to
//!    the previous text when the backend fails
//! 3. Completeness checks on the draft and on the final source
//! 4. Best-effort single-frame preview
//! 5. Observed render with a bounded repair loop
//! 6. On success publish the scene, record history and cache the result
//!
//! A request is superseded when a newer render-bearing request arrives from
//! the same client: its live render process is killed by the
//! [`ProcessManager`], and if it is still generating, it stops before
//! rendering. A client's claim record lives only while it has requests in
//! flight.
//!
//! When the backend is unreachable for both the draft and the refinement,
//! the INIT scene is rendered as is and reported as degraded. Such a run
//! never reaches the cache, the current scene or a successful history entry.

use crate::config::ForgeConfig;
use crate::context::{ContextReport, CurrentState, REPORT_ENTRIES};
use crate::error::ForgeError;
use crate::events::{
    ClientMessage, EventSink, ProgressStep, RequestEvent, ResultStatus, ServerEvent,
};
use crate::pipeline::{PipelineStage, PipelineState};
use crate::prompts;
use crate::types::{
    HealthStatus, RenderRequest, RequestId, SyncRenderRequest, SyncRenderResponse,
};
use base64::Engine as _;
use chrono::Utc;
use forge_artifact::{
    bounded_head, extract_code_block, extract_json_array, extract_json_object, ArtifactRef,
    CompletenessGate, IntrospectedObject, SceneContract,
};
use forge_kernel::{
    find_media, read_dump, ClientId, Introspector, ProcessError, ProcessManager, RenderCommand,
    DUMP_PATH_ENV,
};
use forge_llm::{CompletionBackend, CompletionRequest, LlmError};
use forge_store::{ConversationEntry, ConversationStore, CurrentSlot, FingerprintCache, Workspace};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Characters of the first draft kept in history
const DRAFT_EXCERPT_LIMIT: usize = 500;

/// History note for a render of the unchanged scene
const DEGRADED_NOTE: &str = "completion backend unavailable; the current scene was rendered unchanged";

/// Supersession record of one client
#[derive(Debug)]
struct Claim {
    latest: RequestId,
    in_flight: usize,
}

/// Media published by a successful render
#[derive(Debug)]
struct RenderedMedia {
    artifact: ArtifactRef,
    path: PathBuf,
    objects: Vec<IntrospectedObject>,
}

/// The render-job orchestration engine
pub struct RenderOrchestrator {
    config: ForgeConfig,
    backend: Arc<dyn CompletionBackend>,
    processes: ProcessManager,
    cache: FingerprintCache,
    history: ConversationStore,
    current: CurrentSlot,
    workspace: Workspace,
    gate: CompletenessGate,
    /// Newest render-bearing request per client with requests in flight
    claims: Mutex<HashMap<ClientId, Claim>>,
}

impl std::fmt::Debug for RenderOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderOrchestrator")
            .field("backend", &self.backend.name())
            .field("workspace", &self.workspace)
            .field("processes", &self.processes)
            .finish_non_exhaustive()
    }
}

impl RenderOrchestrator {
    /// Open the workspace and load persisted state
    ///
    /// Scratch space of other processes on the same root is left alone; a
    /// serving process calls [`RenderOrchestrator::sweep_scratch`] once at
    /// startup.
    ///
    /// # Errors
    /// Returns [`ForgeError::Config`] for unusable settings and
    /// [`ForgeError::Store`] if the workspace directories cannot be created
    pub async fn open(
        config: ForgeConfig,
        backend: Arc<dyn CompletionBackend>,
    ) -> Result<Self, ForgeError> {
        config.validate()?;
        let workspace = Workspace::open(config.data_root.clone()).await?;
        let cache = FingerprintCache::open(workspace.cache_path()).await;
        let history = ConversationStore::open(workspace.history_path(), config.history_capacity).await;
        let current = CurrentSlot::open(workspace.current_path()).await;
        let processes = ProcessManager::new(config.max_live_renders)
            .with_diagnostic_limit(config.diagnostic_limit);

        tracing::info!(
            root = %workspace.root().display(),
            backend = backend.name(),
            max_live = config.max_live_renders,
            history = history.len().await,
            "render orchestrator ready"
        );

        Ok(Self {
            gate: CompletenessGate::new(config.min_artifact_lines),
            config,
            backend,
            processes,
            cache,
            history,
            current,
            workspace,
            claims: Mutex::new(HashMap::new()),
        })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn processes(&self) -> &ProcessManager {
        &self.processes
    }

    #[inline]
    #[must_use]
    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    #[inline]
    #[must_use]
    pub fn history(&self) -> &ConversationStore {
        &self.history
    }

    #[inline]
    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Remove per-request scratch left behind by an earlier process
    ///
    /// # Errors
    /// Returns [`ForgeError::Store`] if the work directory cannot be wiped
    pub async fn sweep_scratch(&self) -> Result<(), ForgeError> {
        self.workspace.sweep_scratch().await?;
        Ok(())
    }

    /// Run `message` on its own task, returning its event stream
    pub fn submit(
        self: &Arc<Self>,
        client: ClientId,
        message: ClientMessage,
    ) -> mpsc::UnboundedReceiver<RequestEvent> {
        let (events, rx) = EventSink::channel(RequestId::new());
        self.spawn(client, message, events);
        rx
    }

    /// Spawn the task for one message
    ///
    /// The request supersedes the client's earlier ones before this returns,
    /// so arrival order decides which request is newest.
    pub(crate) fn spawn(
        self: &Arc<Self>,
        client: ClientId,
        message: ClientMessage,
        events: EventSink,
    ) -> JoinHandle<()> {
        let claimed = renders(&message);
        if claimed {
            self.claim(&client, events.request());
        }
        let span = tracing::info_span!("render_request", id = %events.request(), client = %client);
        let this = Arc::clone(self);
        tokio::spawn(
            async move {
                this.dispatch(&client, message, &events).await;
                if claimed {
                    this.release(&client, events.request());
                }
            }
            .instrument(span),
        )
    }

    /// Handle one message on the current task
    pub async fn handle(&self, client: &ClientId, message: ClientMessage, events: &EventSink) {
        let claimed = renders(&message);
        if claimed {
            self.claim(client, events.request());
        }
        let span = tracing::info_span!("render_request", id = %events.request(), client = %client);
        self.dispatch(client, message, events).instrument(span).await;
        if claimed {
            self.release(client, events.request());
        }
    }

    async fn dispatch(&self, client: &ClientId, message: ClientMessage, events: &EventSink) {
        match message {
            ClientMessage::Prompt { prompt } => {
                let request = RenderRequest {
                    id: events.request(),
                    client_id: client.clone(),
                    intent_text: prompt,
                    submitted_at: Utc::now(),
                };
                self.run_prompt(&request, events).await;
            }
            ClientMessage::RenderCode { code } => self.render_code(client, &code, events).await,
            ClientMessage::ModifyCode { code, instruction } => {
                self.modify_code(&code, &instruction, events).await;
            }
        }
    }

    // ----- prompt pipeline -----

    async fn run_prompt(&self, request: &RenderRequest, events: &EventSink) {
        let started = Instant::now();
        let text = request.intent_text.as_str();
        events.progress(ProgressStep::Init, format!("received request: {text}"));

        let mut state = PipelineState::new(self.current.snapshot().await);
        if let Some(hit) = self.cache.lookup(text, state.snapshot.state_text()).await {
            tracing::info!(video = %hit, "served from cache");
            state.advance(PipelineStage::Done);
            events.send(ServerEvent::cached_result(hit));
            return;
        }

        self.generate(request, &mut state, events).await;

        let dir = match self.workspace.request_dir(&request.id.to_string()).await {
            Ok(dir) => dir,
            Err(e) => {
                self.fail(request, &mut state, e.into(), events).await;
                return;
            }
        };

        if self.config.preview_enabled {
            self.preview(request, &mut state, &dir, events).await;
        }
        let outcome = self.render_with_repair(request, &mut state, &dir, events).await;
        self.workspace.release_request_dir(&dir).await;
        state.timing.total = started.elapsed().as_secs_f64();

        match outcome {
            Ok(media) => self.succeed(request, &mut state, media, events).await,
            Err(e) => self.fail(request, &mut state, e, events).await,
        }
    }

    /// Intent through final validation
    async fn generate(&self, request: &RenderRequest, state: &mut PipelineState, events: &EventSink) {
        let text = request.intent_text.as_str();

        state.advance(PipelineStage::Intent);
        events.progress(ProgressStep::Intent, "analysing your intent");
        let current = CurrentState::analyze(&state.snapshot);
        let context = self.history.summarize(self.config.context_window).await;
        state.intent_summary = self
            .complete("intent", prompts::intent(text, &current, &context.text))
            .await
            .ok()
            .and_then(|reply| extract_json_object(&reply));
        if let Some(intent) = &state.intent_summary {
            tracing::debug!(%intent, "intent analysed");
        }

        state.advance(PipelineStage::Draft);
        events.progress(ProgressStep::Generator, "drafting the scene code");
        let clock = Instant::now();
        let draft_request =
            prompts::draft(text, state.intent_summary.as_ref(), &current, &context.text);
        let mut draft_degraded = false;
        state.draft = match self.complete("draft", draft_request).await {
            Ok(reply) => extract_code_block(&reply),
            Err(_) => {
                draft_degraded = true;
                state.snapshot.state_text().to_string()
            }
        };
        state.timing.generator = clock.elapsed().as_secs_f64();

        state.advance(PipelineStage::ValidateDraft);
        let report = self.gate.check(&state.draft);
        if !report.is_complete() {
            tracing::warn!(issues = %report.summary(), "draft looks incomplete");
            state.draft = report.with_warning_footer(&state.draft);
        }

        state.advance(PipelineStage::Critique);
        events.progress(ProgressStep::Analyzer, "reviewing the draft");
        let clock = Instant::now();
        state.critique = self
            .complete("critique", prompts::critique(text, &state.draft))
            .await
            .unwrap_or_default();
        state.timing.analyzer = clock.elapsed().as_secs_f64();

        state.advance(PipelineStage::Refine);
        events.progress(ProgressStep::Improver, "refining the code");
        let clock = Instant::now();
        state.refined = match self
            .complete("refine", prompts::refine(text, &state.draft, &state.critique))
            .await
        {
            Ok(reply) => non_empty_or(extract_code_block(&reply), &state.draft),
            Err(_) => {
                state.degraded = draft_degraded;
                state.draft.clone()
            }
        };
        state.timing.improver = clock.elapsed().as_secs_f64();
        if state.degraded {
            tracing::warn!("backend unreachable for draft and refinement; rendering the current scene");
        }

        state.advance(PipelineStage::ValidateFinal);
        let report = self.gate.check(&state.refined);
        if !report.is_complete() {
            tracing::warn!(issues = %report.summary(), "final source looks incomplete");
            state.refined = report.with_error_header(&state.refined);
        }
    }

    /// Best-effort single-frame preview; every failure is swallowed
    async fn preview(
        &self,
        request: &RenderRequest,
        state: &mut PipelineState,
        dir: &Path,
        events: &EventSink,
    ) {
        state.advance(PipelineStage::Preview);
        if self.is_superseded(&request.client_id, request.id) {
            return;
        }
        events.progress(ProgressStep::Preview, "rendering a quick preview");
        match self.preview_once(request, &state.refined, dir).await {
            Ok(url) => events.send(ServerEvent::Preview {
                url,
                message: "preview ready, rendering the full video".to_string(),
            }),
            Err(e) => tracing::debug!("preview skipped: {e}"),
        }
    }

    async fn preview_once(
        &self,
        request: &RenderRequest,
        source: &str,
        dir: &Path,
    ) -> Result<ArtifactRef, ForgeError> {
        let preview_dir = dir.join("preview");
        tokio::fs::create_dir_all(&preview_dir)
            .await
            .map_err(|e| ForgeError::io_error(&preview_dir, e))?;
        let file = preview_dir.join("scene.py");
        tokio::fs::write(&file, source)
            .await
            .map_err(|e| ForgeError::io_error(&file, e))?;

        let stem = format!("preview_{}", request.id);
        let command = RenderCommand::new(&self.config.render_program, &file, self.scene_for(source))
            .with_quality(self.config.quality.clone())
            .with_media_dir(&preview_dir)
            .with_output_stem(&stem)
            .single_frame();
        self.processes
            .run(&request.client_id, command, self.config.preview_timeout())
            .await?;

        let image = find_media(&preview_dir, &stem, "png")
            .await
            .ok_or(ForgeError::MissingMedia)?;
        let (url, _) = self.publish_media(&image, &format!("{stem}.png")).await?;
        Ok(url)
    }

    /// Render, repairing execution failures while attempts remain
    async fn render_with_repair(
        &self,
        request: &RenderRequest,
        state: &mut PipelineState,
        dir: &Path,
        events: &EventSink,
    ) -> Result<RenderedMedia, ForgeError> {
        let stem = request.id.output_stem();
        let mut attempt = 0;
        loop {
            state.advance(PipelineStage::Render { attempt });
            if attempt == 0 {
                events.progress(ProgressStep::Render, "rendering the video (this may take a few minutes)");
            } else {
                events.progress(
                    ProgressStep::Render,
                    format!("render failed, repair attempt {attempt}"),
                );
            }

            if self.is_superseded(&request.client_id, request.id) {
                return Err(ProcessError::Preempted {
                    stderr_tail: String::new(),
                }
                .into());
            }

            let error = match self
                .render_once(&request.client_id, &state.refined, dir, &stem)
                .await
            {
                Ok(media) => return Ok(media),
                Err(e) => e,
            };
            if !error.is_repairable() || attempt >= self.config.max_retries {
                return Err(error);
            }

            let diagnostic = error.diagnostic(self.config.diagnostic_limit);
            tracing::warn!(attempt, "render failed, requesting a repair: {error}");
            if let Ok(reply) = self
                .complete("repair", prompts::repair(&diagnostic, &state.refined))
                .await
            {
                state.refined = non_empty_or(extract_code_block(&reply), &state.refined);
            }
            attempt += 1;
        }
    }

    /// One observed render of `source` inside `dir`
    async fn render_once(
        &self,
        client: &ClientId,
        source: &str,
        dir: &Path,
        stem: &str,
    ) -> Result<RenderedMedia, ForgeError> {
        let dump = dir.join("objects_dump.json");
        if let Err(e) = tokio::fs::remove_file(&dump).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!("cannot remove stale object dump: {e}");
            }
        }

        let observed = Introspector::wrap(source, &self.scene_for(source), &dump);
        let file = dir.join("scene.py");
        tokio::fs::write(&file, &observed.source)
            .await
            .map_err(|e| ForgeError::io_error(&file, e))?;

        let media_dir = dir.join("media");
        let command = RenderCommand::new(&self.config.render_program, &file, &observed.entry_point)
            .with_quality(self.config.quality.clone())
            .with_media_dir(&media_dir)
            .with_output_stem(stem)
            .with_env(DUMP_PATH_ENV, dump.display().to_string());
        let output = self
            .processes
            .run(client, command, self.config.render_timeout())
            .await?;
        tracing::debug!(elapsed = ?output.elapsed, "renderer exited cleanly");

        let video = find_media(&media_dir, stem, "mp4")
            .await
            .ok_or(ForgeError::MissingMedia)?;
        let (artifact, path) = self.publish_media(&video, &format!("{stem}.mp4")).await?;
        let objects = read_dump(&observed.dump_path, source).await;
        Ok(RenderedMedia {
            artifact,
            path,
            objects,
        })
    }

    async fn succeed(
        &self,
        request: &RenderRequest,
        state: &mut PipelineState,
        media: RenderedMedia,
        events: &EventSink,
    ) {
        state.advance(PipelineStage::Done);
        let mut stale_base = false;
        if state.degraded {
            let entry = self.entry_for(request, state).failed(DEGRADED_NOTE);
            self.history.append(entry).await;
            tracing::warn!(video = %media.artifact, "request done without the backend; not cached");
        } else {
            let write = self
                .current
                .publish(state.snapshot.version, state.refined.clone())
                .await;
            stale_base = write.stale_base;
            let entry = self
                .entry_for(request, state)
                .succeeded(media.artifact.clone(), media.objects);
            self.history.append(entry).await;
            self.cache
                .store(&request.intent_text, state.snapshot.state_text(), media.artifact.clone())
                .await;
            tracing::info!(
                video = %media.artifact,
                attempts = state.retry_count + 1,
                version = write.version,
                "request done"
            );
        }

        events.send(ServerEvent::Result {
            status: ResultStatus::Success,
            video: Some(media.artifact),
            code: Some(state.refined.clone()),
            timing: Some(state.timing),
            cached: false,
            stale_base,
            degraded: state.degraded,
        });
    }

    async fn fail(
        &self,
        request: &RenderRequest,
        state: &mut PipelineState,
        error: ForgeError,
        events: &EventSink,
    ) {
        state.advance(PipelineStage::Failed);
        let diagnostic = error.diagnostic(self.config.diagnostic_limit);
        if error.is_preempted() {
            tracing::info!("request superseded");
        } else {
            tracing::error!(attempts = state.retry_count + 1, "request failed: {error}");
        }
        let entry = self.entry_for(request, state).failed(diagnostic.clone());
        self.history.append(entry).await;
        events.send(ServerEvent::error(error.headline(), Some(diagnostic)));
    }

    fn entry_for(&self, request: &RenderRequest, state: &PipelineState) -> ConversationEntry {
        let mut entry =
            ConversationEntry::new(request.intent_text.clone()).with_artifact(state.refined.clone());
        entry.intent_summary = state.intent_summary.clone();
        entry.draft_excerpt =
            (!state.draft.is_empty()).then(|| bounded_head(&state.draft, DRAFT_EXCERPT_LIMIT));
        entry.critique = (!state.critique.is_empty()).then(|| state.critique.clone());
        entry.timing = state.timing.as_millis();
        entry
    }

    // ----- direct operations -----

    /// Render a given source as is, without generation or repair
    async fn render_code(&self, client: &ClientId, code: &str, events: &EventSink) {
        events.progress(ProgressStep::Render, "rendering your code");
        match self.render_in_scratch(client, events.request(), code).await {
            Ok(media) => {
                tracing::info!(video = %media.artifact, "direct render done");
                events.send(ServerEvent::video_result(media.artifact, code));
            }
            Err(e) => {
                tracing::warn!("direct render failed: {e}");
                events.send(ServerEvent::error(
                    e.headline(),
                    Some(e.diagnostic(self.config.diagnostic_limit)),
                ));
            }
        }
    }

    async fn render_in_scratch(
        &self,
        client: &ClientId,
        id: RequestId,
        code: &str,
    ) -> Result<RenderedMedia, ForgeError> {
        let dir = self.workspace.request_dir(&id.to_string()).await?;
        let result = self.render_once(client, code, &dir, &id.output_stem()).await;
        self.workspace.release_request_dir(&dir).await;
        result
    }

    /// Rewrite a source according to an instruction; nothing is rendered
    async fn modify_code(&self, code: &str, instruction: &str, events: &EventSink) {
        events.progress(ProgressStep::Ai, "analysing the requested change");
        events.progress(ProgressStep::Ai, "modifying the code");
        match self.complete("modify", prompts::modify(code, instruction)).await {
            Ok(reply) => events.send(ServerEvent::code_result(extract_code_block(&reply))),
            Err(e) => events.send(ServerEvent::error(format!("modification failed: {e}"), None)),
        }
    }

    /// Render a source and return the media inline
    pub async fn render_sync(&self, request: SyncRenderRequest) -> SyncRenderResponse {
        let id = RequestId::new();
        let client = request.client_id.unwrap_or_else(ClientId::generate);
        self.claim(&client, id);

        let span = tracing::info_span!("render_request", id = %id, client = %client);
        let response = async {
            let media = self.render_in_scratch(&client, id, &request.code).await?;
            let bytes = tokio::fs::read(&media.path)
                .await
                .map_err(|e| ForgeError::io_error(&media.path, e))?;
            Ok::<_, ForgeError>(SyncRenderResponse::Success {
                video_url: media.artifact,
                video_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            })
        }
        .instrument(span)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(%id, "synchronous render failed: {e}");
            SyncRenderResponse::Failure {
                error: e.diagnostic(self.config.diagnostic_limit),
            }
        });

        self.release(&client, id);
        response
    }

    /// Short edit suggestions for a source
    ///
    /// Falls back to fixed suggestions when the reply is unusable or the
    /// backend fails.
    pub async fn suggestions(&self, code: &str, count: usize) -> Vec<String> {
        let owned = |list: &[&str]| list.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
        let Ok(reply) = self.complete("suggestions", prompts::suggestions(code, count)).await else {
            return owned(prompts::FALLBACK_SUGGESTIONS);
        };
        let parsed: Vec<String> = extract_json_array(&reply)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| v.as_str().map(str::trim).map(str::to_string))
            .filter(|s| !s.is_empty())
            .take(if count == 0 { usize::MAX } else { count })
            .collect();
        if parsed.is_empty() {
            owned(prompts::DEFAULT_SUGGESTIONS)
        } else {
            parsed
        }
    }

    #[must_use]
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            service: self.config.service_name.clone(),
            version: crate::VERSION.to_string(),
            live_renders: self.processes.live_count(),
            max_live_renders: self.processes.max_live(),
        }
    }

    /// Discard the cache, history, current scene, rendered media and scratch
    /// space
    ///
    /// Live renders are cancelled first. Irreversible.
    ///
    /// # Errors
    /// Returns [`ForgeError::Store`] if persisted state cannot be removed
    pub async fn reset(&self) -> Result<(), ForgeError> {
        let cancelled = self.processes.cancel_all();
        self.cache.clear().await?;
        self.history.clear().await?;
        self.current.clear().await?;
        self.workspace.reset().await?;
        tracing::warn!(cancelled, "engine state reset");
        Ok(())
    }

    pub async fn context_report(&self) -> ContextReport {
        ContextReport {
            summary: self.history.summarize(self.config.context_window).await,
            current_state: CurrentState::analyze(&self.current.snapshot().await),
            recent: self.history.recent(REPORT_ENTRIES).await,
        }
    }

    /// Source of the most recent successful render
    pub async fn current_code(&self) -> Option<String> {
        self.current.snapshot().await.source
    }

    /// Cancel every live render; returns how many were cancelled
    pub fn shutdown(&self) -> usize {
        let cancelled = self.processes.cancel_all();
        tracing::info!(cancelled, "orchestrator shutting down");
        cancelled
    }

    /// Clients with render-bearing requests in flight
    #[must_use]
    pub fn claimed_clients(&self) -> usize {
        self.claims.lock().len()
    }

    // ----- helpers -----

    async fn complete(&self, stage: &'static str, request: CompletionRequest) -> Result<String, LlmError> {
        let clock = Instant::now();
        match self.backend.complete(request).await {
            Ok(reply) => {
                tracing::debug!(stage, chars = reply.len(), elapsed = ?clock.elapsed(), "completion received");
                Ok(reply)
            }
            Err(e) => {
                tracing::warn!(stage, transient = e.is_transient(), "completion failed, degrading: {e}");
                Err(e)
            }
        }
    }

    fn scene_for(&self, source: &str) -> String {
        SceneContract::detect(source)
            .map_or_else(|| self.config.default_scene.clone(), |c| c.class_name)
    }

    /// Move rendered media into the public media directory
    async fn publish_media(
        &self,
        produced: &Path,
        file_name: &str,
    ) -> Result<(ArtifactRef, PathBuf), ForgeError> {
        let target = self.workspace.media_dir().join(file_name);
        if tokio::fs::rename(produced, &target).await.is_err() {
            tokio::fs::copy(produced, &target)
                .await
                .map_err(|e| ForgeError::io_error(&target, e))?;
        }
        Ok((
            ArtifactRef::under_prefix(&self.config.media_prefix, file_name),
            target,
        ))
    }

    fn claim(&self, client: &ClientId, id: RequestId) {
        let mut claims = self.claims.lock();
        let claim = claims.entry(client.clone()).or_insert(Claim {
            latest: id,
            in_flight: 0,
        });
        claim.latest = id;
        claim.in_flight += 1;
    }

    /// Drop one in-flight request; the record goes with the last one
    fn release(&self, client: &ClientId, id: RequestId) {
        let mut claims = self.claims.lock();
        let Some(claim) = claims.get_mut(client) else {
            tracing::debug!(client = %client, request = %id, "release without a claim");
            return;
        };
        claim.in_flight = claim.in_flight.saturating_sub(1);
        if claim.in_flight == 0 {
            claims.remove(client);
        }
    }

    fn is_superseded(&self, client: &ClientId, id: RequestId) -> bool {
        self.claims.lock().get(client).is_some_and(|claim| claim.latest != id)
    }
}

/// Whether the message leads to a render
fn renders(message: &ClientMessage) -> bool {
    matches!(
        message,
        ClientMessage::Prompt { .. } | ClientMessage::RenderCode { .. }
    )
}

fn non_empty_or(candidate: String, fallback: &str) -> String {
    if candidate.trim().is_empty() {
        fallback.to_string()
    } else {
        candidate
    }
}
