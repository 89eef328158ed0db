//! Pipeline Tests
//!
//! End-to-end runs of the orchestrator against a scripted completion
//! backend and fake renderer scripts.
//!
#![cfg(unix)]

use forge_core::prompts::REPAIR_SYSTEM;
use forge_core::{
    ClientId, ClientMessage, ForgeConfig, ProgressStep, RenderOrchestrator, RequestEvent,
    RequestId, ServerEvent, Session, SyncRenderRequest, SyncRenderResponse,
};
use forge_artifact::ArtifactRef;
use forge_test_utils::{
    FakeRenderer, RendererMode, ScriptedBackend, TempWorkspace, SQUARE_SCENE, VALID_SCENE,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

async fn engine(
    ws: &TempWorkspace,
    renderer: &FakeRenderer,
    backend: &ScriptedBackend,
    configure: impl FnOnce(ForgeConfig) -> ForgeConfig,
) -> Arc<RenderOrchestrator> {
    let config = ForgeConfig::new()
        .with_data_root(ws.root())
        .with_render_program(renderer.program())
        .with_preview(false);
    let engine = RenderOrchestrator::open(configure(config), Arc::new(backend.clone()))
        .await
        .unwrap();
    Arc::new(engine)
}

/// Events of one request, up to and including its terminal event
async fn drain(rx: &mut UnboundedReceiver<RequestEvent>) -> Vec<ServerEvent> {
    let mut request = None;
    let mut events = Vec::new();
    while let Some(stamped) = tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("request finished in time")
    {
        assert_eq!(*request.get_or_insert(stamped.request_id), stamped.request_id);
        let terminal = stamped.is_terminal();
        events.push(stamped.event);
        if terminal {
            break;
        }
    }
    events
}

fn prompt(text: &str) -> ClientMessage {
    ClientMessage::Prompt {
        prompt: text.to_string(),
    }
}

fn steps(events: &[ServerEvent]) -> Vec<ProgressStep> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::Progress { step, .. } => Some(*step),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_prompt_runs_every_stage_in_order() {
    let ws = TempWorkspace::new();
    let renderer = FakeRenderer::new(RendererMode::Succeed);
    let backend = ScriptedBackend::new();
    let engine = engine(&ws, &renderer, &backend, |c| c.with_preview(true)).await;

    let mut rx = engine.submit(ClientId::new("c1"), prompt("draw a red circle"));
    let events = drain(&mut rx).await;

    assert_eq!(
        steps(&events),
        vec![
            ProgressStep::Init,
            ProgressStep::Intent,
            ProgressStep::Generator,
            ProgressStep::Analyzer,
            ProgressStep::Improver,
            ProgressStep::Preview,
            ProgressStep::Render,
        ]
    );
    let preview_at = events
        .iter()
        .position(|e| matches!(e, ServerEvent::Preview { .. }))
        .expect("preview event");
    let render_at = events
        .iter()
        .position(|e| matches!(e, ServerEvent::Progress { step: ProgressStep::Render, .. }))
        .unwrap();
    assert!(preview_at < render_at);

    let Some(ServerEvent::Result {
        video: Some(video),
        code: Some(code),
        timing: Some(_),
        cached: false,
        stale_base: false,
        ..
    }) = events.last()
    else {
        panic!("expected a video result, got {:?}", events.last());
    };
    assert!(video.as_str().starts_with("/static/video_"));
    assert_eq!(code.trim(), VALID_SCENE.trim());
    assert!(engine.workspace().media_dir().join(video.file_name()).exists());

    // intent, draft, critique, refine
    assert_eq!(backend.call_count(), 4);
    assert_eq!(renderer.invocations(), 2);

    assert_eq!(engine.current_code().await.as_deref().map(str::trim), Some(VALID_SCENE.trim()));
    assert_eq!(engine.cache().lookup("draw a red circle", "").await, Some(video.clone()));

    let history = engine.history().load().await;
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert_eq!(history[0].introspected_objects[0].kind, "Circle");
    assert_eq!(history[0].introspected_objects[0].color.as_deref(), Some("#FC6255"));
    assert!(history[0].timing.contains_key("total"));
}

#[tokio::test]
async fn test_cache_hit_bypasses_generation_and_render() {
    let ws = TempWorkspace::new();
    let renderer = FakeRenderer::new(RendererMode::Succeed);
    let backend = ScriptedBackend::new();
    let engine = engine(&ws, &renderer, &backend, |c| c).await;

    let cached = ArtifactRef::new("/static/video_cached.mp4");
    engine
        .cache()
        .store("draw a red circle", "", cached.clone())
        .await;

    let mut rx = engine.submit(ClientId::new("c1"), prompt("  draw a red circle  "));
    let events = drain(&mut rx).await;

    assert_eq!(events.last(), Some(&ServerEvent::cached_result(cached)));
    assert_eq!(backend.call_count(), 0);
    assert_eq!(renderer.invocations(), 0);
    assert!(engine.history().is_empty().await);
}

#[tokio::test]
async fn test_repair_loop_is_bounded() {
    let ws = TempWorkspace::new();
    let renderer = FakeRenderer::new(RendererMode::Fail);
    let backend = ScriptedBackend::new();
    let engine = engine(&ws, &renderer, &backend, |c| c.with_max_retries(2)).await;

    let mut rx = engine.submit(ClientId::new("c1"), prompt("draw a red circle"));
    let events = drain(&mut rx).await;

    assert_eq!(renderer.invocations(), 3);
    assert_eq!(backend.calls_with_system(REPAIR_SYSTEM), 2);
    let Some(ServerEvent::Error {
        message,
        details: Some(details),
    }) = events.last()
    else {
        panic!("expected an error, got {:?}", events.last());
    };
    assert_eq!(message, "render failed");
    assert!(details.contains("NameError"));
    assert!(details.chars().count() <= 500);

    let history = engine.history().load().await;
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert!(engine.current_code().await.is_none());
    assert!(engine.cache().lookup("draw a red circle", "").await.is_none());
}

#[tokio::test]
async fn test_repaired_source_is_rendered_and_published() {
    let ws = TempWorkspace::new();
    let renderer = FakeRenderer::new(RendererMode::FailTimes(1));
    let backend = ScriptedBackend::new();
    let engine = engine(&ws, &renderer, &backend, |c| c).await;

    let mut rx = engine.submit(ClientId::new("c1"), prompt("draw a red circle"));
    let events = drain(&mut rx).await;

    assert!(matches!(events.last(), Some(ServerEvent::Result { .. })));
    let render_steps = steps(&events)
        .into_iter()
        .filter(|s| *s == ProgressStep::Render)
        .count();
    assert_eq!(render_steps, 2);
    assert_eq!(backend.calls_with_system(REPAIR_SYSTEM), 1);
}

#[tokio::test]
async fn test_backend_outage_renders_current_scene_without_caching() {
    let ws = TempWorkspace::new();
    let renderer = FakeRenderer::new(RendererMode::Succeed);
    let backend = ScriptedBackend::new();
    let engine = engine(&ws, &renderer, &backend, |c| c).await;

    // Establish a current scene, then lose the backend
    let mut rx = engine.submit(ClientId::new("c1"), prompt("draw a red circle"));
    drain(&mut rx).await;
    let scene = engine.current_code().await.unwrap();
    let offline = ScriptedBackend::failing();
    let degraded = RenderOrchestrator::open(engine.config().clone(), Arc::new(offline.clone()))
        .await
        .unwrap();
    let degraded = Arc::new(degraded);

    let mut rx = degraded.submit(ClientId::new("c1"), prompt("make it bigger"));
    let events = drain(&mut rx).await;

    let Some(ServerEvent::Result {
        code: Some(code),
        video: Some(_),
        degraded: true,
        ..
    }) = events.last()
    else {
        panic!("expected a degraded result, got {:?}", events.last());
    };
    assert_eq!(code.trim(), VALID_SCENE.trim());
    assert_eq!(offline.call_count(), 4);

    // Nothing a later identical request could be served from
    assert!(degraded.cache().lookup("make it bigger", &scene).await.is_none());
    let last = degraded.history().load().await.pop().unwrap();
    assert_eq!(last.request_text, "make it bigger");
    assert!(!last.success);
    assert!(last.artifact_ref.is_none());

    // Once the backend is back, the request is generated for real
    let recovered = ScriptedBackend::new();
    let recovered_engine =
        RenderOrchestrator::open(engine.config().clone(), Arc::new(recovered.clone()))
            .await
            .unwrap();
    let mut rx = Arc::new(recovered_engine).submit(ClientId::new("c1"), prompt("make it bigger"));
    let events = drain(&mut rx).await;
    assert!(matches!(
        events.last(),
        Some(ServerEvent::Result { cached: false, degraded: false, .. })
    ));
    assert_eq!(recovered.call_count(), 4);
}

#[tokio::test]
async fn test_same_client_prompt_preempts_live_render() {
    let ws = TempWorkspace::new();
    let renderer = FakeRenderer::new(RendererMode::SlowFirst(10));
    let backend = ScriptedBackend::new();
    let engine = engine(&ws, &renderer, &backend, |c| c).await;
    let client = ClientId::new("c1");

    let (mut session, mut rx) = Session::open(Arc::clone(&engine), client.clone());
    let first = session.dispatch(prompt("draw a red circle"));
    while !engine.processes().is_live(&client) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let second = session.dispatch(prompt("draw a blue square"));
    session.close().await;

    let mut by_request: HashMap<RequestId, Vec<ServerEvent>> = HashMap::new();
    while let Some(stamped) = rx.recv().await {
        by_request
            .entry(stamped.request_id)
            .or_default()
            .push(stamped.event);
    }
    assert_eq!(by_request.len(), 2);
    assert_eq!(by_request[&first].last().map(ServerEvent::is_terminal), Some(true));
    assert_eq!(by_request[&second].last().map(ServerEvent::is_terminal), Some(true));
    assert!(matches!(
        by_request[&first].last(),
        Some(ServerEvent::Error { message, .. }) if message.contains("superseded")
    ));
    let terminals: Vec<&ServerEvent> = by_request
        .values()
        .flatten()
        .filter(|e| e.is_terminal())
        .collect();
    assert_eq!(terminals.len(), 2);
    assert!(terminals.iter().any(|e| matches!(
        e,
        ServerEvent::Error { message, .. } if message.contains("superseded")
    )));
    assert!(terminals
        .iter()
        .any(|e| matches!(e, ServerEvent::Result { video: Some(_), .. })));
    assert_eq!(engine.processes().stats().total_preempted, 1);
    assert_eq!(engine.claimed_clients(), 0);
}

#[tokio::test]
async fn test_admission_ceiling_rejects_without_repair() {
    let ws = TempWorkspace::new();
    let renderer = FakeRenderer::new(RendererMode::Sleep(10));
    let backend = ScriptedBackend::new();
    let engine = engine(&ws, &renderer, &backend, |c| c.with_max_live_renders(1)).await;

    let _first = engine.submit(ClientId::new("c1"), prompt("draw a red circle"));
    while engine.processes().live_count() == 0 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut rx = engine.submit(ClientId::new("c2"), prompt("draw a blue square"));
    let events = drain(&mut rx).await;
    assert!(matches!(
        events.last(),
        Some(ServerEvent::Error { message, .. }) if message.contains("capacity")
    ));
    assert_eq!(backend.calls_with_system(REPAIR_SYSTEM), 0);
    assert_eq!(engine.shutdown(), 1);
}

#[tokio::test]
async fn test_render_code_skips_generation() {
    let ws = TempWorkspace::new();
    let renderer = FakeRenderer::new(RendererMode::Succeed);
    let backend = ScriptedBackend::new();
    let engine = engine(&ws, &renderer, &backend, |c| c).await;

    let mut rx = engine.submit(
        ClientId::new("c1"),
        ClientMessage::RenderCode {
            code: SQUARE_SCENE.to_string(),
        },
    );
    let events = drain(&mut rx).await;

    assert_eq!(steps(&events), vec![ProgressStep::Render]);
    assert!(matches!(
        events.last(),
        Some(ServerEvent::Result { video: Some(_), code: Some(code), .. }) if code == SQUARE_SCENE
    ));
    assert_eq!(backend.call_count(), 0);
    assert!(engine.current_code().await.is_none());
}

#[tokio::test]
async fn test_sync_render_inlines_media() {
    let ws = TempWorkspace::new();
    let renderer = FakeRenderer::new(RendererMode::Succeed);
    let backend = ScriptedBackend::new();
    let engine = engine(&ws, &renderer, &backend, |c| c).await;

    let response = engine.render_sync(SyncRenderRequest::new(VALID_SCENE)).await;
    let SyncRenderResponse::Success {
        video_url,
        video_base64,
    } = response
    else {
        panic!("expected success, got {response:?}");
    };
    assert!(video_url.as_str().ends_with(".mp4"));
    assert_eq!(video_base64, "TVA0REFUQQ==");
}

#[tokio::test]
async fn test_sync_render_reports_bounded_diagnostic() {
    let ws = TempWorkspace::new();
    let renderer = FakeRenderer::new(RendererMode::Fail);
    let backend = ScriptedBackend::new();
    let engine = engine(&ws, &renderer, &backend, |c| c).await;

    let response = engine
        .render_sync(SyncRenderRequest::new(VALID_SCENE).with_client(ClientId::new("gateway")))
        .await;
    let SyncRenderResponse::Failure { error } = response else {
        panic!("expected failure, got {response:?}");
    };
    assert!(error.contains("NameError"));
    assert!(error.chars().count() <= 500);
}

#[tokio::test]
async fn test_reset_discards_everything() {
    let ws = TempWorkspace::new();
    let renderer = FakeRenderer::new(RendererMode::Succeed);
    let backend = ScriptedBackend::new();
    let engine = engine(&ws, &renderer, &backend, |c| c).await;

    let mut rx = engine.submit(ClientId::new("c1"), prompt("draw a red circle"));
    drain(&mut rx).await;
    assert!(!engine.context_report().await.summary.is_empty());

    engine.reset().await.unwrap();

    let report = engine.context_report().await;
    assert!(report.summary.is_empty());
    assert!(report.recent.is_empty());
    assert!(engine.current_code().await.is_none());
    assert!(engine.cache().lookup("draw a red circle", "").await.is_none());
    let media: Vec<_> = std::fs::read_dir(engine.workspace().media_dir())
        .unwrap()
        .collect();
    assert!(media.is_empty());
    assert_eq!(engine.health().status, "ok");
}
