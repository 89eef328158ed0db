//! Process Manager Tests
//!
//! Admission ceiling, per-client preemption, timeouts and render output
//! discovery against fake renderer scripts.
//!
#![cfg(unix)]

use forge_kernel::prelude::*;
use forge_kernel::DUMP_PATH_ENV;
use forge_test_utils::{FakeRenderer, RendererMode, VALID_SCENE};
use std::path::Path;
use std::sync::Arc;

fn command(renderer: &FakeRenderer, media: &Path, stem: &str) -> RenderCommand {
    RenderCommand::new(&renderer.program(), "scene.py", "MathScene")
        .with_media_dir(media)
        .with_output_stem(stem)
}

async fn wait_until_live(manager: &ProcessManager, count: usize) {
    for _ in 0..200 {
        if manager.live_count() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} live renders, saw {}", manager.live_count());
}

#[tokio::test]
async fn test_successful_render_produces_media() {
    let renderer = FakeRenderer::new(RendererMode::Succeed);
    let media = tempfile::tempdir().unwrap();
    let manager = ProcessManager::default();

    let output = manager
        .run(
            &ClientId::new("c1"),
            command(&renderer, media.path(), "video_ok"),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    assert_eq!(output.exit_code, Some(0));
    assert!(output.stdout.contains("video_ok"));
    assert!(find_media(media.path(), "video_ok", "mp4").await.is_some());
    assert_eq!(manager.live_count(), 0);
    assert_eq!(manager.stats().total_spawned, 1);
}

#[tokio::test]
async fn test_failing_render_reports_stderr_tail() {
    let renderer = FakeRenderer::new(RendererMode::Fail);
    let media = tempfile::tempdir().unwrap();
    let manager = ProcessManager::default().with_diagnostic_limit(20);

    let err = manager
        .run(
            &ClientId::new("c1"),
            command(&renderer, media.path(), "video_fail"),
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();

    match err {
        ProcessError::NonZeroExit { code, stderr_tail } => {
            assert_eq!(code, Some(1));
            assert!(stderr_tail.chars().count() <= 20);
            assert!(stderr_tail.ends_with("is not defined\n"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_timeout_kills_render() {
    let renderer = FakeRenderer::new(RendererMode::Sleep(10));
    let media = tempfile::tempdir().unwrap();
    let manager = ProcessManager::default();

    let started = std::time::Instant::now();
    let err = manager
        .run(
            &ClientId::new("slow"),
            command(&renderer, media.path(), "video_slow"),
            Duration::from_millis(300),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ProcessError::TimedOut { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!manager.is_live(&ClientId::new("slow")));
    assert_eq!(manager.stats().total_timed_out, 1);
}

#[tokio::test]
async fn test_same_client_preempts_previous_render() {
    let slow = FakeRenderer::new(RendererMode::Sleep(10));
    let fast = FakeRenderer::new(RendererMode::Succeed);
    let media = tempfile::tempdir().unwrap();
    let manager = Arc::new(ProcessManager::default());
    let client = ClientId::new("same");

    let first = {
        let manager = Arc::clone(&manager);
        let client = client.clone();
        let command = command(&slow, media.path(), "video_r1");
        tokio::spawn(async move { manager.run(&client, command, Duration::from_secs(30)).await })
    };
    wait_until_live(&manager, 1).await;

    let second = manager
        .run(&client, command(&fast, media.path(), "video_r2"), Duration::from_secs(10))
        .await;

    let first = first.await.unwrap();
    assert!(matches!(first, Err(ProcessError::Preempted { .. })));
    assert!(second.is_ok());
    assert!(find_media(media.path(), "video_r2", "mp4").await.is_some());
    assert!(find_media(media.path(), "video_r1", "mp4").await.is_none());
    assert_eq!(manager.live_count(), 0);
    assert_eq!(manager.stats().total_preempted, 1);
}

#[tokio::test]
async fn test_preempting_run_starts_after_predecessor_is_reaped() {
    let slow = FakeRenderer::new(RendererMode::Sleep(10));
    let fast = FakeRenderer::new(RendererMode::Succeed);
    let media = tempfile::tempdir().unwrap();
    let manager = Arc::new(ProcessManager::new(1));
    let client = ClientId::new("same");

    let first = {
        let manager = Arc::clone(&manager);
        let client = client.clone();
        let command = command(&slow, media.path(), "video_r1");
        tokio::spawn(async move { manager.run(&client, command, Duration::from_secs(30)).await })
    };
    wait_until_live(&manager, 1).await;

    // At the ceiling, the same client still gets its slot back
    let second = manager
        .run(&client, command(&fast, media.path(), "video_r2"), Duration::from_secs(10))
        .await;
    assert!(second.is_ok());
    assert!(matches!(first.await.unwrap(), Err(ProcessError::Preempted { .. })));

    // Another client is rejected while a preempted render is still terminating
    let third = {
        let manager = Arc::clone(&manager);
        let client = client.clone();
        let command = command(&slow, media.path(), "video_r3");
        tokio::spawn(async move { manager.run(&client, command, Duration::from_secs(30)).await })
    };
    wait_until_live(&manager, 1).await;
    let fourth = {
        let manager = Arc::clone(&manager);
        let client = client.clone();
        let command = command(&fast, media.path(), "video_r4");
        tokio::spawn(async move { manager.run(&client, command, Duration::from_secs(10)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let other = manager
        .run(
            &ClientId::new("other"),
            command(&fast, media.path(), "video_other"),
            Duration::from_secs(10),
        )
        .await;
    assert_eq!(other.unwrap_err(), ProcessError::Busy { limit: 1 });

    assert!(matches!(third.await.unwrap(), Err(ProcessError::Preempted { .. })));
    assert!(fourth.await.unwrap().is_ok());
    assert_eq!(manager.live_count(), 0);
    assert_eq!(manager.stats().total_preempted, 2);
}

#[tokio::test]
async fn test_admission_ceiling_rejects_ninth_client() {
    let slow = FakeRenderer::new(RendererMode::Sleep(10));
    let media = tempfile::tempdir().unwrap();
    let manager = Arc::new(ProcessManager::new(8));

    let mut running = Vec::new();
    for i in 0..8 {
        let manager = Arc::clone(&manager);
        let command = command(&slow, media.path(), &format!("video_{i}"));
        running.push(tokio::spawn(async move {
            manager
                .run(&ClientId::new(format!("client_{i}")), command, Duration::from_secs(30))
                .await
        }));
    }
    wait_until_live(&manager, 8).await;

    let err = manager
        .run(
            &ClientId::new("client_8"),
            command(&slow, media.path(), "video_8"),
            Duration::from_secs(30),
        )
        .await
        .unwrap_err();
    assert_eq!(err, ProcessError::Busy { limit: 8 });
    assert_eq!(manager.live_count(), 8);

    assert_eq!(manager.cancel_all(), 8);
    for handle in running {
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ProcessError::Preempted { .. })));
    }
    assert_eq!(manager.live_count(), 0);
}

#[tokio::test]
async fn test_introspected_render_writes_dump() {
    let renderer = FakeRenderer::new(RendererMode::Succeed);
    let work = tempfile::tempdir().unwrap();
    let dump = work.path().join("objects.json");
    let observed = Introspector::wrap(VALID_SCENE, "MathScene", &dump);
    let file = work.path().join("scene.py");
    std::fs::write(&file, &observed.source).unwrap();

    let command = RenderCommand::new(&renderer.program(), &file, &observed.entry_point)
        .with_media_dir(work.path().join("media"))
        .with_output_stem("video_obs")
        .with_env(DUMP_PATH_ENV, dump.display().to_string());
    ProcessManager::default()
        .run(&ClientId::new("c"), command, Duration::from_secs(10))
        .await
        .unwrap();

    let objects = read_dump(&observed.dump_path, VALID_SCENE).await;
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].kind, "Circle");
    assert_eq!(objects[0].color.as_deref(), Some("#FC6255"));
}
