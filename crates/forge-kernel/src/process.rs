//! Process manager
//!
//! Runs renderer invocations as child process groups with:
//! - A global ceiling on live renders (no queueing; excess is rejected)
//! - At most one live render per client; a new one preempts the old
//! - A per-run timeout that kills the whole group
//!
//! Preemption, admission, registration and deregistration all happen under
//! one registry lock. Each registration carries a unique token, and a run
//! only ever deregisters its own token, so a preempted run can never remove
//! the handle of the run that replaced it.
//!
//! A preempted render keeps its slot until its group has been terminated
//! and reaped; the run that preempted it waits for that before being
//! admitted, so the number of live processes never exceeds the ceiling.
//! While waiting, a still newer run of the same client wins.

use crate::client::ClientId;
use crate::command::RenderCommand;
use crate::group::JobGroup;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use forge_artifact::bounded_tail;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Default ceiling on concurrently live renders
pub const DEFAULT_MAX_LIVE: usize = 8;

/// Default bound on diagnostic text carried by errors
pub const DEFAULT_DIAGNOSTIC_LIMIT: usize = 500;

/// How long to wait for output readers after a kill
const READER_DRAIN: Duration = Duration::from_secs(2);

/// Output of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Why a run did not complete successfully
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    /// Ceiling of live renders reached
    #[error("render capacity exhausted ({limit} live renders)")]
    Busy { limit: usize },

    /// Program could not be started
    #[error("failed to start renderer: {message}")]
    Spawn { message: String },

    /// Killed after exceeding its time limit
    #[error("render timed out after {}s", .after.as_secs())]
    TimedOut { after: Duration, stderr_tail: String },

    /// Exited unsuccessfully
    #[error("renderer exited with {}", describe_code(.code))]
    NonZeroExit {
        code: Option<i32>,
        stderr_tail: String,
    },

    /// Superseded by a newer run from the same client
    #[error("render superseded by a newer request from the same client")]
    Preempted { stderr_tail: String },
}

impl ProcessError {
    /// Bounded, user-facing diagnostic text
    #[must_use]
    pub fn diagnostic(&self) -> String {
        match self {
            Self::NonZeroExit { stderr_tail, .. } if !stderr_tail.trim().is_empty() => {
                stderr_tail.clone()
            }
            Self::TimedOut { stderr_tail, .. } if !stderr_tail.trim().is_empty() => {
                format!("{self}\n{stderr_tail}")
            }
            _ => self.to_string(),
        }
    }

    /// Whether regenerating the source could plausibly fix this failure
    #[inline]
    #[must_use]
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. } | Self::TimedOut { .. } | Self::NonZeroExit { .. }
        )
    }

    /// Tail of the renderer's stderr, when one was captured
    #[must_use]
    pub fn stderr_tail(&self) -> Option<&str> {
        match self {
            Self::TimedOut { stderr_tail, .. }
            | Self::NonZeroExit { stderr_tail, .. }
            | Self::Preempted { stderr_tail } => Some(stderr_tail),
            Self::Busy { .. } | Self::Spawn { .. } => None,
        }
    }
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (killed by signal)".to_string(),
    }
}

/// Registry entry for a live render
#[derive(Debug)]
struct LiveHandle {
    token: u64,
    pid: Option<u32>,
    started: Instant,
    deadline: Instant,
    /// Taken once the render has been told to stop
    cancel: Option<oneshot::Sender<()>>,
    /// Flips to true after the run has deregistered
    exited: watch::Receiver<bool>,
}

impl LiveHandle {
    /// Signal cancellation; false if it was already signalled
    fn signal(&mut self) -> bool {
        match self.cancel.take() {
            // The receiver is gone only if that run already finished.
            Some(cancel) => {
                let _ = cancel.send(());
                true
            }
            None => false,
        }
    }

    /// The owning run was dropped without deregistering
    fn is_orphaned(&self) -> bool {
        self.exited.has_changed().is_err()
    }
}

#[derive(Debug, Default)]
struct Registry {
    live: HashMap<ClientId, LiveHandle>,
    /// Newest run per client waiting for its predecessor to exit
    claims: HashMap<ClientId, u64>,
}

/// Result of one admission attempt
enum Admission {
    Spawned(AsyncGroupChild),
    /// Wait for the preempted predecessor to exit, then try again
    WaitFor(watch::Receiver<bool>),
}

/// Snapshot of a live render, for reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveRender {
    pub client: ClientId,
    pub pid: Option<u32>,
    pub running_for: Duration,
    pub remaining: Duration,
}

/// Manager statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub live: usize,
    pub max_live: usize,
    pub total_spawned: u64,
    pub total_rejected: u64,
    pub total_preempted: u64,
    pub total_timed_out: u64,
}

#[derive(Debug, Default)]
struct Counters {
    spawned: AtomicU64,
    rejected: AtomicU64,
    preempted: AtomicU64,
    timed_out: AtomicU64,
}

/// How a wait ended
enum WaitOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Preempted,
}

impl WaitOutcome {
    /// Whether the group may still be running and must be terminated
    fn needs_termination(&self) -> bool {
        !matches!(self, Self::Exited(Ok(_)))
    }
}

/// Bounded-concurrency, per-client-preempting process manager
#[derive(Debug)]
pub struct ProcessManager {
    max_live: usize,
    diagnostic_limit: usize,
    registry: Mutex<Registry>,
    next_token: AtomicU64,
    counters: Counters,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LIVE)
    }
}

impl ProcessManager {
    /// Create a manager admitting at most `max_live` concurrent renders
    #[must_use]
    pub fn new(max_live: usize) -> Self {
        Self {
            max_live,
            diagnostic_limit: DEFAULT_DIAGNOSTIC_LIMIT,
            registry: Mutex::new(Registry::default()),
            next_token: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    #[must_use]
    pub fn with_diagnostic_limit(mut self, limit: usize) -> Self {
        self.diagnostic_limit = limit;
        self
    }

    #[inline]
    #[must_use]
    pub fn max_live(&self) -> usize {
        self.max_live
    }

    /// Run `command` on behalf of `client`, waiting at most `timeout`
    ///
    /// Any live render of the same client is preempted first; this run
    /// starts once the preempted group is gone.
    ///
    /// # Errors
    /// - [`ProcessError::Busy`] when the ceiling is reached
    /// - [`ProcessError::Spawn`] when the program cannot start
    /// - [`ProcessError::TimedOut`] when the deadline passes (group killed)
    /// - [`ProcessError::Preempted`] when a newer run of the same client starts
    /// - [`ProcessError::NonZeroExit`] when the program fails
    pub async fn run(
        &self,
        client: &ClientId,
        command: RenderCommand,
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessError> {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (exited_tx, _) = watch::channel(false);
        let mut cancel = Some(cancel_tx);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        let mut child = loop {
            match self.admit(client, &command, token, timeout, &mut cancel, &exited_tx)? {
                Admission::Spawned(child) => break child,
                Admission::WaitFor(mut predecessor) => {
                    // Err: the predecessor's run is gone without reporting.
                    let _ = predecessor.wait_for(|exited| *exited).await;
                }
            }
        };
        let started = Instant::now();

        let stdout = spawn_reader(child.inner().stdout.take());
        let stderr = spawn_reader(child.inner().stderr.take());

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            () = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
            _ = cancel_rx => WaitOutcome::Preempted,
        };

        if outcome.needs_termination() {
            if let Err(e) = child.terminate().await {
                tracing::warn!(client = %client, "failed to reap terminated render: {e}");
            }
        }
        self.deregister(client, token);
        exited_tx.send_replace(true);

        let stdout = drain(stdout).await;
        let stderr = drain(stderr).await;
        let elapsed = started.elapsed();
        let tail = bounded_tail(&stderr, self.diagnostic_limit);

        match outcome {
            WaitOutcome::Exited(Ok(status)) if status.success() => {
                tracing::debug!(client = %client, ?elapsed, "render finished");
                Ok(ProcessOutput {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    elapsed,
                })
            }
            WaitOutcome::Exited(Ok(status)) => {
                tracing::info!(client = %client, code = ?status.code(), "render failed");
                Err(ProcessError::NonZeroExit {
                    code: status.code(),
                    stderr_tail: tail,
                })
            }
            WaitOutcome::Exited(Err(e)) => Err(ProcessError::Spawn {
                message: format!("waiting for renderer: {e}"),
            }),
            WaitOutcome::TimedOut => {
                self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(client = %client, ?timeout, "render timed out; group killed");
                Err(ProcessError::TimedOut {
                    after: timeout,
                    stderr_tail: tail,
                })
            }
            WaitOutcome::Preempted => {
                tracing::info!(client = %client, "render preempted; group killed");
                Err(ProcessError::Preempted { stderr_tail: tail })
            }
        }
    }

    /// Preempt, admit, spawn and register under the registry lock
    fn admit(
        &self,
        client: &ClientId,
        command: &RenderCommand,
        token: u64,
        timeout: Duration,
        cancel: &mut Option<oneshot::Sender<()>>,
        exited: &watch::Sender<bool>,
    ) -> Result<Admission, ProcessError> {
        let mut guard = self.registry.lock();
        let registry = &mut *guard;

        let newest = registry.claims.entry(client.clone()).or_insert(token);
        if *newest > token {
            return Err(self.superseded(client));
        }
        *newest = token;

        if registry.live.get(client).is_some_and(LiveHandle::is_orphaned) {
            tracing::debug!(client = %client, "dropping orphaned render handle");
            registry.live.remove(client);
        }
        if let Some(previous) = registry.live.get_mut(client) {
            if previous.token > token {
                registry.claims.remove(client);
                return Err(self.superseded(client));
            }
            if previous.signal() {
                tracing::info!(client = %client, pid = ?previous.pid, "preempting live render");
                self.counters.preempted.fetch_add(1, Ordering::Relaxed);
            }
            return Ok(Admission::WaitFor(previous.exited.clone()));
        }
        registry.claims.remove(client);

        if registry.live.len() >= self.max_live {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(client = %client, limit = self.max_live, "render rejected: at capacity");
            return Err(ProcessError::Busy {
                limit: self.max_live,
            });
        }

        let mut tokio_command = command.to_command().ok_or_else(|| ProcessError::Spawn {
            message: "no render program configured".to_string(),
        })?;
        let mut child = tokio_command.group_spawn().map_err(|e| ProcessError::Spawn {
            message: format!("{}: {e}", command.program().unwrap_or_default()),
        })?;

        let pid = child.inner().id();
        let started = Instant::now();
        registry.live.insert(
            client.clone(),
            LiveHandle {
                token,
                pid,
                started,
                deadline: started + timeout,
                cancel: cancel.take(),
                exited: exited.subscribe(),
            },
        );
        self.counters.spawned.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(client = %client, ?pid, live = registry.live.len(), "render spawned");

        Ok(Admission::Spawned(child))
    }

    /// A waiting run lost to a newer run of the same client
    fn superseded(&self, client: &ClientId) -> ProcessError {
        self.counters.preempted.fetch_add(1, Ordering::Relaxed);
        tracing::info!(client = %client, "render superseded before it started");
        ProcessError::Preempted {
            stderr_tail: String::new(),
        }
    }

    /// Remove the client's handle only if it is still the one for `token`
    fn deregister(&self, client: &ClientId, token: u64) {
        let mut registry = self.registry.lock();
        if registry.live.get(client).is_some_and(|h| h.token == token) {
            registry.live.remove(client);
        }
    }

    /// Number of live renders, including preempted ones not yet reaped
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.registry.lock().live.len()
    }

    /// Whether `client` has a live render
    #[must_use]
    pub fn is_live(&self, client: &ClientId) -> bool {
        self.registry.lock().live.contains_key(client)
    }

    /// Snapshot of every live render
    #[must_use]
    pub fn live_renders(&self) -> Vec<LiveRender> {
        let now = Instant::now();
        self.registry
            .lock()
            .live
            .iter()
            .map(|(client, handle)| LiveRender {
                client: client.clone(),
                pid: handle.pid,
                running_for: now.saturating_duration_since(handle.started),
                remaining: handle.deadline.saturating_duration_since(now),
            })
            .collect()
    }

    /// Cancel every live render; returns how many were signalled
    ///
    /// Each render frees its slot once its group is reaped.
    pub fn cancel_all(&self) -> usize {
        let mut registry = self.registry.lock();
        let mut count = 0;
        for (client, handle) in &mut registry.live {
            if handle.signal() {
                tracing::info!(client = %client, "cancelling live render");
                count += 1;
            }
        }
        count
    }

    #[must_use]
    pub fn stats(&self) -> ProcessStats {
        ProcessStats {
            live: self.live_count(),
            max_live: self.max_live,
            total_spawned: self.counters.spawned.load(Ordering::Relaxed),
            total_rejected: self.counters.rejected.load(Ordering::Relaxed),
            total_preempted: self.counters.preempted.load(Ordering::Relaxed),
            total_timed_out: self.counters.timed_out.load(Ordering::Relaxed),
        }
    }
}

fn spawn_reader<R>(stream: Option<R>) -> Option<JoinHandle<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream.map(|mut stream| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = stream.read_to_end(&mut buf).await {
                tracing::trace!("render output read ended early: {e}");
            }
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

async fn drain(reader: Option<JoinHandle<String>>) -> String {
    let Some(mut handle) = reader else {
        return String::new();
    };
    match tokio::time::timeout(READER_DRAIN, &mut handle).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            tracing::debug!("render output reader failed: {e}");
            String::new()
        }
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}
