//! Job groups
//!
//! A render spawns a process tree (interpreter, encoder, helpers). Stopping
//! it means stopping the whole tree, so every render runs as the leader of
//! its own process group and is terminated through [`JobGroup`].

use async_trait::async_trait;
use command_group::AsyncGroupChild;
use std::io;
use std::time::Duration;

/// Delay between the polite and the forced termination signal
pub const TERMINATE_GRACE: Duration = Duration::from_millis(250);

/// A running job that can be terminated together with all its descendants
#[async_trait]
pub trait JobGroup: Send {
    /// OS id of the group leader, if still known
    fn leader_id(&mut self) -> Option<u32>;

    /// Terminate the job and every descendant, then reap the leader
    async fn terminate(&mut self) -> io::Result<()>;
}

#[async_trait]
impl JobGroup for AsyncGroupChild {
    fn leader_id(&mut self) -> Option<u32> {
        self.inner().id()
    }

    async fn terminate(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        if let Some(pid) = self.leader_id() {
            signal_group(pid).await;
        }

        // Group kill fallback; fails once the group is already gone.
        match self.kill().await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::trace!("group kill after signals: {e}");
                self.wait().await.map(|_| ())
            }
        }
    }
}

/// SIGTERM the group, wait the grace period, then SIGKILL it
#[cfg(unix)]
async fn signal_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    // Group leaders have pgid == pid.
    let pgid = Pid::from_raw(raw);

    if let Err(errno) = killpg(pgid, Signal::SIGTERM) {
        tracing::debug!(pid, %errno, "SIGTERM to process group failed");
        return;
    }
    tokio::time::sleep(TERMINATE_GRACE).await;
    if let Err(errno) = killpg(pgid, Signal::SIGKILL) {
        tracing::trace!(pid, %errno, "SIGKILL to process group failed");
    }
}
