//! Client sessions
//!
//! A [`Session`] is one connected client: every inbound message runs on its
//! own task, so a later prompt can preempt an earlier render while both
//! stream events into the session's channel. Events of one request arrive
//! in pipeline order; events of different requests may interleave and are
//! told apart by their request id.

use crate::events::{ClientMessage, EventSink, RequestEvent, ServerEvent};
use crate::orchestrator::RenderOrchestrator;
use crate::types::RequestId;
use forge_kernel::ClientId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One client's connection to the engine
#[derive(Debug)]
pub struct Session {
    client: ClientId,
    orchestrator: Arc<RenderOrchestrator>,
    events: mpsc::UnboundedSender<RequestEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Open a session for `client`, returning the receiving end of its
    /// event channel
    #[must_use]
    pub fn open(
        orchestrator: Arc<RenderOrchestrator>,
        client: ClientId,
    ) -> (Self, mpsc::UnboundedReceiver<RequestEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        tracing::info!(client = %client, "session opened");
        (
            Self {
                client,
                orchestrator,
                events,
                tasks: Vec::new(),
            },
            rx,
        )
    }

    #[inline]
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client
    }

    /// Start handling `message`
    pub fn dispatch(&mut self, message: ClientMessage) -> RequestId {
        self.tasks.retain(|task| !task.is_finished());
        let sink = EventSink::new(RequestId::new(), self.events.clone());
        let id = sink.request();
        let task = self.orchestrator.spawn(self.client.clone(), message, sink);
        self.tasks.push(task);
        id
    }

    /// Answer an unreadable inbound message with an error event
    ///
    /// The event travels through the session's channel like any other, under
    /// a fresh request id.
    pub fn reject(&self, details: impl Into<String>) -> RequestId {
        let sink = EventSink::new(RequestId::new(), self.events.clone());
        let details = details.into();
        tracing::warn!(client = %self.client, request = %sink.request(), "rejected message: {details}");
        sink.send(ServerEvent::error("invalid message", Some(details)));
        sink.request()
    }

    /// Requests still running
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tasks.iter().filter(|task| !task.is_finished()).count()
    }

    /// Wait for every request to finish, then close the event channel
    pub async fn close(self) {
        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                tracing::error!(client = %self.client, "request task failed: {e}");
            }
        }
        tracing::info!(client = %self.client, "session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForgeConfig;
    use forge_test_utils::{ScriptedBackend, TempWorkspace};

    #[tokio::test]
    async fn rejected_message_shares_the_session_channel() {
        let ws = TempWorkspace::new();
        let config = ForgeConfig::new().with_data_root(ws.root()).with_preview(false);
        let engine = RenderOrchestrator::open(config, Arc::new(ScriptedBackend::new()))
            .await
            .unwrap();
        let (session, mut rx) = Session::open(Arc::new(engine), ClientId::new("c1"));

        let id = session.reject("expected value at line 1 column 1");
        session.close().await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.request_id, id);
        assert!(matches!(
            event.event,
            ServerEvent::Error { ref message, details: Some(_) } if message == "invalid message"
        ));
        assert!(rx.recv().await.is_none());
    }
}
