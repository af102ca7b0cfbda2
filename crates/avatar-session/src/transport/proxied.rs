use super::{Connection, Transport, TransportEvent, TransportHandle, TransportTarget};
use crate::backend::SessionBackend;
use crate::error::SessionError;
use async_trait::async_trait;
use avatar_types::{Credential, SessionId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Backend-proxied transport: the avatar stream is owned by the backend and
/// every utterance is relayed through its speak endpoint.
#[derive(Clone)]
pub struct ProxiedTransport {
    backend: Arc<dyn SessionBackend>,
}

impl ProxiedTransport {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Transport for ProxiedTransport {
    fn name(&self) -> &'static str {
        "proxied"
    }

    fn needs_descriptor(&self) -> bool {
        false
    }

    async fn connect(
        &self,
        credential: &Credential,
        target: &TransportTarget,
    ) -> Result<Connection, SessionError> {
        if credential.is_empty() {
            return Err(SessionError::Transport(
                "cannot connect without a credential".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(super::TRANSPORT_EVENT_CAPACITY);
        info!(session_id = %target.session_id, "proxied transport attached");

        // The backend holds the stream; it is renderable as soon as we are
        // attached.
        let _ = tx.try_send(TransportEvent::Ready);

        let handle = ProxiedHandle {
            backend: self.backend.clone(),
            session_id: target.session_id.clone(),
            credential: credential.clone(),
            events: tx,
            connected: AtomicBool::new(true),
        };
        Ok(Connection {
            handle: Arc::new(handle),
            events: rx,
        })
    }
}

struct ProxiedHandle {
    backend: Arc<dyn SessionBackend>,
    session_id: SessionId,
    credential: Credential,
    events: mpsc::Sender<TransportEvent>,
    connected: AtomicBool,
}

#[async_trait]
impl TransportHandle for ProxiedHandle {
    async fn speak(&self, text: &str) -> Result<(), SessionError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SessionError::Speak(
                "transport is disconnected".to_string(),
            ));
        }

        let _ = self.events.try_send(TransportEvent::SpeakingStarted);
        let result = self
            .backend
            .speak(&self.session_id, &self.credential, text)
            .await
            .map_err(|e| SessionError::Speak(e.to_string()));
        let _ = self.events.try_send(TransportEvent::SpeakingStopped);
        result
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!(session_id = %self.session_id, "proxied transport detached");
        }
        Ok(())
    }
}
