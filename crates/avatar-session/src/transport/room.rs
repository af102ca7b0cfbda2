//! WebSocket room transport.
//!
//! The room is joined with the session credential as the `access_token`
//! query parameter. The room speaks typed JSON frames:
//!
//! | Direction | Frame |
//! |-----------|-------|
//! | room → us | `{"type":"ready"}` |
//! | room → us | `{"type":"track","kind":"video"}` |
//! | room → us | `{"type":"speaking_started"}` / `{"type":"speaking_stopped"}` |
//! | room → us | `{"type":"speak_ack","id":7,"success":true}` |
//! | room → us | `{"type":"error","message":"..."}` |
//! | us → room | `{"type":"speak","id":7,"text":"..."}` |
//! | us → room | `{"type":"leave"}` |
//!
//! A speak request resolves on the `speak_ack` with the same id. Losing the
//! socket emits [`TransportEvent::Disconnected`] and fails every pending
//! speak request.

use super::{Connection, Transport, TransportEvent, TransportHandle, TransportTarget};
use crate::config::TransportConfig;
use crate::error::SessionError;
use async_trait::async_trait;
use avatar_types::Credential;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

/// Outgoing frame buffer per connection.
const ROOM_COMMAND_CAPACITY: usize = 32;

/// How long `disconnect` waits for queued frames to be written.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RoomMessage {
    Ready,
    Track {
        kind: String,
    },
    SpeakingStarted,
    SpeakingStopped,
    SpeakAck {
        id: u64,
        #[serde(default = "acknowledged")]
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        message: String,
    },
}

fn acknowledged() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RoomCommand<'a> {
    Speak { id: u64, text: &'a str },
    Leave,
}

type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<(), SessionError>>>>>;

/// Joins WebSocket rooms.
#[derive(Debug, Clone)]
pub struct RoomTransport {
    connect_timeout: Duration,
    speak_timeout: Duration,
}

impl RoomTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self::with_timeouts(
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.speak_timeout_secs),
        )
    }

    pub fn with_timeouts(connect_timeout: Duration, speak_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            speak_timeout,
        }
    }
}

impl Default for RoomTransport {
    fn default() -> Self {
        Self::new(&TransportConfig::default())
    }
}

fn room_url(base: &str, credential: &Credential) -> Result<Url, SessionError> {
    let mut url = Url::parse(base)
        .map_err(|e| SessionError::Transport(format!("invalid room URL '{base}': {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(SessionError::Transport(format!(
            "room URL must use ws:// or wss://, got '{}'",
            url.scheme()
        )));
    }
    url.query_pairs_mut()
        .append_pair("access_token", credential.expose());
    Ok(url)
}

#[async_trait]
impl Transport for RoomTransport {
    fn name(&self) -> &'static str {
        "room"
    }

    fn needs_descriptor(&self) -> bool {
        true
    }

    async fn connect(
        &self,
        credential: &Credential,
        target: &TransportTarget,
    ) -> Result<Connection, SessionError> {
        let base = target.url().ok_or_else(|| {
            SessionError::Transport("backend did not provide a room URL".to_string())
        })?;
        let url = room_url(base, credential)?;

        info!(
            session_id = %target.session_id,
            host = url.host_str().unwrap_or("<none>"),
            credential = %credential.redacted(),
            "joining room"
        );

        let (socket, _) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                SessionError::Transport(format!(
                    "room connection timed out after {} seconds",
                    self.connect_timeout.as_secs()
                ))
            })?
            .map_err(|e| SessionError::Transport(format!("room connection failed: {e}")))?;

        let (mut sink, mut stream) = socket.split();
        let (event_tx, event_rx) = mpsc::channel(super::TRANSPORT_EVENT_CAPACITY);
        let (command_tx, mut command_rx) = mpsc::channel::<Message>(ROOM_COMMAND_CAPACITY);
        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));
        let left = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(frame) = command_rx.recv().await {
                let closing = matches!(frame, Message::Close(_));
                if sink.send(frame).await.is_err() || closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_pending = pending.clone();
        let reader_left = left.clone();
        let reader = tokio::spawn(async move {
            let mut reason = None;
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        dispatch(text.as_str(), &event_tx, &reader_pending).await;
                    }
                    Ok(Message::Close(frame)) => {
                        reason = frame.map(|f| f.reason.as_str().to_string());
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        reason = Some(e.to_string());
                        break;
                    }
                }
            }

            fail_pending(&reader_pending, "room connection closed");
            if !reader_left.load(Ordering::SeqCst) {
                let _ = event_tx
                    .send(TransportEvent::Disconnected {
                        reason: reason.filter(|r| !r.is_empty()),
                    })
                    .await;
            }
        });

        let handle = RoomHandle {
            commands: command_tx,
            pending,
            next_id: AtomicU64::new(1),
            speak_timeout: self.speak_timeout,
            left,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        };

        Ok(Connection {
            handle: Arc::new(handle),
            events: event_rx,
        })
    }
}

async fn dispatch(text: &str, events: &mpsc::Sender<TransportEvent>, pending: &PendingAcks) {
    let message = match serde_json::from_str::<RoomMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "ignoring unrecognised room frame");
            return;
        }
    };

    let event = match message {
        RoomMessage::Ready => TransportEvent::Ready,
        RoomMessage::Track { kind } => TransportEvent::MediaAvailable { kind },
        RoomMessage::SpeakingStarted => TransportEvent::SpeakingStarted,
        RoomMessage::SpeakingStopped => TransportEvent::SpeakingStopped,
        RoomMessage::SpeakAck { id, success, error } => {
            let waiter = lock(pending).remove(&id);
            match waiter {
                Some(tx) => {
                    let result = if success {
                        Ok(())
                    } else {
                        Err(SessionError::Speak(
                            error.unwrap_or_else(|| "room rejected the utterance".to_string()),
                        ))
                    };
                    let _ = tx.send(result);
                }
                None => debug!(id, "speak_ack for unknown request"),
            }
            return;
        }
        RoomMessage::Error { message } => {
            warn!(%message, "room reported an error");
            return;
        }
    };

    let _ = events.send(event).await;
}

fn lock(
    pending: &PendingAcks,
) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Result<(), SessionError>>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fail_pending(pending: &PendingAcks, reason: &str) {
    for (_, tx) in lock(pending).drain() {
        let _ = tx.send(Err(SessionError::Speak(reason.to_string())));
    }
}

struct RoomHandle {
    commands: mpsc::Sender<Message>,
    pending: PendingAcks,
    next_id: AtomicU64,
    speak_timeout: Duration,
    /// Set once we leave on purpose; suppresses the `Disconnected` event.
    left: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl RoomHandle {
    async fn send(&self, command: &RoomCommand<'_>) -> Result<(), SessionError> {
        let payload = serde_json::to_string(command)
            .map_err(|e| SessionError::Transport(format!("failed to encode room frame: {e}")))?;
        self.commands
            .send(Message::Text(payload.into()))
            .await
            .map_err(|_| SessionError::Transport("room connection closed".to_string()))
    }
}

#[async_trait]
impl TransportHandle for RoomHandle {
    async fn speak(&self, text: &str) -> Result<(), SessionError> {
        if self.left.load(Ordering::SeqCst) {
            return Err(SessionError::Speak("room has been left".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        if let Err(e) = self.send(&RoomCommand::Speak { id, text }).await {
            lock(&self.pending).remove(&id);
            return Err(SessionError::Speak(e.to_string()));
        }

        match tokio::time::timeout(self.speak_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Speak("room connection closed".to_string())),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(SessionError::Speak(format!(
                    "room did not acknowledge the utterance within {} seconds",
                    self.speak_timeout.as_secs()
                )))
            }
        }
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        if self.left.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let leave = self.send(&RoomCommand::Leave).await;
        let _ = self.commands.send(Message::Close(None)).await;
        fail_pending(&self.pending, "room has been left");

        if let Some(reader) = take_task(&self.reader) {
            reader.abort();
        }
        // Let the writer flush the leave and close frames.
        if let Some(mut writer) = take_task(&self.writer) {
            if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
                .await
                .is_err()
            {
                writer.abort();
            }
        }
        info!("left room");
        leave
    }
}

fn take_task(slot: &Mutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
    slot.lock().unwrap_or_else(|p| p.into_inner()).take()
}

impl Drop for RoomHandle {
    fn drop(&mut self) {
        for slot in [&self.reader, &self.writer] {
            if let Some(task) = take_task(slot) {
                task.abort();
            }
        }
    }
}
