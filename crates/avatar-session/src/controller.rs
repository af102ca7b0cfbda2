//! Session lifecycle controller.
//!
//! ```text
//! idle --start--> provisioning --credential--> connecting_transport
//! connecting_transport --gate open--> ready
//! ready --utterance--> speaking --ack--> ready
//! any active state --failure--> idle
//! any active state --close--> closing --teardown--> idle
//! ```
//!
//! State lives behind a short-lived mutex that is never held across an
//! await. Every session gets a fresh epoch; each async continuation checks
//! that its epoch is still current before touching state, so results that
//! arrive after a close (or a failure) are discarded instead of leaking
//! into the next session.
//!
//! The work of `start`, `send_utterance` and `close` runs in spawned tasks:
//! dropping the caller's future never strands the controller mid-transition.

use crate::backend::SessionBackend;
use crate::config::ReadinessConfig;
use crate::error::SessionError;
use crate::gate::ReadinessGate;
use crate::transport::{Connection, Transport, TransportEvent, TransportHandle, TransportTarget};
use avatar_types::{
    AvatarSelection, ChatScopeId, ChatTurn, Credential, SessionId, SessionState, StatusReporter,
    StatusUpdate,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Result of [`SessionController::send_utterance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtteranceOutcome {
    /// The reply was spoken.
    Spoken { bot_text: String },
    /// Held in the depth-1 queue behind the utterance in flight. A later
    /// utterance replaces it.
    Queued,
    /// Empty after trimming; nothing happened.
    Ignored,
    /// Not accepted in the current state (`NotReady` or `Busy`).
    Rejected(SessionError),
    /// Accepted but failed (`Chat` or `Speak`).
    Failed(SessionError),
    /// The session ended while the utterance was in flight.
    Discarded,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session_id: Option<SessionId>,
    pub has_credential: bool,
    pub has_transport: bool,
    pub queued_utterance: Option<String>,
    pub last_error: Option<SessionError>,
}

/// Construction options for [`SessionController`].
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    pub readiness: ReadinessConfig,
    /// Fills the unset fields of every `start` selection.
    pub avatar_defaults: AvatarSelection,
    pub status: StatusReporter,
}

struct ActiveSession {
    id: SessionId,
    credential: Credential,
    handle: Option<Arc<dyn TransportHandle>>,
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    epoch: u64,
    session: Option<ActiveSession>,
    queued: Option<String>,
    history: Vec<ChatTurn>,
    last_error: Option<SessionError>,
}

impl Inner {
    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {} -> {}",
            self.state,
            next
        );
        debug!(from = self.state.label(), to = next.label(), "session transition");
        self.state = next;
    }
}

enum Readiness {
    Open,
    Degraded,
    Cancelled,
}

struct Shared {
    backend: Arc<dyn SessionBackend>,
    transport: Arc<dyn Transport>,
    readiness: ReadinessConfig,
    avatar_defaults: AvatarSelection,
    status: StatusReporter,
    chat_scope: ChatScopeId,
    inner: Mutex<Inner>,
}

/// Owns one avatar session at a time and drives it through its lifecycle.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("transport", &self.shared.transport.name())
            .field("chat_scope", &self.shared.chat_scope)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionController {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        transport: Arc<dyn Transport>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                transport,
                readiness: options.readiness,
                avatar_defaults: options.avatar_defaults,
                status: options.status,
                chat_scope: ChatScopeId::generate(),
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Whether `start` is currently available.
    pub fn can_start(&self) -> bool {
        self.state() == SessionState::Idle
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.shared.lock();
        SessionSnapshot {
            state: inner.state,
            session_id: inner.session.as_ref().map(|s| s.id.clone()),
            has_credential: inner.session.is_some(),
            has_transport: inner
                .session
                .as_ref()
                .is_some_and(|s| s.handle.is_some()),
            queued_utterance: inner.queued.clone(),
            last_error: inner.last_error.clone(),
        }
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.shared.lock().last_error.clone()
    }

    /// Conversation log of this controller, across session restarts.
    pub fn history(&self) -> Vec<ChatTurn> {
        self.shared.lock().history.clone()
    }

    pub fn chat_scope(&self) -> ChatScopeId {
        self.shared.chat_scope
    }

    pub fn status(&self) -> &StatusReporter {
        &self.shared.status
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.shared.status.subscribe()
    }

    /// Provisions a credential, connects the transport and waits for the
    /// readiness gate. Returns the resulting state: `Ready` on success,
    /// `Idle` after any failure (with a status line and `last_error` set).
    pub async fn start(&self, selection: AvatarSelection) -> SessionState {
        let epoch = {
            let mut inner = self.shared.lock();
            if inner.state != SessionState::Idle {
                let state = inner.state;
                drop(inner);
                self.shared
                    .status
                    .report(format!("Session is already {state}; close it first"));
                return state;
            }
            inner.epoch += 1;
            inner.last_error = None;
            inner.transition(SessionState::Provisioning);
            inner.epoch
        };

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            if let Err(err) = shared.clone().run_start(epoch, selection).await {
                shared.abort_start(epoch, err).await;
            }
        });
        if let Err(e) = task.await {
            error!(error = %e, "start task failed");
            self.shared
                .abort_start(epoch, SessionError::Transport("session setup aborted".to_string()))
                .await;
        }
        self.state()
    }

    /// Sends `text` to the chat backend and has the avatar speak the reply.
    ///
    /// While another utterance is in flight the text is queued (depth 1,
    /// latest wins) and `Queued` is returned immediately. The caller of the
    /// first utterance gets its outcome as soon as that reply is spoken; the
    /// queued text is then spoken in the background and the session returns
    /// to `Ready` once the queue is empty.
    pub async fn send_utterance(&self, text: &str) -> UtteranceOutcome {
        let text = text.trim();
        if text.is_empty() {
            return UtteranceOutcome::Ignored;
        }

        let epoch = {
            let mut inner = self.shared.lock();
            match inner.state {
                SessionState::Ready => {
                    inner.transition(SessionState::Speaking);
                    inner.epoch
                }
                SessionState::Speaking => {
                    let replaced = inner.queued.replace(text.to_string());
                    drop(inner);
                    if let Some(replaced) = replaced {
                        self.shared
                            .status
                            .report(format!("Replaced queued utterance: {replaced}"));
                    }
                    self.shared.status.report(format!("Queued: {text}"));
                    return UtteranceOutcome::Queued;
                }
                SessionState::Closing => {
                    drop(inner);
                    return self.shared.reject(SessionError::Busy);
                }
                _ => {
                    drop(inner);
                    return self.shared.reject(SessionError::NotReady);
                }
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let worker = tokio::spawn(
            self.shared
                .clone()
                .drive_utterances(epoch, text.to_string(), reply_tx),
        );
        let shared = self.shared.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                error!(error = %e, "utterance task failed");
                shared.finish_utterances(epoch);
            }
        });

        match reply_rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                let err = SessionError::Speak("utterance task failed".to_string());
                self.shared.finish_utterances(epoch);
                self.shared.record_error(&err);
                UtteranceOutcome::Failed(err)
            }
        }
    }

    /// Tears the session down. Idempotent: with no session it only reports
    /// "No active session".
    pub async fn close(&self) -> SessionState {
        let shared = self.shared.clone();
        match tokio::spawn(async move { shared.run_close().await }).await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "close task failed");
                self.state()
            }
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lock().epoch == epoch
    }

    fn record_error(&self, err: &SessionError) {
        self.lock().last_error = Some(err.clone());
    }

    fn reject(&self, err: SessionError) -> UtteranceOutcome {
        self.status.report(err.status_message());
        UtteranceOutcome::Rejected(err)
    }

    async fn run_start(
        self: Arc<Self>,
        epoch: u64,
        selection: AvatarSelection,
    ) -> Result<(), SessionError> {
        let selection = selection.or(&self.avatar_defaults);

        self.status.report("Getting access token...");
        let grant = self
            .backend
            .create_session(&selection)
            .await
            .map_err(|e| SessionError::Credential(e.to_string()))?;
        info!(
            session_id = %grant.session_id,
            credential = %grant.credential.redacted(),
            "credential obtained"
        );

        let recorded = {
            let mut inner = self.lock();
            let current = inner.epoch == epoch;
            if current {
                inner.session = Some(ActiveSession {
                    id: grant.session_id.clone(),
                    credential: grant.credential.clone(),
                    handle: None,
                });
                inner.transition(SessionState::ConnectingTransport);
            }
            current
        };
        if !recorded {
            self.release_orphan(&grant.session_id, &grant.credential)
                .await;
            return Ok(());
        }

        self.status.report("Initializing avatar...");
        let mut target = TransportTarget {
            session_id: grant.session_id.clone(),
            grant_url: grant.transport_url.clone(),
            descriptor: Default::default(),
        };
        let mut gate = ReadinessGate::new(self.backend.requires_start());
        let start_error = |e: crate::error::BackendError| {
            SessionError::Credential(format!("session start failed: {e}"))
        };

        let connection = if self.transport.needs_descriptor() {
            if !gate.has_backend_ack() {
                self.status.report("Starting avatar session...");
                target.descriptor = self
                    .backend
                    .start_session(&grant.session_id, &grant.credential)
                    .await
                    .map_err(start_error)?;
                gate.acknowledge();
            }
            if !self.is_current(epoch) {
                return Ok(());
            }
            self.transport.connect(&grant.credential, &target).await?
        } else {
            // The transport does not depend on the start call; its ready
            // signal may land before the backend acknowledges.
            let ack_required = !gate.has_backend_ack();
            if ack_required {
                self.status.report("Starting avatar session...");
            }
            let start = async {
                if ack_required {
                    self.backend
                        .start_session(&grant.session_id, &grant.credential)
                        .await
                        .map(Some)
                } else {
                    Ok(None)
                }
            };
            let (connected, started) =
                tokio::join!(self.transport.connect(&grant.credential, &target), start);
            match (connected, started) {
                (Ok(connection), Ok(_)) => {
                    gate.acknowledge();
                    connection
                }
                (Ok(connection), Err(e)) => {
                    disconnect_quietly(connection.handle.as_ref()).await;
                    return Err(start_error(e));
                }
                (Err(e), _) => return Err(e),
            }
        };

        let Connection { handle, mut events } = connection;
        let attached = {
            let mut inner = self.lock();
            let current = inner.epoch == epoch;
            match inner.session.as_mut() {
                Some(session) if current => {
                    session.handle = Some(handle.clone());
                    true
                }
                _ => false,
            }
        };
        if !attached {
            disconnect_quietly(handle.as_ref()).await;
            return Ok(());
        }

        match self.await_readiness(epoch, &mut gate, &mut events).await? {
            Readiness::Cancelled => return Ok(()),
            Readiness::Open => self.status.report("Avatar stream ready!"),
            Readiness::Degraded => {}
        }

        {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                return Ok(());
            }
            inner.transition(SessionState::Ready);
        }
        self.status.report("Avatar ready for conversation!");

        tokio::spawn(self.clone().pump_events(epoch, events));
        Ok(())
    }

    /// Bounded wait for the transport's ready signal: `poll_attempts`
    /// windows of `poll_interval` each.
    async fn await_readiness(
        &self,
        epoch: u64,
        gate: &mut ReadinessGate,
        events: &mut mpsc::Receiver<TransportEvent>,
    ) -> Result<Readiness, SessionError> {
        let attempts = self.readiness.poll_attempts.max(1);
        let interval = self.readiness.poll_interval();

        for attempt in 1..=attempts {
            if !self.is_current(epoch) {
                return Ok(Readiness::Cancelled);
            }

            let deadline = Instant::now() + interval;
            loop {
                match tokio::time::timeout_at(deadline, events.recv()).await {
                    Ok(Some(TransportEvent::Ready)) => {
                        gate.mark_transport_ready();
                        if gate.is_open() {
                            return Ok(Readiness::Open);
                        }
                    }
                    Ok(Some(TransportEvent::MediaAvailable { kind })) => {
                        self.status.report(format!("Avatar {kind} track available"));
                    }
                    Ok(Some(TransportEvent::Disconnected { reason })) => {
                        return Err(SessionError::Transport(format!(
                            "stream disconnected before it was ready{}",
                            reason.map(|r| format!(": {r}")).unwrap_or_default()
                        )));
                    }
                    Ok(Some(other)) => debug!(event = ?other, "event before readiness"),
                    Ok(None) => {
                        if !self.is_current(epoch) {
                            return Ok(Readiness::Cancelled);
                        }
                        return Err(SessionError::Transport(
                            "transport closed before it was ready".to_string(),
                        ));
                    }
                    Err(_) => break,
                }
            }
            debug!(attempt, attempts, missing = gate.missing(), "waiting for readiness");
        }

        let waited = self.readiness.max_wait().as_secs_f64();
        if self.readiness.degraded_start && gate.backend_acknowledged() {
            warn!(
                waited_secs = waited,
                missing = gate.missing(),
                "readiness not confirmed; continuing in degraded mode"
            );
            self.status.report_error(format!(
                "Warning: avatar stream not confirmed ready after {waited:.1}s, continuing"
            ));
            return Ok(Readiness::Degraded);
        }

        Err(SessionError::Transport(format!(
            "avatar stream did not become ready within {waited:.1} seconds (missing {})",
            gate.missing()
        )))
    }

    /// Unwinds a failed start back to `Idle`.
    async fn abort_start(&self, epoch: u64, err: SessionError) {
        let session = {
            let mut inner = self.lock();
            if inner.epoch != epoch || !inner.state.is_active() {
                debug!(error = %err, "ignoring failure of a superseded start");
                return;
            }
            if inner.state == SessionState::Closing {
                // close() owns the teardown.
                return;
            }
            inner.last_error = Some(err.clone());
            inner.queued = None;
            inner.transition(SessionState::Idle);
            inner.session.take()
        };

        self.status.report_error(err.status_message());
        if let Some(session) = session {
            self.release(session).await;
        }
    }

    /// Consumes transport events for a ready session until it ends.
    async fn pump_events(self: Arc<Self>, epoch: u64, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            if !self.is_current(epoch) {
                break;
            }
            match event {
                TransportEvent::SpeakingStarted => self.status.report("Avatar is speaking..."),
                TransportEvent::SpeakingStopped => self.status.report("Avatar finished speaking"),
                TransportEvent::MediaAvailable { kind } => {
                    self.status.report(format!("Avatar {kind} track available"));
                }
                TransportEvent::Ready => debug!("duplicate ready signal"),
                TransportEvent::Disconnected { reason } => {
                    let err = SessionError::Transport(match reason {
                        Some(reason) => format!("stream disconnected: {reason}"),
                        None => "stream disconnected".to_string(),
                    });
                    self.fail_session(epoch, err).await;
                    break;
                }
            }
        }
        debug!(epoch, "transport event stream finished");
    }

    /// Ends a live session after a transport failure.
    async fn fail_session(&self, epoch: u64, err: SessionError) {
        let session = {
            let mut inner = self.lock();
            if inner.epoch != epoch || !inner.state.accepts_utterances() {
                return;
            }
            // Invalidate every continuation of this session.
            inner.epoch += 1;
            inner.last_error = Some(err.clone());
            inner.queued = None;
            inner.transition(SessionState::Idle);
            inner.session.take()
        };

        warn!(error = %err, "session lost");
        self.status.report_error("Stream disconnected");
        if let Some(session) = session {
            self.release(session).await;
        }
    }

    /// Speaks `first`, answers `reply` with its outcome, then drains the
    /// queue until it is empty or the session changes.
    async fn drive_utterances(
        self: Arc<Self>,
        epoch: u64,
        first: String,
        reply: oneshot::Sender<UtteranceOutcome>,
    ) {
        let mut reply = Some(reply);
        let mut next = Some(first);

        while let Some(text) = next.take() {
            let outcome = self.speak_one(epoch, &text).await;
            let discarded = outcome == UtteranceOutcome::Discarded;
            match reply.take() {
                Some(reply) => {
                    let _ = reply.send(outcome);
                }
                None => debug!(?outcome, "queued utterance finished"),
            }
            if discarded {
                return;
            }

            let mut inner = self.lock();
            if inner.epoch != epoch {
                break;
            }
            match inner.queued.take() {
                Some(queued) => next = Some(queued),
                None => {
                    if inner.state == SessionState::Speaking {
                        inner.transition(SessionState::Ready);
                    }
                }
            }
        }
    }

    /// Returns the session to `Ready` after an utterance task died.
    fn finish_utterances(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch == epoch && inner.state == SessionState::Speaking {
            inner.queued = None;
            inner.transition(SessionState::Ready);
        }
    }

    async fn speak_one(&self, epoch: u64, text: &str) -> UtteranceOutcome {
        self.status.report(format!("You: {text}"));
        self.status.report("Sending to AI...");

        let reply = self.backend.chat(&self.chat_scope, text).await;

        let handle = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                return UtteranceOutcome::Discarded;
            }
            let bot_text = match &reply {
                Ok(bot_text) => bot_text.clone(),
                Err(e) => {
                    let err = SessionError::Chat(e.to_string());
                    inner.last_error = Some(err.clone());
                    drop(inner);
                    self.status.report_error(err.status_message());
                    return UtteranceOutcome::Failed(err);
                }
            };
            inner.history.push(ChatTurn {
                scope_id: self.chat_scope,
                user_text: text.to_string(),
                bot_text,
            });
            inner.session.as_ref().and_then(|s| s.handle.clone())
        };
        let bot_text = reply.unwrap_or_default();
        self.status.report(format!("AI: {bot_text}"));

        let Some(handle) = handle else {
            let err = SessionError::NotReady;
            self.record_error(&err);
            self.status.report_error(err.status_message());
            return UtteranceOutcome::Failed(err);
        };

        let spoken = handle.speak(&bot_text).await;
        if !self.is_current(epoch) {
            return UtteranceOutcome::Discarded;
        }
        match spoken {
            Ok(()) => UtteranceOutcome::Spoken { bot_text },
            Err(e) => {
                let err = match e {
                    SessionError::Speak(_) => e,
                    other => SessionError::Speak(other.to_string()),
                };
                self.record_error(&err);
                self.status.report_error(err.status_message());
                UtteranceOutcome::Failed(err)
            }
        }
    }

    async fn run_close(&self) -> SessionState {
        let (epoch, session) = {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Idle => {
                    drop(inner);
                    self.status.report("No active session");
                    return SessionState::Idle;
                }
                SessionState::Closing => {
                    drop(inner);
                    self.status.report("Session is already closing");
                    return SessionState::Closing;
                }
                _ => {}
            }
            inner.epoch += 1;
            inner.queued = None;
            inner.transition(SessionState::Closing);
            (inner.epoch, inner.session.take())
        };

        self.status.report("Closing session...");
        if let Some(session) = session {
            info!(session_id = %session.id, "closing session");
            self.release(session).await;
        }

        {
            let mut inner = self.lock();
            if inner.epoch == epoch && inner.state == SessionState::Closing {
                inner.transition(SessionState::Idle);
            }
        }
        self.status.report("Session closed");
        SessionState::Idle
    }

    /// Best-effort teardown of a session's transport and backend state.
    /// Failures are reported, never propagated.
    async fn release(&self, session: ActiveSession) {
        if let Some(handle) = session.handle {
            if let Err(e) = handle.disconnect().await {
                warn!(session_id = %session.id, error = %e, "transport teardown failed");
                self.status.report_error(format!("Close error: {e}"));
            }
        }
        if let Err(e) = self
            .backend
            .close_session(&session.id, &session.credential)
            .await
        {
            warn!(session_id = %session.id, error = %e, "backend close failed");
        }
    }

    /// Closes a session whose start was superseded before it was recorded.
    async fn release_orphan(&self, session_id: &SessionId, credential: &Credential) {
        debug!(%session_id, "releasing session issued after close");
        if let Err(e) = self.backend.close_session(session_id, credential).await {
            warn!(%session_id, error = %e, "backend close of orphaned session failed");
        }
    }
}

async fn disconnect_quietly(handle: &dyn TransportHandle) {
    if let Err(e) = handle.disconnect().await {
        warn!(error = %e, "transport teardown failed");
    }
}
