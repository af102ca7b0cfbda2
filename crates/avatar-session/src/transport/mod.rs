//! Transport collaborator: the media connection that renders the avatar.
//!
//! A [`Transport`] turns a credential and a [`TransportTarget`] into a
//! [`Connection`]: a shared [`TransportHandle`] for speak/disconnect plus a
//! channel of [`TransportEvent`]s. Events may arrive at any time after
//! `connect` returns, including before the backend has acknowledged the
//! session start; the controller buffers them in the channel and evaluates
//! its readiness gate from there.

pub mod proxied;
pub mod room;

use crate::backend::TransportDescriptor;
use crate::error::SessionError;
use async_trait::async_trait;
use avatar_types::{Credential, SessionId};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use proxied::ProxiedTransport;
pub use room::RoomTransport;

/// Capacity of the per-connection event channel.
pub const TRANSPORT_EVENT_CAPACITY: usize = 64;

/// Events emitted by a live transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The stream can render speech.
    Ready,
    /// A media track became available (`"audio"`, `"video"`, ...).
    MediaAvailable { kind: String },
    SpeakingStarted,
    SpeakingStopped,
    /// The connection was lost without a local `disconnect`.
    Disconnected { reason: Option<String> },
}

/// Where to connect.
#[derive(Debug, Clone)]
pub struct TransportTarget {
    pub session_id: SessionId,
    /// URL issued together with the credential, if any.
    pub grant_url: Option<String>,
    /// Descriptor from the backend start call. Empty when the transport is
    /// connected before (or without) the start call.
    pub descriptor: TransportDescriptor,
}

impl TransportTarget {
    /// The start descriptor's URL wins over the grant's.
    pub fn url(&self) -> Option<&str> {
        self.descriptor
            .url
            .as_deref()
            .or(self.grant_url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }
}

/// A connected transport.
pub struct Connection {
    pub handle: Arc<dyn TransportHandle>,
    pub events: mpsc::Receiver<TransportEvent>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Factory for transport connections.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `connect` needs the start descriptor. When `false` the
    /// controller connects concurrently with the backend start call.
    fn needs_descriptor(&self) -> bool;

    async fn connect(
        &self,
        credential: &Credential,
        target: &TransportTarget,
    ) -> Result<Connection, SessionError>;
}

/// Operations on a live connection.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Speaks `text`; resolves once the transport acknowledges it.
    async fn speak(&self, text: &str) -> Result<(), SessionError>;

    /// Tears the connection down. Must be safe to call more than once.
    async fn disconnect(&self) -> Result<(), SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(grant_url: Option<&str>, descriptor_url: Option<&str>) -> TransportTarget {
        TransportTarget {
            session_id: SessionId::new("s-1"),
            grant_url: grant_url.map(str::to_string),
            descriptor: TransportDescriptor {
                url: descriptor_url.map(str::to_string),
                ..Default::default()
            },
        }
    }

    #[test]
    fn descriptor_url_takes_precedence() {
        assert_eq!(
            target(Some("ws://grant"), Some("ws://start")).url(),
            Some("ws://start")
        );
        assert_eq!(target(Some("ws://grant"), None).url(), Some("ws://grant"));
        assert_eq!(target(None, None).url(), None);
        assert_eq!(target(Some(" "), None).url(), None);
    }
}
