//! Avatar session lifecycle.
//!
//! A [`SessionController`] provisions a session credential from the
//! backend, connects a [`Transport`] to the avatar stream, waits until both
//! the transport and the backend report the session ready, and then turns
//! user utterances into chat replies the avatar speaks.
//!
//! Two transports are provided: [`ProxiedTransport`], which relays every
//! utterance through the backend's speak endpoint, and [`RoomTransport`],
//! which joins the avatar's media room over a WebSocket.

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod gate;
pub mod transport;

pub use backend::{HttpBackend, IceServer, SessionBackend, SessionGrant, TransportDescriptor};
pub use config::{AvatarDefaults, BackendConfig, ReadinessConfig, TransportConfig, TransportKind};
pub use controller::{ControllerOptions, SessionController, SessionSnapshot, UtteranceOutcome};
pub use error::{BackendError, SessionError};
pub use gate::ReadinessGate;
pub use transport::{
    Connection, ProxiedTransport, RoomTransport, Transport, TransportEvent, TransportHandle,
    TransportTarget,
};
