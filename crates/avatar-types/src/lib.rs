//! Shared types for the avatar session workspace.
//!
//! This crate provides the domain vocabulary used by every other crate:
//! the session lifecycle states and their transition graph, opaque session
//! and chat-scope identifiers, the redacting [`Credential`] wrapper, chat
//! turns, avatar start parameters, the timestamped status stream, and the
//! envelope-tolerant JSON decoder used for backend responses.
//!
//! Only `avatar-types` is shared between the session, voice and console
//! crates. This keeps the dependency graph flat.

pub mod envelope;
pub mod status;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use envelope::{decode_envelope, decode_envelope_str, EnvelopeError};
pub use status::{StatusReporter, StatusUpdate};

/// Lifecycle state of an avatar session.
///
/// `Idle` is both the initial and the terminal state: a controller returns
/// to it after every teardown or failure and may then be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session. Start is available.
    #[default]
    Idle,
    /// Waiting for the backend to issue a credential.
    Provisioning,
    /// Credential obtained; transport is being set up and the readiness
    /// gate has not opened yet.
    ConnectingTransport,
    /// Accepting utterances.
    Ready,
    /// One utterance is in flight (chat and speak).
    Speaking,
    /// Teardown in progress.
    Closing,
}

impl SessionState {
    /// Returns the string label for this state.
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Provisioning => "provisioning",
            Self::ConnectingTransport => "connecting_transport",
            Self::Ready => "ready",
            Self::Speaking => "speaking",
            Self::Closing => "closing",
        }
    }

    /// Whether `next` is reachable from `self` in one step.
    ///
    /// Failure edges lead back to `Idle` from every non-terminal state.
    /// `Closing` can be entered from any active state because close must be
    /// accepted mid-setup and mid-utterance.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Provisioning)
                | (Provisioning, ConnectingTransport)
                | (Provisioning, Idle)
                | (Provisioning, Closing)
                | (ConnectingTransport, Ready)
                | (ConnectingTransport, Idle)
                | (ConnectingTransport, Closing)
                | (Ready, Speaking)
                | (Ready, Closing)
                | (Ready, Idle)
                | (Speaking, Ready)
                | (Speaking, Closing)
                | (Speaking, Idle)
                | (Closing, Idle)
        )
    }

    /// Whether utterances are accepted (spoken now or queued).
    pub fn accepts_utterances(self) -> bool {
        matches!(self, Self::Ready | Self::Speaking)
    }

    /// Whether a session exists in any form.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Opaque session identifier issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Number of leading characters of a credential that may appear in logs.
const CREDENTIAL_VISIBLE_PREFIX: usize = 10;

/// Short-lived access credential for the transport and speak calls.
///
/// Deliberately has no `Display`: the only textual forms are
/// [`Credential::redacted`] and the redacting `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for request bodies and connection URLs only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// First ten characters followed by `...`.
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(CREDENTIAL_VISIBLE_PREFIX).collect();
        format!("{prefix}...")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.redacted()).finish()
    }
}

/// Identifier of a chat conversation on the backend.
///
/// Independent of the avatar [`SessionId`]: one scope survives any number
/// of avatar session restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatScopeId(Uuid);

impl ChatScopeId {
    /// Generates a fresh random scope.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChatScopeId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for ChatScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One exchange with the chat backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub scope_id: ChatScopeId,
    pub user_text: String,
    pub bot_text: String,
}

/// Avatar and voice selection passed to `start`.
///
/// All fields are opaque strings; unset fields are filled from configured
/// defaults before the credential request is sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvatarSelection {
    #[serde(rename = "avatarName", skip_serializing_if = "Option::is_none")]
    pub avatar_name: Option<String>,
    #[serde(rename = "voiceId", skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Speaking rate multiplier, 1.0 being normal speed.
    #[serde(rename = "voiceRate", skip_serializing_if = "Option::is_none")]
    pub voice_rate: Option<f32>,
    #[serde(rename = "voiceEmotion", skip_serializing_if = "Option::is_none")]
    pub voice_emotion: Option<String>,
    /// Knowledge base the avatar answers from, when the backend supports one.
    #[serde(rename = "knowledgeId", skip_serializing_if = "Option::is_none")]
    pub knowledge_id: Option<String>,
}

impl AvatarSelection {
    pub fn new(avatar_name: Option<String>, voice_id: Option<String>) -> Self {
        Self {
            avatar_name: avatar_name.filter(|s| !s.trim().is_empty()),
            voice_id: voice_id.filter(|s| !s.trim().is_empty()),
            ..Default::default()
        }
    }

    /// Fills every unset field from `defaults`.
    pub fn or(self, defaults: &AvatarSelection) -> Self {
        Self {
            avatar_name: self.avatar_name.or_else(|| defaults.avatar_name.clone()),
            voice_id: self.voice_id.or_else(|| defaults.voice_id.clone()),
            quality: self.quality.or_else(|| defaults.quality.clone()),
            language: self.language.or_else(|| defaults.language.clone()),
            voice_rate: self.voice_rate.or(defaults.voice_rate),
            voice_emotion: self.voice_emotion.or_else(|| defaults.voice_emotion.clone()),
            knowledge_id: self.knowledge_id.or_else(|| defaults.knowledge_id.clone()),
        }
    }
}
