use avatar_types::EnvelopeError;
use thiserror::Error;

/// Session-level failure taxonomy.
///
/// None of these escape the controller's public operations: each one is
/// converted to a status line and a return to a safe state (`Idle` for
/// session-level failures, `Ready` for per-utterance failures).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Credential or session creation failed. The user must start again.
    #[error("credential error: {0}")]
    Credential(String),

    /// Transport setup, readiness, or the live connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The chat backend failed. The session stays usable.
    #[error("chat error: {0}")]
    Chat(String),

    /// The avatar could not speak the reply. The session stays usable.
    #[error("speak error: {0}")]
    Speak(String),

    /// A speak request could not be accepted right now.
    #[error("avatar is busy")]
    Busy,

    /// The session is not ready to accept utterances.
    #[error("avatar not ready")]
    NotReady,
}

impl SessionError {
    /// Human-readable status line for this failure.
    pub fn status_message(&self) -> String {
        match self {
            Self::Credential(msg) | Self::Transport(msg) => format!("Error: {msg}"),
            Self::Chat(msg) => format!("AI error: {msg}"),
            Self::Speak(msg) => format!("Speak error: {msg}"),
            Self::Busy => "Avatar is busy, please wait...".to_string(),
            Self::NotReady => "Avatar not ready yet, please wait...".to_string(),
        }
    }
}

/// Errors from the backend HTTP collaborator.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// The backend answered but refused the operation.
    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("invalid backend configuration: {0}")]
    Config(String),
}
