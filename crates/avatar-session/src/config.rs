use avatar_types::AvatarSelection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_create_path() -> String {
    "/heygen/create".to_string()
}

fn default_start_path() -> Option<String> {
    Some("/heygen/start".to_string())
}

fn default_chat_path() -> String {
    "/chat".to_string()
}

fn default_speak_path() -> String {
    "/heygen/speak".to_string()
}

fn default_close_path() -> String {
    "/heygen/close".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Endpoints of the session backend (credential, start, chat, speak, close).
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_create_path")]
    pub create_path: String,
    /// Second call that starts a created session. `None` when the backend
    /// starts sessions on creation; the readiness gate then only waits for
    /// the transport.
    #[serde(default = "default_start_path")]
    pub start_path: Option<String>,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    #[serde(default = "default_speak_path")]
    pub speak_path: String,
    #[serde(default = "default_close_path")]
    pub close_path: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Sent as the `Origin` header when set.
    #[serde(default)]
    pub origin: Option<String>,
    /// Sent as the `x-api-key` header when set.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            create_path: default_create_path(),
            start_path: default_start_path(),
            chat_path: default_chat_path(),
            speak_path: default_speak_path(),
            close_path: default_close_path(),
            request_timeout_secs: default_request_timeout_secs(),
            origin: None,
            api_key: None,
        }
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("create_path", &self.create_path)
            .field("start_path", &self.start_path)
            .field("chat_path", &self.chat_path)
            .field("speak_path", &self.speak_path)
            .field("close_path", &self.close_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("origin", &self.origin)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Joins `path` onto the base URL without doubling slashes.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_poll_attempts() -> u32 {
    20
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// Bounds for the readiness wait in `connecting_transport`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Proceed to `ready` with a warning when the backend acknowledged the
    /// start but the transport never signalled readiness.
    #[serde(default)]
    pub degraded_start: bool,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            degraded_start: false,
        }
    }
}

impl ReadinessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Upper bound of the whole readiness wait. Default: 10 seconds.
    pub fn max_wait(&self) -> Duration {
        self.poll_interval() * self.poll_attempts.max(1)
    }
}

fn default_avatar_name() -> Option<String> {
    Some("Wayne_20240711".to_string())
}

fn default_quality() -> Option<String> {
    Some("low".to_string())
}

fn default_language() -> Option<String> {
    Some("en".to_string())
}

fn default_voice_rate() -> Option<f32> {
    Some(1.0)
}

fn default_voice_emotion() -> Option<String> {
    Some("EXCITED".to_string())
}

/// Avatar start parameters used when `start` leaves them unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarDefaults {
    #[serde(default = "default_avatar_name")]
    pub avatar_name: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default = "default_quality")]
    pub quality: Option<String>,
    #[serde(default = "default_language")]
    pub language: Option<String>,
    #[serde(default = "default_voice_rate")]
    pub voice_rate: Option<f32>,
    #[serde(default = "default_voice_emotion")]
    pub voice_emotion: Option<String>,
    #[serde(default)]
    pub knowledge_id: Option<String>,
}

impl Default for AvatarDefaults {
    fn default() -> Self {
        Self {
            avatar_name: default_avatar_name(),
            voice_id: None,
            quality: default_quality(),
            language: default_language(),
            voice_rate: default_voice_rate(),
            voice_emotion: default_voice_emotion(),
            knowledge_id: None,
        }
    }
}

impl AvatarDefaults {
    pub fn selection(&self) -> AvatarSelection {
        AvatarSelection {
            avatar_name: self.avatar_name.clone(),
            voice_id: self.voice_id.clone(),
            quality: self.quality.clone(),
            language: self.language.clone(),
            voice_rate: self.voice_rate,
            voice_emotion: self.voice_emotion.clone(),
            knowledge_id: self.knowledge_id.clone(),
        }
    }
}

/// Which transport implementation the composition root wires in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Speak requests relayed through the backend.
    #[default]
    Proxied,
    /// WebSocket room connection.
    Room,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proxied" => Ok(Self::Proxied),
            "room" => Ok(Self::Room),
            other => Err(format!("unknown transport kind: {other}")),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_speak_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Maximum wait for a room to acknowledge one utterance.
    #[serde(default = "default_speak_timeout_secs")]
    pub speak_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            connect_timeout_secs: default_connect_timeout_secs(),
            speak_timeout_secs: default_speak_timeout_secs(),
        }
    }
}
