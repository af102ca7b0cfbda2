use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Maximum recording size accepted for transcription (10 MiB).
pub const DEFAULT_MAX_RECORDING_BYTES: usize = 10 * 1024 * 1024;

fn default_enabled() -> bool {
    true
}

fn default_max_recording_bytes() -> usize {
    DEFAULT_MAX_RECORDING_BYTES
}

fn default_transcribe_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Multipart transcription endpoint. Voice input is unavailable
    /// without it.
    #[serde(default)]
    pub transcribe_url: Option<String>,
    #[serde(default = "default_max_recording_bytes")]
    pub max_recording_bytes: usize,
    #[serde(default = "default_transcribe_timeout_secs")]
    pub transcribe_timeout_secs: u64,
    /// Clip recorded by `/voice` when no clip is named.
    #[serde(default)]
    pub default_clip: Option<PathBuf>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            transcribe_url: None,
            max_recording_bytes: default_max_recording_bytes(),
            transcribe_timeout_secs: default_transcribe_timeout_secs(),
            default_clip: None,
        }
    }
}

impl VoiceConfig {
    pub fn transcribe_timeout(&self) -> Duration {
        Duration::from_secs(self.transcribe_timeout_secs)
    }

    /// Whether voice input can be offered at all.
    pub fn is_available(&self) -> bool {
        self.enabled
            && self
                .transcribe_url
                .as_deref()
                .is_some_and(|url| !url.trim().is_empty())
    }
}
