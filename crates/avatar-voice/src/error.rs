use avatar_types::EnvelopeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("microphone error: {0}")]
    Microphone(String),

    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("no recording in progress")]
    NotRecording,

    #[error("recording captured no audio")]
    EmptyRecording,

    #[error("recording exceeds maximum size: {size} bytes (limit: {limit} bytes)")]
    TooLarge { size: usize, limit: usize },

    #[error("Transcription failed: {0}")]
    Status(u16),

    #[error("transcription request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("transcription timed out after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
