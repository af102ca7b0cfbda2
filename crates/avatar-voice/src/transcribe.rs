use crate::config::VoiceConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use avatar_types::decode_envelope_str;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Text used when the service answers without a transcript.
pub const FALLBACK_TRANSCRIPT: &str = "Could not transcribe audio";

const AUDIO_FIELD: &str = "audio";
const AUDIO_FILE_NAME: &str = "recording.webm";
const AUDIO_MIME: &str = "audio/webm";

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, VoiceError>;
}

#[derive(Deserialize)]
struct TranscriptReply {
    #[serde(default, alias = "text")]
    transcript: Option<String>,
}

/// Posts recordings to a multipart transcription endpoint.
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    client: Client,
    url: String,
    max_bytes: usize,
    timeout: Duration,
}

impl HttpTranscriber {
    pub fn new(config: &VoiceConfig) -> Result<Self, VoiceError> {
        let url = config
            .transcribe_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| VoiceError::Config("voice.transcribe_url is not set".to_string()))?;

        Ok(Self {
            client: Client::new(),
            url: url.to_string(),
            max_bytes: config.max_recording_bytes,
            timeout: config.transcribe_timeout(),
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, VoiceError> {
        if audio.len() > self.max_bytes {
            return Err(VoiceError::TooLarge {
                size: audio.len(),
                limit: self.max_bytes,
            });
        }

        let size = audio.len();
        let part = Part::bytes(audio)
            .file_name(AUDIO_FILE_NAME)
            .mime_str(AUDIO_MIME)?;
        let form = Form::new().part(AUDIO_FIELD, part);

        let request = async {
            let response = self.client.post(&self.url).multipart(form).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(VoiceError::Status(status.as_u16()));
            }
            Ok::<_, VoiceError>(response.text().await?)
        };
        let text = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| VoiceError::Timeout(self.timeout.as_secs()))??;
        debug!(bytes = size, response_bytes = text.len(), "transcription response");

        if text.trim().is_empty() {
            return Ok(FALLBACK_TRANSCRIPT.to_string());
        }
        let reply: TranscriptReply = decode_envelope_str(&text)?;
        Ok(reply
            .transcript
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_TRANSCRIPT.to_string()))
    }
}
