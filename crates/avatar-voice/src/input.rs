//! Record-then-transcribe voice input.

use crate::error::VoiceError;
use crate::microphone::{Microphone, TrackGuard};
use crate::transcribe::Transcriber;
use avatar_types::StatusReporter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How long a stopped capture may take to flush its last chunks.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of [`VoiceInput::toggle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceToggle {
    Started,
    Transcribed(String),
}

struct Recording {
    tracks: TrackGuard,
    collector: JoinHandle<Result<Vec<u8>, VoiceError>>,
}

/// One microphone, one recording at a time.
///
/// The microphone is held only while recording: its tracks are stopped as
/// soon as the recorded chunks are collected, before the clip is sent for
/// transcription, whatever the outcome.
pub struct VoiceInput {
    microphone: Arc<dyn Microphone>,
    transcriber: Arc<dyn Transcriber>,
    status: StatusReporter,
    max_recording_bytes: usize,
    recording: Mutex<Option<Recording>>,
}

impl std::fmt::Debug for VoiceInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceInput")
            .field("max_recording_bytes", &self.max_recording_bytes)
            .finish_non_exhaustive()
    }
}

impl VoiceInput {
    pub fn new(
        microphone: Arc<dyn Microphone>,
        transcriber: Arc<dyn Transcriber>,
        status: StatusReporter,
        max_recording_bytes: usize,
    ) -> Self {
        Self {
            microphone,
            transcriber,
            status,
            max_recording_bytes,
            recording: Mutex::new(None),
        }
    }

    pub async fn is_recording(&self) -> bool {
        self.recording.lock().await.is_some()
    }

    pub async fn toggle(&self) -> Result<VoiceToggle, VoiceError> {
        if self.is_recording().await {
            self.stop_recording().await.map(VoiceToggle::Transcribed)
        } else {
            self.start_recording().await.map(|()| VoiceToggle::Started)
        }
    }

    pub async fn start_recording(&self) -> Result<(), VoiceError> {
        let mut slot = self.recording.lock().await;
        if slot.is_some() {
            return Err(VoiceError::AlreadyRecording);
        }

        let capture = match self.microphone.open().await {
            Ok(capture) => capture,
            Err(e) => {
                self.status.report_error(format!("Error: {e}"));
                return Err(e);
            }
        };

        let collector = tokio::spawn(collect(capture.chunks, self.max_recording_bytes));
        *slot = Some(Recording {
            tracks: TrackGuard::new(capture.tracks),
            collector,
        });

        info!("voice recording started");
        self.status.report("Voice recording started");
        Ok(())
    }

    /// Stops the recording, releases the microphone and transcribes the clip.
    pub async fn stop_recording(&self) -> Result<String, VoiceError> {
        let Recording {
            mut tracks,
            mut collector,
        } = self
            .recording
            .lock()
            .await
            .take()
            .ok_or(VoiceError::NotRecording)?;

        // Stopping the tracks ends the chunk stream once the source has
        // flushed what it already captured.
        tracks.release();
        let collected = tokio::time::timeout(FLUSH_TIMEOUT, &mut collector).await;
        self.status.report("Voice recording stopped, transcribing...");

        let audio = match collected {
            Ok(Ok(Ok(audio))) => audio,
            Ok(Ok(Err(e))) => return Err(self.transcription_failed(e)),
            Ok(Err(e)) => {
                return Err(self.transcription_failed(VoiceError::Microphone(format!(
                    "recording task failed: {e}"
                ))))
            }
            Err(_) => {
                collector.abort();
                return Err(self.transcription_failed(VoiceError::Microphone(
                    "capture did not finish after stop".to_string(),
                )));
            }
        };
        if audio.is_empty() {
            return Err(self.transcription_failed(VoiceError::EmptyRecording));
        }

        self.status.report("Sending audio for transcription...");
        match self.transcriber.transcribe(audio).await {
            Ok(text) => {
                self.status.report(format!("Transcribed: \"{text}\""));
                Ok(text)
            }
            Err(e) => Err(self.transcription_failed(e)),
        }
    }

    fn transcription_failed(&self, err: VoiceError) -> VoiceError {
        warn!(error = %err, "voice input failed");
        self.status.report_error(format!("Transcription error: {err}"));
        err
    }
}

/// Gathers chunks until the source closes the stream.
async fn collect(
    mut chunks: mpsc::Receiver<Vec<u8>>,
    limit: usize,
) -> Result<Vec<u8>, VoiceError> {
    let mut audio = Vec::new();
    while let Some(chunk) = chunks.recv().await {
        if audio.len() + chunk.len() > limit {
            return Err(VoiceError::TooLarge {
                size: audio.len() + chunk.len(),
                limit,
            });
        }
        audio.extend_from_slice(&chunk);
    }
    Ok(audio)
}
