//! Audio capture sources.
//!
//! Opening a [`Microphone`] yields a [`Capture`]: a stream of encoded audio
//! chunks plus the tracks that keep the device busy. The tracks must be
//! stopped as soon as the recording ends; [`TrackGuard`] does that on every
//! exit path.

use crate::error::VoiceError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::debug;

/// Chunks buffered between the capture source and the recorder.
const CAPTURE_CHUNK_CAPACITY: usize = 64;

/// Read size for file-backed capture.
const FILE_CHUNK_BYTES: usize = 16 * 1024;

/// The live tracks of an open capture.
pub trait TrackSet: Send {
    /// Stops every track. Called at most once. The capture's chunk stream
    /// must end after whatever was already captured has been delivered.
    fn stop(&mut self);
}

/// An open capture.
pub struct Capture {
    pub chunks: mpsc::Receiver<Vec<u8>>,
    pub tracks: Box<dyn TrackSet>,
}

impl std::fmt::Debug for Capture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capture").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Microphone: Send + Sync {
    async fn open(&self) -> Result<Capture, VoiceError>;
}

/// Stops the tracks it holds exactly once, at the latest when dropped.
pub struct TrackGuard {
    tracks: Option<Box<dyn TrackSet>>,
}

impl TrackGuard {
    pub fn new(tracks: Box<dyn TrackSet>) -> Self {
        Self {
            tracks: Some(tracks),
        }
    }

    /// Returns `true` if this call stopped the tracks.
    pub fn release(&mut self) -> bool {
        match self.tracks.take() {
            Some(mut tracks) => {
                tracks.stop();
                debug!("microphone tracks stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.tracks.is_none()
    }
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Plays a pre-recorded clip as if it were captured live.
///
/// The whole clip is read when the capture opens, so stopping early still
/// delivers all of it.
#[derive(Debug, Clone)]
pub struct FileMicrophone {
    path: PathBuf,
}

impl FileMicrophone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

struct FileTracks {
    path: PathBuf,
}

impl TrackSet for FileTracks {
    fn stop(&mut self) {
        debug!(path = %self.path.display(), "clip capture stopped");
    }
}

#[async_trait]
impl Microphone for FileMicrophone {
    async fn open(&self) -> Result<Capture, VoiceError> {
        let audio = tokio::fs::read(&self.path).await.map_err(|e| {
            VoiceError::Microphone(format!("cannot open {}: {e}", self.path.display()))
        })?;

        let (tx, rx) = mpsc::channel(CAPTURE_CHUNK_CAPACITY);
        tokio::spawn(async move {
            for chunk in audio.chunks(FILE_CHUNK_BYTES) {
                if tx.send(chunk.to_vec()).await.is_err() {
                    break;
                }
            }
        });

        Ok(Capture {
            chunks: rx,
            tracks: Box::new(FileTracks {
                path: self.path.clone(),
            }),
        })
    }
}
