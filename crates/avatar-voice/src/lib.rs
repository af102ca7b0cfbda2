//! Voice input for the avatar console.
//!
//! A recording is captured from a [`Microphone`], the device is released as
//! soon as the recording stops, and the clip is handed to a
//! [`Transcriber`]. The resulting text feeds the same chat flow as typed
//! input.

pub mod config;
pub mod error;
pub mod input;
pub mod microphone;
pub mod transcribe;

pub use config::VoiceConfig;
pub use error::VoiceError;
pub use input::{VoiceInput, VoiceToggle};
pub use microphone::{Capture, FileMicrophone, Microphone, TrackGuard, TrackSet};
pub use transcribe::{HttpTranscriber, Transcriber, FALLBACK_TRANSCRIPT};
