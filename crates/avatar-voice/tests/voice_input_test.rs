use async_trait::async_trait;
use avatar_types::StatusReporter;
use avatar_voice::{
    Capture, FileMicrophone, HttpTranscriber, Microphone, TrackSet, VoiceConfig, VoiceError,
    VoiceInput, VoiceToggle, FALLBACK_TRANSCRIPT,
};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
struct Upload {
    field: Option<String>,
    file_name: Option<String>,
    bytes: Vec<u8>,
}

type Uploads = Arc<Mutex<Vec<Upload>>>;

async fn record_upload(uploads: &Uploads, mut multipart: Multipart) {
    while let Some(field) = multipart.next_field().await.unwrap() {
        let upload = Upload {
            field: field.name().map(str::to_string),
            file_name: field.file_name().map(str::to_string),
            bytes: field.bytes().await.unwrap().to_vec(),
        };
        uploads.lock().unwrap().push(upload);
    }
}

async fn transcribe(State(uploads): State<Uploads>, multipart: Multipart) -> Json<Value> {
    record_upload(&uploads, multipart).await;
    Json(json!({ "transcript": "hello avatar" }))
}

async fn transcribe_nothing(State(uploads): State<Uploads>, multipart: Multipart) -> Json<Value> {
    record_upload(&uploads, multipart).await;
    Json(json!({}))
}

async fn transcribe_broken(State(uploads): State<Uploads>, multipart: Multipart) -> StatusCode {
    record_upload(&uploads, multipart).await;
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn spawn_transcriber() -> (String, Uploads) {
    let uploads = Uploads::default();
    let app = Router::new()
        .route("/transcribe", post(transcribe))
        .route("/silent", post(transcribe_nothing))
        .route("/broken", post(transcribe_broken))
        .with_state(uploads.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), uploads)
}

/// Emits fixed chunks and keeps the capture open until its tracks stop.
struct ScriptedMicrophone {
    chunks: Vec<Vec<u8>>,
    opens: AtomicUsize,
    stops: Arc<AtomicUsize>,
}

impl ScriptedMicrophone {
    fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            opens: AtomicUsize::new(0),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct ScriptedTracks {
    open: Option<mpsc::Sender<Vec<u8>>>,
    stops: Arc<AtomicUsize>,
}

impl TrackSet for ScriptedTracks {
    fn stop(&mut self) {
        self.open.take();
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Microphone for ScriptedMicrophone {
    async fn open(&self) -> Result<Capture, VoiceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        for chunk in &self.chunks {
            tx.send(chunk.clone()).await.unwrap();
        }
        Ok(Capture {
            chunks: rx,
            tracks: Box::new(ScriptedTracks {
                open: Some(tx),
                stops: self.stops.clone(),
            }),
        })
    }
}

fn voice_config(url: String) -> VoiceConfig {
    VoiceConfig {
        transcribe_url: Some(url),
        ..Default::default()
    }
}

fn voice_input(
    microphone: Arc<dyn Microphone>,
    config: &VoiceConfig,
    status: StatusReporter,
) -> VoiceInput {
    VoiceInput::new(
        microphone,
        Arc::new(HttpTranscriber::new(config).unwrap()),
        status,
        config.max_recording_bytes,
    )
}

fn drain(status: &mut tokio::sync::broadcast::Receiver<avatar_types::StatusUpdate>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(update) = status.try_recv() {
        lines.push(update.message);
    }
    lines
}

#[tokio::test]
async fn recorded_clip_is_uploaded_and_transcribed() {
    let (base, uploads) = spawn_transcriber().await;
    let clip: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&clip).unwrap();

    let status = StatusReporter::new();
    let mut lines = status.subscribe();
    let input = voice_input(
        Arc::new(FileMicrophone::new(file.path())),
        &voice_config(format!("{base}/transcribe")),
        status,
    );

    assert_eq!(input.toggle().await.unwrap(), VoiceToggle::Started);
    assert!(input.is_recording().await);
    assert_eq!(
        input.toggle().await.unwrap(),
        VoiceToggle::Transcribed("hello avatar".to_string())
    );
    assert!(!input.is_recording().await);

    let uploads = uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].field.as_deref(), Some("audio"));
    assert_eq!(uploads[0].file_name.as_deref(), Some("recording.webm"));
    assert_eq!(uploads[0].bytes, clip);

    let lines = drain(&mut lines);
    assert_eq!(
        lines,
        vec![
            "Voice recording started",
            "Voice recording stopped, transcribing...",
            "Sending audio for transcription...",
            "Transcribed: \"hello avatar\"",
        ]
    );
}

#[tokio::test]
async fn microphone_is_released_when_transcription_fails() {
    let (base, _uploads) = spawn_transcriber().await;
    let microphone = Arc::new(ScriptedMicrophone::new(vec![b"abc".to_vec()]));
    let status = StatusReporter::new();
    let mut lines = status.subscribe();
    let input = voice_input(
        microphone.clone(),
        &voice_config(format!("{base}/broken")),
        status,
    );

    input.start_recording().await.unwrap();
    assert_eq!(microphone.stops.load(Ordering::SeqCst), 0);

    let err = input.stop_recording().await.unwrap_err();
    assert!(matches!(err, VoiceError::Status(500)), "got {err:?}");
    assert_eq!(microphone.stops.load(Ordering::SeqCst), 1);
    assert!(drain(&mut lines)
        .iter()
        .any(|l| l == "Transcription error: Transcription failed: 500"));
}

#[tokio::test]
async fn missing_transcript_falls_back() {
    let (base, _uploads) = spawn_transcriber().await;
    let microphone = Arc::new(ScriptedMicrophone::new(vec![b"abc".to_vec(), b"def".to_vec()]));
    let input = voice_input(
        microphone,
        &voice_config(format!("{base}/silent")),
        StatusReporter::new(),
    );

    input.start_recording().await.unwrap();
    assert_eq!(input.stop_recording().await.unwrap(), FALLBACK_TRANSCRIPT);
}

#[tokio::test]
async fn oversized_recording_is_rejected_before_upload() {
    let (base, uploads) = spawn_transcriber().await;
    let microphone = Arc::new(ScriptedMicrophone::new(vec![vec![0u8; 16]]));
    let config = VoiceConfig {
        max_recording_bytes: 8,
        ..voice_config(format!("{base}/transcribe"))
    };
    let input = voice_input(microphone.clone(), &config, StatusReporter::new());

    input.start_recording().await.unwrap();
    let err = input.stop_recording().await.unwrap_err();
    assert!(
        matches!(err, VoiceError::TooLarge { size: 16, limit: 8 }),
        "got {err:?}"
    );
    assert_eq!(microphone.stops.load(Ordering::SeqCst), 1);
    assert!(uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn one_recording_at_a_time() {
    let (base, _uploads) = spawn_transcriber().await;
    let microphone = Arc::new(ScriptedMicrophone::new(vec![b"abc".to_vec()]));
    let input = voice_input(
        microphone.clone(),
        &voice_config(format!("{base}/transcribe")),
        StatusReporter::new(),
    );

    assert!(matches!(
        input.stop_recording().await,
        Err(VoiceError::NotRecording)
    ));
    input.start_recording().await.unwrap();
    assert!(matches!(
        input.start_recording().await,
        Err(VoiceError::AlreadyRecording)
    ));
    assert_eq!(microphone.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dropping_input_mid_recording_releases_microphone() {
    let (base, _uploads) = spawn_transcriber().await;
    let microphone = Arc::new(ScriptedMicrophone::new(vec![b"abc".to_vec()]));
    let input = voice_input(
        microphone.clone(),
        &voice_config(format!("{base}/transcribe")),
        StatusReporter::new(),
    );

    input.start_recording().await.unwrap();
    drop(input);
    assert_eq!(microphone.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn transcriber_requires_an_endpoint() {
    let err = HttpTranscriber::new(&VoiceConfig::default()).unwrap_err();
    assert!(matches!(err, VoiceError::Config(_)));
}
