//! Avatar console binary: an interactive front end for one avatar session.
//!
//! Loads configuration, initializes structured logging, wires the backend,
//! the configured transport and optional voice input into a session
//! controller, prints status lines as they happen and reads commands from
//! stdin until `/quit` or Ctrl+C.

mod config;
mod console;

use avatar_session::{
    ControllerOptions, HttpBackend, ProxiedTransport, RoomTransport, SessionBackend,
    SessionController, Transport, TransportKind,
};
use avatar_types::StatusReporter;
use avatar_voice::{HttpTranscriber, Transcriber};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("AVATAR_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; fix the config file or AVATAR_* variables");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let backend: Arc<dyn SessionBackend> = Arc::new(
        HttpBackend::new(config.backend.clone())
            .expect("failed to build backend client; check backend.base_url"),
    );
    let transport: Arc<dyn Transport> = match config.transport.kind {
        TransportKind::Proxied => Arc::new(ProxiedTransport::new(backend.clone())),
        TransportKind::Room => Arc::new(RoomTransport::new(&config.transport)),
    };

    let status = StatusReporter::new();
    let printer = spawn_status_printer(&status);

    let controller = SessionController::new(
        backend,
        transport.clone(),
        ControllerOptions {
            readiness: config.readiness.clone(),
            avatar_defaults: config.avatar.selection(),
            status,
        },
    );

    let transcriber: Option<Arc<dyn Transcriber>> = if config.voice.is_available() {
        Some(Arc::new(
            HttpTranscriber::new(&config.voice).expect("failed to build transcription client"),
        ))
    } else {
        tracing::info!("voice input disabled: voice.transcribe_url is not set");
        None
    };

    tracing::info!(
        backend = %config.backend.base_url,
        transport = transport.name(),
        chat_scope = %controller.chat_scope(),
        "avatar console ready"
    );

    console::Console::new(controller, transcriber, config.voice.clone())
        .run()
        .await;

    // The printer ends once every status sender is gone; give it a moment
    // to flush the closing lines.
    if tokio::time::timeout(Duration::from_millis(250), printer)
        .await
        .is_err()
    {
        tracing::debug!("status printer still running at shutdown");
    }
    tracing::info!("avatar console shut down");
}

/// Prints every status line to stdout.
fn spawn_status_printer(status: &StatusReporter) -> tokio::task::JoinHandle<()> {
    let mut updates = status.subscribe();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => println!("{update}"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "status printer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
