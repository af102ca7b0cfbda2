//! Line-oriented console driving one session controller.

use avatar_session::{SessionController, UtteranceOutcome};
use avatar_types::AvatarSelection;
use avatar_voice::{FileMicrophone, Transcriber, VoiceConfig, VoiceInput};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

pub const HELP: &str = "\
Commands:
  /start [avatar] [voice]  start a session
  /close                   close the session
  /voice [clip]            transcribe a recorded clip and say it
  /state                   show the session state
  /history                 show the conversation so far
  /help                    show this help
  /quit                    close the session and exit
Any other line is sent to the avatar.";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(AvatarSelection),
    Close,
    Voice(Option<PathBuf>),
    State,
    History,
    Help,
    Quit,
    Say(String),
    Unknown(String),
    Empty,
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if !line.starts_with('/') {
        return Command::Say(line.to_string());
    }

    let mut words = line.split_whitespace();
    let name = words.next().unwrap_or_default();
    match name {
        "/start" => {
            let avatar = words.next().map(str::to_string);
            let voice = words.next().map(str::to_string);
            Command::Start(AvatarSelection::new(avatar, voice))
        }
        "/close" => Command::Close,
        "/voice" => Command::Voice(words.next().map(PathBuf::from)),
        "/state" => Command::State,
        "/history" => Command::History,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    }
}

pub struct Console {
    controller: SessionController,
    transcriber: Option<Arc<dyn Transcriber>>,
    voice: VoiceConfig,
}

impl Console {
    pub fn new(
        controller: SessionController,
        transcriber: Option<Arc<dyn Transcriber>>,
        voice: VoiceConfig,
    ) -> Self {
        Self {
            controller,
            transcriber,
            voice,
        }
    }

    /// Reads commands from stdin until `/quit`, end of input or Ctrl+C, then
    /// closes whatever session is still open.
    pub async fn run(self) {
        println!("{HELP}");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT, closing session");
                    break;
                }
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed to read from stdin");
                    break;
                }
            };

            if !self.handle(parse_command(&line)) {
                break;
            }
        }

        if !self.controller.can_start() {
            self.controller.close().await;
        }
    }

    /// Dispatches one command. Long-running work is spawned so the prompt
    /// stays responsive; returns `false` to stop.
    fn handle(&self, command: Command) -> bool {
        match command {
            Command::Empty => {}
            Command::Quit => return false,
            Command::Help => println!("{HELP}"),
            Command::Unknown(name) => println!("Unknown command {name}; try /help"),
            Command::State => {
                let snapshot = self.controller.snapshot();
                println!("state: {}", snapshot.state);
                if let Some(id) = snapshot.session_id {
                    println!("session: {id}");
                }
                if let Some(queued) = snapshot.queued_utterance {
                    println!("queued: {queued}");
                }
                if let Some(err) = snapshot.last_error {
                    println!("last error: {err}");
                }
            }
            Command::History => {
                let history = self.controller.history();
                if history.is_empty() {
                    println!("No conversation yet");
                }
                for turn in history {
                    println!("You: {}\nAI: {}", turn.user_text, turn.bot_text);
                }
            }
            Command::Start(selection) => {
                let controller = self.controller.clone();
                tokio::spawn(async move {
                    let state = controller.start(selection).await;
                    debug!(state = state.label(), "start finished");
                });
            }
            Command::Close => {
                let controller = self.controller.clone();
                tokio::spawn(async move {
                    controller.close().await;
                });
            }
            Command::Say(text) => self.say(text),
            Command::Voice(clip) => self.voice(clip),
        }
        true
    }

    fn say(&self, text: String) {
        let controller = self.controller.clone();
        tokio::spawn(async move {
            let outcome = controller.send_utterance(&text).await;
            debug!(?outcome, "utterance finished");
        });
    }

    fn voice(&self, clip: Option<PathBuf>) {
        let Some(transcriber) = self.transcriber.clone() else {
            self.controller
                .status()
                .report_error("Voice input is not configured (voice.transcribe_url)");
            return;
        };
        let Some(clip) = clip.or_else(|| self.voice.default_clip.clone()) else {
            println!("Usage: /voice <clip>");
            return;
        };

        let controller = self.controller.clone();
        let max_bytes = self.voice.max_recording_bytes;
        tokio::spawn(async move {
            let input = VoiceInput::new(
                Arc::new(FileMicrophone::new(clip)),
                transcriber,
                controller.status().clone(),
                max_bytes,
            );
            if input.start_recording().await.is_err() {
                return;
            }
            let Ok(text) = input.stop_recording().await else {
                return;
            };
            match controller.send_utterance(&text).await {
                UtteranceOutcome::Spoken { .. } | UtteranceOutcome::Queued => {}
                outcome => debug!(?outcome, "transcribed utterance not spoken"),
            }
        });
    }
}
