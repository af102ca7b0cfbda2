//! Console configuration loading from file and environment variables.

use avatar_session::{AvatarDefaults, BackendConfig, ReadinessConfig, TransportConfig};
use avatar_voice::VoiceConfig;
use serde::Deserialize;
use thiserror::Error;

/// Top-level console configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Session backend endpoints.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Readiness wait bounds.
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// Default avatar start parameters.
    #[serde(default)]
    pub avatar: AvatarDefaults,

    /// Transport selection and timeouts.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Voice input.
    #[serde(default)]
    pub voice: VoiceConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "avatar_session=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override has an unusable value.
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `AVATAR_API_URL` overrides `backend.base_url`
/// - `AVATAR_API_KEY` sets `backend.api_key`
/// - `AVATAR_TRANSPORT` overrides `transport.kind` (`proxied` or `room`)
/// - `AVATAR_TRANSCRIBE_URL` overrides `voice.transcribe_url`
/// - `AVATAR_READINESS_ATTEMPTS` overrides `readiness.poll_attempts`
/// - `AVATAR_LOG_LEVEL` overrides `logging.level`
/// - `AVATAR_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if an override cannot be parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit environment lookup.
pub fn load_config_with(
    path: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Some(url) = env("AVATAR_API_URL") {
        config.backend.base_url = url;
    }
    if let Some(key) = env("AVATAR_API_KEY").filter(|k| !k.trim().is_empty()) {
        config.backend.api_key = Some(key);
    }
    if let Some(kind) = env("AVATAR_TRANSPORT") {
        config.transport.kind = kind.parse().map_err(|_| ConfigError::Invalid {
            key: "AVATAR_TRANSPORT",
            value: kind,
        })?;
    }
    if let Some(url) = env("AVATAR_TRANSCRIBE_URL") {
        config.voice.transcribe_url = Some(url);
    }
    if let Some(attempts) = env("AVATAR_READINESS_ATTEMPTS") {
        config.readiness.poll_attempts = attempts
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid {
                key: "AVATAR_READINESS_ATTEMPTS",
                value: attempts,
            })?;
    }
    if let Some(level) = env("AVATAR_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("AVATAR_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use avatar_session::TransportKind;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = load_config_with(Some("/nonexistent/avatar.toml"), no_env).unwrap();
        assert_eq!(config.backend.base_url, "http://localhost:3000");
        assert_eq!(config.readiness.poll_attempts, 20);
        assert_eq!(config.avatar.avatar_name.as_deref(), Some("Wayne_20240711"));
        assert_eq!(config.avatar.voice_rate, Some(1.0));
        assert_eq!(config.avatar.voice_emotion.as_deref(), Some("EXCITED"));
        assert_eq!(config.transport.kind, TransportKind::Proxied);
        assert_eq!(config.voice.max_recording_bytes, 10 * 1024 * 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn file_sections_are_parsed() {
        let file = write_config(
            r#"
[backend]
base_url = "https://api.example.com/prod"
start_path = ""
origin = "https://avatar.example.com"

[readiness]
poll_attempts = 5
degraded_start = true

[avatar]
avatar_name = "Anna_public"
voice_id = "v-1"
voice_rate = 0.8
knowledge_id = "kb-menu"

[transport]
kind = "room"
speak_timeout_secs = 15

[voice]
transcribe_url = "https://api.example.com/prod/transcribe"

[logging]
json = true
"#,
        );

        let config = load_config_with(file.path().to_str(), no_env).unwrap();
        assert_eq!(config.backend.base_url, "https://api.example.com/prod");
        assert_eq!(config.backend.start_path.as_deref(), Some(""));
        assert_eq!(config.backend.chat_path, "/chat");
        assert_eq!(config.readiness.poll_attempts, 5);
        assert_eq!(config.readiness.poll_interval_ms, 500);
        assert!(config.readiness.degraded_start);
        assert_eq!(config.avatar.voice_id.as_deref(), Some("v-1"));
        assert_eq!(config.avatar.voice_rate, Some(0.8));
        assert_eq!(config.avatar.knowledge_id.as_deref(), Some("kb-menu"));
        assert_eq!(config.avatar.quality.as_deref(), Some("low"));
        assert_eq!(config.transport.kind, TransportKind::Room);
        assert_eq!(config.transport.speak_timeout_secs, 15);
        assert!(config.voice.is_available());
        assert!(config.logging.json);
    }

    #[test]
    fn environment_overrides_file() {
        let file = write_config("[backend]\nbase_url = \"http://file\"\n");
        let env: HashMap<&str, &str> = HashMap::from([
            ("AVATAR_API_URL", "http://env"),
            ("AVATAR_TRANSPORT", "ROOM"),
            ("AVATAR_READINESS_ATTEMPTS", "8"),
            ("AVATAR_LOG_JSON", "1"),
        ]);

        let config = load_config_with(file.path().to_str(), |key| {
            env.get(key).map(|v| v.to_string())
        })
        .unwrap();
        assert_eq!(config.backend.base_url, "http://env");
        assert_eq!(config.transport.kind, TransportKind::Room);
        assert_eq!(config.readiness.poll_attempts, 8);
        assert!(config.logging.json);
    }

    #[test]
    fn invalid_override_is_an_error() {
        let err = load_config_with(None, |key| {
            (key == "AVATAR_READINESS_ATTEMPTS").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "AVATAR_READINESS_ATTEMPTS",
                ..
            }
        ));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let file = write_config("[readiness]\npoll_attempts = \"many\"\n");
        let err = load_config_with(file.path().to_str(), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
