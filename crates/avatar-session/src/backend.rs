//! Backend collaborator: credential issuance, session start, chat, speak
//! relay and session close.
//!
//! [`SessionBackend`] is the seam the controller drives; [`HttpBackend`] is
//! the reqwest implementation of the JSON-over-HTTP contract. Every response
//! goes through [`avatar_types::decode_envelope`], so flat payloads and
//! `{"body": "<json>"}` envelopes are handled identically.

use crate::config::BackendConfig;
use crate::error::BackendError;
use async_trait::async_trait;
use avatar_types::{decode_envelope, AvatarSelection, ChatScopeId, Credential, SessionId};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Credential issued for a new session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionGrant {
    #[serde(rename = "sessionId", alias = "session_id")]
    pub session_id: SessionId,
    #[serde(alias = "token", alias = "access_token", alias = "accessToken")]
    pub credential: Credential,
    #[serde(
        default,
        rename = "transportUrl",
        alias = "transport_url",
        alias = "url"
    )]
    pub transport_url: Option<String>,
}

/// A STUN/TURN server offered by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// What the backend hands back when a session is started.
///
/// Depending on the integration this is a room URL, an SDP offer with ICE
/// servers, or nothing at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TransportDescriptor {
    #[serde(
        default,
        rename = "transportUrl",
        alias = "transport_url",
        alias = "url",
        alias = "roomUrl"
    )]
    pub url: Option<String>,
    #[serde(default, rename = "sdpOffer", alias = "sdp", alias = "sdp_offer")]
    pub sdp_offer: Option<String>,
    #[serde(default, rename = "iceServers", alias = "ice_servers")]
    pub ice_servers: Vec<IceServer>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(alias = "text", alias = "reply")]
    message: Option<String>,
}

#[derive(Deserialize)]
struct SpeakReceipt {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

fn default_success() -> bool {
    true
}

/// The backend contract consumed by the session controller.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Issues a session id and credential.
    async fn create_session(&self, selection: &AvatarSelection)
        -> Result<SessionGrant, BackendError>;

    /// Whether [`SessionBackend::start_session`] must be acknowledged before
    /// the session counts as ready.
    fn requires_start(&self) -> bool {
        true
    }

    /// Starts a created session and returns its transport descriptor.
    async fn start_session(
        &self,
        session_id: &SessionId,
        credential: &Credential,
    ) -> Result<TransportDescriptor, BackendError>;

    /// Sends one user utterance and returns the bot reply.
    async fn chat(&self, scope: &ChatScopeId, text: &str) -> Result<String, BackendError>;

    /// Asks the avatar to speak `text`.
    async fn speak(
        &self,
        session_id: &SessionId,
        credential: &Credential,
        text: &str,
    ) -> Result<(), BackendError>;

    /// Releases the session on the backend.
    async fn close_session(
        &self,
        session_id: &SessionId,
        credential: &Credential,
    ) -> Result<(), BackendError>;
}

/// reqwest implementation of [`SessionBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        if config.base_url.trim().is_empty() {
            return Err(BackendError::Config("backend base_url is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client, config })
    }

    fn start_path(&self) -> Option<&str> {
        self.config
            .start_path
            .as_deref()
            .filter(|path| !path.trim().is_empty())
    }

    /// POSTs `body` and returns the decoded JSON response, or `Value::Null`
    /// for an empty success body.
    async fn post(&self, path: &str, body: &Value) -> Result<Value, BackendError> {
        let url = self.config.endpoint(path);
        let mut request = self.client.post(&url).json(body);
        if let Some(origin) = &self.config.origin {
            request = request.header(reqwest::header::ORIGIN, origin);
        }
        if let Some(key) = &self.config.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(%url, status = status.as_u16(), bytes = text.len(), "backend response");

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

fn session_body(session_id: &SessionId, credential: &Credential) -> Value {
    json!({
        "sessionId": session_id,
        "credential": credential.expose(),
    })
}

#[async_trait]
impl SessionBackend for HttpBackend {
    async fn create_session(
        &self,
        selection: &AvatarSelection,
    ) -> Result<SessionGrant, BackendError> {
        let body = serde_json::to_value(selection)?;
        let value = self.post(&self.config.create_path, &body).await?;
        let grant: SessionGrant = decode_envelope(value)?;
        if grant.credential.is_empty() {
            return Err(BackendError::Rejected(
                "backend issued an empty credential".to_string(),
            ));
        }
        Ok(grant)
    }

    fn requires_start(&self) -> bool {
        self.start_path().is_some()
    }

    async fn start_session(
        &self,
        session_id: &SessionId,
        credential: &Credential,
    ) -> Result<TransportDescriptor, BackendError> {
        let Some(path) = self.start_path() else {
            return Ok(TransportDescriptor::default());
        };
        let value = self.post(path, &session_body(session_id, credential)).await?;
        if value.is_null() {
            return Ok(TransportDescriptor::default());
        }
        Ok(decode_envelope(value)?)
    }

    async fn chat(&self, scope: &ChatScopeId, text: &str) -> Result<String, BackendError> {
        let body = json!({ "text": text, "session_id": scope });
        let value = self.post(&self.config.chat_path, &body).await?;
        let reply: ChatReply = decode_envelope(value)?;
        reply
            .message
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| BackendError::Rejected("chat reply has no message".to_string()))
    }

    async fn speak(
        &self,
        session_id: &SessionId,
        credential: &Credential,
        text: &str,
    ) -> Result<(), BackendError> {
        let mut body = session_body(session_id, credential);
        body["text"] = Value::String(text.to_string());
        let value = self.post(&self.config.speak_path, &body).await?;
        if value.is_null() {
            return Ok(());
        }
        let receipt: SpeakReceipt = decode_envelope(value)?;
        if receipt.success {
            Ok(())
        } else {
            Err(BackendError::Rejected(
                receipt
                    .error
                    .unwrap_or_else(|| "speak request was not successful".to_string()),
            ))
        }
    }

    async fn close_session(
        &self,
        session_id: &SessionId,
        credential: &Credential,
    ) -> Result<(), BackendError> {
        self.post(&self.config.close_path, &session_body(session_id, credential))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avatar_types::decode_envelope_str;

    #[test]
    fn grant_accepts_field_aliases() {
        let grant: SessionGrant = decode_envelope_str(
            r#"{"session_id":"s-1","access_token":"tok-123","url":"wss://room"}"#,
        )
        .unwrap();
        assert_eq!(grant.session_id.as_str(), "s-1");
        assert_eq!(grant.credential.expose(), "tok-123");
        assert_eq!(grant.transport_url.as_deref(), Some("wss://room"));
    }

    #[test]
    fn grant_inside_string_body() {
        let grant: SessionGrant = decode_envelope_str(
            r#"{"body":"{\"sessionId\":\"s-2\",\"credential\":\"abc\"}"}"#,
        )
        .unwrap();
        assert_eq!(grant.session_id.as_str(), "s-2");
        assert!(grant.transport_url.is_none());
    }

    #[test]
    fn descriptor_accepts_single_ice_url() {
        let descriptor: TransportDescriptor = decode_envelope_str(
            r#"{"sdp":"v=0","iceServers":[{"urls":"stun:stun.l.google.com:19302"},{"urls":["turn:a","turn:b"],"username":"u","credential":"c"}]}"#,
        )
        .unwrap();
        assert_eq!(descriptor.sdp_offer.as_deref(), Some("v=0"));
        assert_eq!(descriptor.ice_servers.len(), 2);
        assert_eq!(descriptor.ice_servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert_eq!(descriptor.ice_servers[1].urls.len(), 2);
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let err = HttpBackend::new(BackendConfig::new("  ")).unwrap_err();
        assert!(matches!(err, BackendError::Config(_)));
    }
}
