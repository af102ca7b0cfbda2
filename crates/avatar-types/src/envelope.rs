//! Envelope-tolerant decoding of backend JSON responses.
//!
//! Backends behind an API gateway return either the payload itself or an
//! envelope whose `body` field holds the payload as a JSON *string*:
//!
//! ```text
//! {"message": "hi"}
//! {"body": "{\"message\":\"hi\"}"}
//! {"statusCode": 200, "body": "{\"message\":\"hi\"}"}
//! ```
//!
//! [`decode_envelope`] accepts all of these transparently. A gateway
//! `statusCode` of 400 or above is turned into [`EnvelopeError::Upstream`].

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Errors produced while unwrapping a response envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The payload (or the inner `body` string) is not valid JSON for the
    /// expected shape.
    #[error("invalid response payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope carried an upstream error status.
    #[error("upstream error {status}: {message}")]
    Upstream { status: u16, message: String },
}

/// Parses `text` as JSON and decodes it through [`decode_envelope`].
pub fn decode_envelope_str<T: DeserializeOwned>(text: &str) -> Result<T, EnvelopeError> {
    let value: Value = serde_json::from_str(text)?;
    decode_envelope(value)
}

/// Decodes `value` as `T`, unwrapping a `body` envelope when present.
pub fn decode_envelope<T: DeserializeOwned>(value: Value) -> Result<T, EnvelopeError> {
    let mut map = match value {
        Value::Object(map) => map,
        other => return Ok(serde_json::from_value(other)?),
    };

    let status = map
        .get("statusCode")
        .and_then(Value::as_u64)
        .map(|code| u16::try_from(code).unwrap_or(u16::MAX));

    let inner = match map.remove("body") {
        Some(Value::String(raw)) => Some(parse_body_string(&raw)),
        Some(body @ Value::Object(_)) => Some(body),
        Some(other) => {
            // Not an envelope; put the field back and decode as-is.
            map.insert("body".to_string(), other);
            None
        }
        None => None,
    };

    if let Some(status) = status.filter(|s| *s >= 400) {
        let message = inner
            .as_ref()
            .and_then(error_message)
            .unwrap_or_else(|| format!("status {status}"));
        return Err(EnvelopeError::Upstream { status, message });
    }

    match inner {
        Some(payload) => Ok(serde_json::from_value(payload)?),
        None => Ok(serde_json::from_value(Value::Object(map))?),
    }
}

/// A `body` string is usually JSON; plain text is kept as a JSON string so
/// error messages survive.
fn parse_body_string(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn error_message(body: &Value) -> Option<String> {
    match body {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["error", "message"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}
