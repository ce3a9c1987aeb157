//! `graphql-transport-ws` framing shared by the Codex streams.

use serde::Deserialize;
use serde_json::{Value, json};

use super::provider::{CodecError, StreamError};

/// WebSocket subprotocol.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

/// Decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphqlMessage {
    /// Subscription data.
    Next {
        /// Subscription id.
        id: Option<String>,
        /// `{ "data": ... }` payload.
        payload: Value,
    },
    /// Subscription error.
    Error(String),
    /// Server completed a subscription.
    Complete(Option<String>),
    /// Server ping; answer with [`pong`].
    Ping,
    /// Pong or legacy keep-alive.
    KeepAlive,
    /// Anything else.
    Other(String),
}

/// `connection_init` carrying the authorization value.
#[must_use]
pub fn connection_init(authorization: &str) -> String {
    json!({
        "type": "connection_init",
        "payload": { "Authorization": authorization },
    })
    .to_string()
}

/// `subscribe` frame.
#[must_use]
pub fn subscribe_frame(id: &str, query: &str, variables: &Value) -> String {
    json!({
        "type": "subscribe",
        "id": id,
        "payload": { "query": query, "variables": variables },
    })
    .to_string()
}

/// Reply to a server ping.
#[must_use]
pub fn pong() -> String {
    json!({ "type": "pong" }).to_string()
}

/// Validate the handshake acknowledgment.
///
/// # Errors
///
/// `connection_error` mentioning 401 or unauthorized maps to
/// [`StreamError::Unauthorized`], mentioning 429 to
/// [`StreamError::RateLimited`]; anything else but `connection_ack` is
/// [`StreamError::UnexpectedAck`].
pub fn check_ack(frame: &str) -> Result<(), StreamError> {
    let envelope: Option<Envelope> = serde_json::from_str(frame).ok();
    if envelope.as_ref().is_some_and(|e| e.kind == "connection_ack") {
        return Ok(());
    }

    let lowered = frame.to_ascii_lowercase();
    let excerpt: String = frame.chars().take(200).collect();
    if lowered.contains("401") || lowered.contains("unauthorized") || lowered.contains("forbidden") {
        Err(StreamError::Unauthorized(excerpt))
    } else if lowered.contains("429") || lowered.contains("rate limit") {
        Err(StreamError::RateLimited(excerpt))
    } else {
        Err(StreamError::UnexpectedAck(excerpt))
    }
}

/// Decode one inbound frame.
///
/// # Errors
///
/// Returns [`CodecError`] when the frame is not a protocol envelope.
pub fn decode(text: &str) -> Result<GraphqlMessage, CodecError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    Ok(match envelope.kind.as_str() {
        "next" => match envelope.payload {
            Some(payload) => GraphqlMessage::Next {
                id: envelope.id,
                payload,
            },
            None => return Err(CodecError::InvalidFormat("next without payload".to_string())),
        },
        "error" => GraphqlMessage::Error(
            envelope
                .payload
                .map_or_else(|| "unknown error".to_string(), |p| p.to_string()),
        ),
        "complete" => GraphqlMessage::Complete(envelope.id),
        "ping" => GraphqlMessage::Ping,
        "pong" | "ka" => GraphqlMessage::KeepAlive,
        other => GraphqlMessage::Other(other.to_string()),
    })
}
