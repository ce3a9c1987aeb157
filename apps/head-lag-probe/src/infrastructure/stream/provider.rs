//! Stream Provider Interface
//!
//! Each vendor protocol is a [`StreamProvider`]: it knows how to build the
//! connection request, what handshake to perform, which subscribe frames to
//! send, and how to turn an inbound text frame into a [`Frame`]. The
//! connection loop itself lives in [`super::session`] and is shared.

use std::time::Duration;

use async_trait::async_trait;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use super::reconnect::ReconnectConfig;
use crate::application::ports::{AuthError, ErrorKind};
use crate::domain::lag::{EventCandidate, LagPolicy};

// =============================================================================
// Errors
// =============================================================================

/// How the supervisor should react to a failed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credentials rejected: invalidate and retry after a fixed delay.
    Auth,
    /// Rate limited: long fixed cool-down.
    RateLimited,
    /// Anything else: exponential backoff.
    Transient,
}

impl FailureKind {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
        }
    }

    /// Matching error label for the metrics sink.
    #[must_use]
    pub const fn error_kind(self) -> ErrorKind {
        match self {
            Self::Auth => ErrorKind::Auth,
            Self::RateLimited => ErrorKind::RateLimited,
            Self::Transient => ErrorKind::Connection,
        }
    }
}

fn classify_status(status: u16) -> FailureKind {
    match status {
        401 | 403 => FailureKind::Auth,
        429 => FailureKind::RateLimited,
        _ => FailureKind::Transient,
    }
}

/// Errors that end a connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Transport failure (dial, upgrade, read, write).
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Could not obtain credentials.
    #[error("credential error: {0}")]
    Credential(#[from] AuthError),

    /// The connection request could not be built.
    #[error("invalid connection request: {0}")]
    InvalidRequest(String),

    /// No handshake acknowledgment in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// First frame was not the expected acknowledgment.
    #[error("unexpected handshake frame: {0}")]
    UnexpectedAck(String),

    /// Server signalled that our credentials are invalid.
    #[error("server rejected credentials: {0}")]
    Unauthorized(String),

    /// Server signalled rate limiting.
    #[error("server rate limited the connection: {0}")]
    RateLimited(String),

    /// A subscribe frame could not be sent.
    #[error("subscription {index} failed: {source}")]
    SubscribeFailed {
        /// Position of the failing frame.
        index: usize,
        /// Transport error.
        source: tungstenite::Error,
    },

    /// Server ended the stream.
    #[error("stream terminated by server: {0}")]
    Terminated(String),

    /// Nothing was read within the idle timeout.
    #[error("no frame received for {0:?}")]
    IdleTimeout(Duration),

    /// Close frame or end of stream.
    #[error("connection closed")]
    ConnectionClosed,
}

impl StreamError {
    /// Classify for the reconnection supervisor.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Credential(AuthError::RateLimited { .. }) | Self::RateLimited(_) => {
                FailureKind::RateLimited
            }
            Self::Credential(AuthError::Unauthorized { .. } | AuthError::MissingCredential)
            | Self::Unauthorized(_) => FailureKind::Auth,
            Self::WebSocket(tungstenite::Error::Http(response)) => {
                classify_status(response.status().as_u16())
            }
            _ => FailureKind::Transient,
        }
    }
}

/// Per-frame decode failure. Never ends a connection.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame is not valid JSON for the expected shape.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is JSON but structurally unusable.
    #[error("invalid frame: {0}")]
    InvalidFormat(String),
}

// =============================================================================
// Frames and Handshake
// =============================================================================

/// What a provider made of one inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Protocol keep-alive, with an optional reply to send.
    KeepAlive {
        /// Reply frame (e.g. pong).
        reply: Option<String>,
    },
    /// Zero or more event candidates.
    Data(Vec<EventCandidate>),
    /// Server-reported error; logged, connection continues.
    Error(String),
    /// Server ended the stream.
    Terminated(String),
    /// Anything else.
    Ignored,
}

/// Connection request plus handshake instructions.
#[derive(Debug)]
pub struct Handshake {
    /// WebSocket upgrade request, headers included.
    pub request: Request,
    /// Frame to send right after the upgrade.
    pub init_frame: Option<String>,
    /// Whether to wait for an acknowledgment frame before subscribing.
    pub await_ack: bool,
}

impl Handshake {
    /// Handshake with no init frame and no acknowledgment.
    #[must_use]
    pub const fn plain(request: Request) -> Self {
        Self {
            request,
            init_frame: None,
            await_ack: false,
        }
    }
}

/// Client-initiated keep-alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKeepAlive {
    /// Send interval.
    pub interval: Duration,
    /// Frame to send.
    pub frame: String,
}

/// Provider-specific timing and bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    /// Lag sanity bounds.
    pub lag: LagPolicy,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
    /// Read idle timeout once streaming.
    pub idle_timeout: Duration,
    /// Handshake acknowledgment timeout.
    pub ack_timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            lag: LagPolicy::default(),
            reconnect: ReconnectConfig::default(),
            idle_timeout: Duration::from_secs(60),
            ack_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Provider Trait
// =============================================================================

/// One vendor streaming protocol.
#[async_trait]
pub trait StreamProvider: Send + Sync + 'static {
    /// Provider name used in metrics and logs.
    fn name(&self) -> &str;

    /// Timing and bounds.
    fn settings(&self) -> &ProviderSettings;

    /// Resolve credentials and build the connection request.
    async fn connect(&self) -> Result<Handshake, StreamError>;

    /// Validate the acknowledgment frame. Only called when
    /// [`Handshake::await_ack`] is set.
    fn acknowledge(&self, frame: &str) -> Result<(), StreamError> {
        let _ = frame;
        Ok(())
    }

    /// Subscribe frames, one per instrument or one in total. Sent in order;
    /// any send failure aborts the attempt.
    fn subscribe(&self) -> Vec<String>;

    /// Decode one inbound text frame.
    fn parse_frame(&self, text: &str) -> Result<Frame, CodecError>;

    /// Client keep-alive, if the protocol needs one.
    fn keepalive(&self) -> Option<ClientKeepAlive> {
        None
    }

    /// Drop cached credentials after an authentication failure.
    async fn invalidate_credentials(&self) {}
}

/// Build an upgrade request with extra headers.
///
/// # Errors
///
/// Returns [`StreamError`] if the URL or a header value is invalid.
pub fn build_request(
    url: &str,
    headers: &[(&'static str, String)],
) -> Result<Request, StreamError> {
    let mut request = url.into_client_request()?;
    for (name, value) in headers {
        let value =
            HeaderValue::from_str(value).map_err(|e| StreamError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert(*name, value);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_and_rate_limit() {
        assert_eq!(
            StreamError::Credential(AuthError::RateLimited { retry_after: None }).failure_kind(),
            FailureKind::RateLimited
        );
        assert_eq!(
            StreamError::Credential(AuthError::Unauthorized { status: 401 }).failure_kind(),
            FailureKind::Auth
        );
        assert_eq!(
            StreamError::Unauthorized("bad token".to_string()).failure_kind(),
            FailureKind::Auth
        );
        assert_eq!(
            StreamError::Credential(AuthError::Request("timeout".to_string())).failure_kind(),
            FailureKind::Transient
        );
        assert_eq!(
            StreamError::ConnectionClosed.failure_kind(),
            FailureKind::Transient
        );
        assert_eq!(
            StreamError::HandshakeTimeout(Duration::from_secs(10)).failure_kind(),
            FailureKind::Transient
        );
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(401), FailureKind::Auth);
        assert_eq!(classify_status(403), FailureKind::Auth);
        assert_eq!(classify_status(429), FailureKind::RateLimited);
        assert_eq!(classify_status(502), FailureKind::Transient);
    }

    #[test]
    fn build_request_adds_headers() {
        let request = build_request(
            "wss://example.com/cable",
            &[("Origin", "https://example.com".to_string())],
        )
        .unwrap();
        assert_eq!(request.headers()["Origin"], "https://example.com");
        assert_eq!(request.uri().host(), Some("example.com"));
    }

    #[test]
    fn build_request_rejects_bad_header() {
        let err = build_request("wss://example.com", &[("Authorization", "bad\nvalue".to_string())])
            .unwrap_err();
        assert!(matches!(err, StreamError::InvalidRequest(_)));
    }
}
