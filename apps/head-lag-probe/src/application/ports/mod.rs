//! Port Interfaces
//!
//! Contracts between the measurement core and the outside world, following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`MetricsSink`]: receives validated measurements and error counts
//! - [`TokenExchange`]: mints a bearer token from a session credential
//! - [`CheckExecutor`]: runs downstream lookups for a discovered instrument
//! - [`Clock`]: source of receipt timestamps

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::check::{CheckReport, CheckRequest, MetadataField};

// =============================================================================
// Metrics Sink
// =============================================================================

/// Destination for measurements. Implementations must be cheap and
/// non-blocking; they are called from stream receive loops.
#[cfg_attr(test, mockall::automock)]
pub trait MetricsSink: Send + Sync {
    /// A validated head-lag measurement.
    fn record_lag(&self, provider: &str, chain: &str, lag_ms: u64);

    /// An error, labelled by kind.
    fn record_error(&self, provider: &str, chain: &str, error_kind: &str);

    /// Delay between instrument creation and discovery.
    fn record_discovery_latency(&self, provider: &str, chain: &str, latency_ms: u64);

    /// Presence of one metadata field for a discovered instrument.
    fn record_metadata_coverage(
        &self,
        provider: &str,
        chain: &str,
        field: MetadataField,
        present: bool,
    );

    /// Round-trip time of a metadata lookup.
    fn record_metadata_latency(&self, provider: &str, chain: &str, latency_ms: u64);

    /// Latest block number seen on a stream.
    fn record_block_number(&self, provider: &str, chain: &str, block_number: u64);

    /// A reconnection, labelled by failure class.
    fn record_reconnect(&self, provider: &str, reason: &str);

    /// A check request dropped because the queue was full.
    fn record_check_dropped(&self);

    /// Latency and status code of a REST probe.
    fn record_rest_latency(
        &self,
        provider: &str,
        endpoint: &str,
        chain: &str,
        latency_ms: u64,
        status_code: u16,
    );

    /// A failed REST probe.
    fn record_rest_error(&self, provider: &str, endpoint: &str, chain: &str, error_type: &str);
}

/// Error labels shared by every sink call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A frame could not be decoded.
    Decode,
    /// The provider sent an error frame.
    ErrorFrame,
    /// The connection attempt or stream failed.
    Connection,
    /// Credentials were rejected.
    Auth,
    /// The provider rate limited us.
    RateLimited,
    /// The session credential is not configured.
    CredentialMissing,
    /// Request timed out.
    Timeout,
    /// 4xx response.
    ClientError,
    /// 5xx response.
    ServerError,
    /// Any other request failure.
    RequestError,
    /// Response body did not match the expected shape.
    ParseError,
}

impl ErrorKind {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decode => "decode_error",
            Self::ErrorFrame => "error_frame",
            Self::Connection => "connection_error",
            Self::Auth => "auth_error",
            Self::RateLimited => "rate_limited",
            Self::CredentialMissing => "session_credential_missing",
            Self::Timeout => "timeout_error",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
            Self::RequestError => "request_error",
            Self::ParseError => "parse_error",
        }
    }
}

// =============================================================================
// Token Exchange
// =============================================================================

/// Errors from obtaining a bearer token.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// No session credential configured.
    #[error("session credential not configured")]
    MissingCredential,

    /// The issuer rejected the session credential.
    #[error("session credential rejected (status {status})")]
    Unauthorized {
        /// HTTP status code.
        status: u16,
    },

    /// The issuer is rate limiting token requests.
    #[error("token exchange rate limited")]
    RateLimited {
        /// Server-provided retry hint.
        retry_after: Option<Duration>,
    },

    /// Network or timeout failure.
    #[error("token exchange request failed: {0}")]
    Request(String),

    /// Non-success status other than auth or rate limiting.
    #[error("token exchange returned status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// The response did not contain a token.
    #[error("token exchange response invalid: {0}")]
    InvalidResponse(String),
}

/// Mints a short-lived bearer token from a session credential.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Perform one exchange. Never cached at this level.
    async fn exchange(&self, session_credential: &str) -> Result<String, AuthError>;
}

// =============================================================================
// Check Executor
// =============================================================================

/// Runs the downstream lookups for one check request.
#[async_trait]
pub trait CheckExecutor: Send + Sync {
    /// One report per provider queried.
    async fn execute(&self, request: &CheckRequest) -> Vec<CheckReport>;
}

// =============================================================================
// Clock
// =============================================================================

/// Source of receipt timestamps.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
