//! Connection State Tracking
//!
//! Shared between a provider's session and the health endpoints.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of one provider connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected; waiting or backing off.
    Disconnected,
    /// Dialing the endpoint.
    Connecting,
    /// Upgraded; exchanging the protocol handshake.
    Handshaking,
    /// Sending subscribe frames.
    Subscribing,
    /// Receiving events.
    Streaming,
}

impl ConnectionState {
    /// Label for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
        }
    }

    /// Whether `next` follows `self` in the connection lifecycle. Any state
    /// may fall back to `Disconnected`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Handshaking)
                | (Self::Handshaking, Self::Subscribing)
                | (Self::Subscribing, Self::Streaming)
                | (_, Self::Disconnected)
        )
    }
}

/// Serializable view of a [`ProviderStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSnapshot {
    /// Provider name.
    pub provider: String,
    /// Current state.
    pub state: ConnectionState,
    /// Last time the connection reached streaming.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Most recent failure.
    pub last_error: Option<String>,
    /// Reconnects since the last successful stream.
    pub reconnect_attempts: u32,
    /// Text frames received.
    pub messages_received: u64,
    /// Accepted lag measurements.
    pub measurements: u64,
}

/// Live status of one provider.
#[derive(Debug)]
pub struct ProviderStatus {
    provider: String,
    state: parking_lot::RwLock<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    last_error: parking_lot::RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
    measurements: AtomicU64,
}

impl ProviderStatus {
    /// Create a disconnected status.
    #[must_use]
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            state: parking_lot::RwLock::new(ConnectionState::Disconnected),
            last_connected_at: parking_lot::RwLock::new(None),
            last_error: parking_lot::RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            messages_received: AtomicU64::new(0),
            measurements: AtomicU64::new(0),
        }
    }

    /// Provider name.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Move to `next`, warning on an out-of-order transition.
    pub fn transition(&self, next: ConnectionState) {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            tracing::warn!(
                provider = %self.provider,
                from = state.as_str(),
                to = next.as_str(),
                "Unexpected connection state transition"
            );
        }
        *state = next;
        drop(state);

        if next == ConnectionState::Streaming {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.last_error.write() = None;
        }
    }

    /// Record a failure and fall back to `Disconnected`.
    pub fn set_error(&self, message: String) {
        *self.state.write() = ConnectionState::Disconnected;
        *self.last_error.write() = Some(message);
    }

    /// Increment reconnect attempts.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment messages received counter.
    pub fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment accepted measurement counter.
    pub fn increment_measurements(&self) {
        self.measurements.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current connection state.
    #[must_use]
    pub fn get_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the provider is currently streaming.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.get_state() == ConnectionState::Streaming
    }

    /// Get messages received count.
    #[must_use]
    pub fn get_messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Get reconnect attempts count.
    #[must_use]
    pub fn get_reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Point-in-time copy for health output.
    #[must_use]
    pub fn snapshot(&self) -> ProviderSnapshot {
        ProviderSnapshot {
            provider: self.provider.clone(),
            state: self.get_state(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error.read().clone(),
            reconnect_attempts: self.get_reconnect_attempts(),
            messages_received: self.get_messages_received(),
            measurements: self.measurements.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        use ConnectionState::{Connecting, Disconnected, Handshaking, Streaming, Subscribing};

        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Handshaking));
        assert!(Handshaking.can_transition_to(Subscribing));
        assert!(Subscribing.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Disconnected));
        assert!(Handshaking.can_transition_to(Disconnected));

        assert!(!Disconnected.can_transition_to(Streaming));
        assert!(!Connecting.can_transition_to(Subscribing));
        assert!(!Streaming.can_transition_to(Connecting));
    }

    #[test]
    fn streaming_clears_error_and_attempts() {
        let status = ProviderStatus::new("gecko");
        assert_eq!(status.get_state(), ConnectionState::Disconnected);

        status.set_error("connection reset".to_string());
        status.increment_reconnect_attempts();
        assert_eq!(status.snapshot().last_error.as_deref(), Some("connection reset"));

        status.transition(ConnectionState::Connecting);
        status.transition(ConnectionState::Handshaking);
        status.transition(ConnectionState::Subscribing);
        status.transition(ConnectionState::Streaming);

        let snapshot = status.snapshot();
        assert!(status.is_streaming());
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert!(snapshot.last_error.is_none());
        assert!(snapshot.last_connected_at.is_some());
    }

    #[test]
    fn counters_accumulate() {
        let status = ProviderStatus::new("mobula");
        status.increment_messages();
        status.increment_messages();
        status.increment_measurements();
        let snapshot = status.snapshot();
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.measurements, 1);
        assert_eq!(snapshot.provider, "mobula");
    }
}
