//! Event Normalization and Lag Calculation
//!
//! Every provider parser produces [`EventCandidate`]s; normalization drops
//! candidates that lack a transaction identifier or an on-chain timestamp.
//! The lag calculator is a pure function of the event time, the receipt
//! time, and a per-provider [`LagPolicy`].

use std::time::Duration;

use chrono::{DateTime, Utc};

// =============================================================================
// Events
// =============================================================================

/// What happened on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A swap in an existing pool.
    Swap,
    /// A newly created pool or token.
    Created,
}

impl EventKind {
    /// Label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Swap => "swap",
            Self::Created => "created",
        }
    }
}

/// Instrument details carried by an event that announces something new.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredInstrument {
    /// Token or pool address.
    pub address: String,
    /// Chain identifier in the scheme downstream checks expect (`evm:8453`).
    pub chain_id: String,
    /// Token symbol, if the provider sent one.
    pub symbol: Option<String>,
    /// Token name, if the provider sent one.
    pub name: Option<String>,
}

/// A provider event before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCandidate {
    /// Normalized chain name.
    pub chain: String,
    /// Transaction hash, or the instrument address for creation events.
    pub tx_id: Option<String>,
    /// On-chain timestamp.
    pub occurred_at: Option<DateTime<Utc>>,
    /// Block or slot number.
    pub block_number: Option<u64>,
    /// Event kind.
    pub kind: EventKind,
    /// Set when the event announces a new instrument.
    pub discovered: Option<DiscoveredInstrument>,
}

impl EventCandidate {
    /// Swap candidate with the fields every trade feed carries.
    #[must_use]
    pub fn swap(
        chain: impl Into<String>,
        tx_id: Option<String>,
        occurred_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            chain: chain.into(),
            tx_id,
            occurred_at,
            block_number: None,
            kind: EventKind::Swap,
            discovered: None,
        }
    }

    /// Creation candidate for a discovered instrument.
    ///
    /// The instrument address doubles as the event identifier.
    #[must_use]
    pub fn created(
        chain: impl Into<String>,
        discovered: DiscoveredInstrument,
        occurred_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            chain: chain.into(),
            tx_id: Some(discovered.address.clone()),
            occurred_at,
            block_number: None,
            kind: EventKind::Created,
            discovered: Some(discovered),
        }
    }

    /// Attach a block number.
    #[must_use]
    pub const fn with_block_number(mut self, block_number: Option<u64>) -> Self {
        self.block_number = block_number;
        self
    }

    /// Validate into a [`NormalizedEvent`].
    ///
    /// Returns `None` when the identifier is missing or empty, or when the
    /// timestamp is missing.
    #[must_use]
    pub fn normalize(self) -> Option<NormalizedEvent> {
        let tx_id = self.tx_id.filter(|id| !id.is_empty())?;
        let occurred_at = self.occurred_at?;
        Some(NormalizedEvent {
            chain: self.chain,
            occurred_at,
            tx_id,
            block_number: self.block_number,
            kind: self.kind,
            discovered: self.discovered,
        })
    }
}

/// A validated provider event, consumed once by the lag calculator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    /// Normalized chain name.
    pub chain: String,
    /// On-chain timestamp.
    pub occurred_at: DateTime<Utc>,
    /// Transaction identifier.
    pub tx_id: String,
    /// Block or slot number.
    pub block_number: Option<u64>,
    /// Event kind.
    pub kind: EventKind,
    /// Set when the event announces a new instrument.
    pub discovered: Option<DiscoveredInstrument>,
}

/// Instant from epoch milliseconds. Zero and out-of-range values are absent.
#[must_use]
pub fn timestamp_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis)
}

/// Instant from epoch seconds. Zero and out-of-range values are absent.
#[must_use]
pub fn timestamp_from_secs(secs: i64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}

// =============================================================================
// Lag Policy
// =============================================================================

/// How lags below zero are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegativeLagMode {
    /// Clamp small skew to zero, drop anything beyond the tolerance.
    #[default]
    Discard,
    /// Use the magnitude of the lag.
    Absolute,
}

impl NegativeLagMode {
    /// Parse from configuration. Unknown values select [`Self::Discard`].
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "absolute" | "abs" => Self::Absolute,
            _ => Self::Discard,
        }
    }
}

/// Per-provider sanity bounds for lag measurements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagPolicy {
    /// How far below zero a lag may fall and still count as clock skew.
    pub skew_tolerance: Duration,
    /// Lags above this are stale or backfilled events.
    pub ceiling: Duration,
    /// Treatment of negative lag.
    pub negative: NegativeLagMode,
    /// Lags above this are logged at info level.
    pub slow_threshold: Duration,
}

impl Default for LagPolicy {
    fn default() -> Self {
        Self {
            skew_tolerance: Duration::from_secs(1),
            ceiling: Duration::from_secs(120),
            negative: NegativeLagMode::Discard,
            slow_threshold: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Lag Calculation
// =============================================================================

/// Result of applying a [`LagPolicy`] to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagOutcome {
    /// Forward to the metrics sink.
    Accepted(Duration),
    /// Event time is later than receipt by more than the skew tolerance.
    Negative {
        /// Raw lag in milliseconds.
        lag_ms: i64,
    },
    /// Lag exceeds the ceiling.
    AboveCeiling {
        /// Raw lag in milliseconds.
        lag_ms: i64,
    },
}

/// Compute `received_at - occurred_at` and apply the policy bounds.
#[must_use]
pub fn measure_lag(
    occurred_at: DateTime<Utc>,
    received_at: DateTime<Utc>,
    policy: &LagPolicy,
) -> LagOutcome {
    let raw_ms = (received_at - occurred_at).num_milliseconds();

    let effective_ms = if raw_ms >= 0 {
        raw_ms.unsigned_abs()
    } else {
        match policy.negative {
            NegativeLagMode::Absolute => raw_ms.unsigned_abs(),
            NegativeLagMode::Discard => {
                if u128::from(raw_ms.unsigned_abs()) > policy.skew_tolerance.as_millis() {
                    return LagOutcome::Negative { lag_ms: raw_ms };
                }
                0
            }
        }
    };

    if u128::from(effective_ms) > policy.ceiling.as_millis() {
        return LagOutcome::AboveCeiling { lag_ms: raw_ms };
    }

    LagOutcome::Accepted(Duration::from_millis(effective_ms))
}

/// A lag observation ready for the metrics sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagMeasurement {
    /// Provider name.
    pub provider: String,
    /// Normalized chain name.
    pub chain: String,
    /// Measured lag.
    pub lag: Duration,
    /// Local receipt instant.
    pub received_at: DateTime<Utc>,
}

impl LagMeasurement {
    /// Lag in whole milliseconds.
    #[must_use]
    pub fn lag_ms(&self) -> u64 {
        u64::try_from(self.lag.as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use proptest::prelude::*;

    use super::*;

    fn t0() -> DateTime<Utc> {
        timestamp_from_millis(1_700_000_000_000).unwrap()
    }

    #[test]
    fn positive_lag_is_forwarded() {
        let received = t0() + TimeDelta::milliseconds(150);
        assert_eq!(
            measure_lag(t0(), received, &LagPolicy::default()),
            LagOutcome::Accepted(Duration::from_millis(150))
        );
    }

    #[test]
    fn backfilled_event_is_dropped() {
        let received = t0() - TimeDelta::milliseconds(5000);
        assert_eq!(
            measure_lag(t0(), received, &LagPolicy::default()),
            LagOutcome::Negative { lag_ms: -5000 }
        );
    }

    #[test]
    fn skew_within_tolerance_clamps_to_zero() {
        let received = t0() - TimeDelta::milliseconds(400);
        assert_eq!(
            measure_lag(t0(), received, &LagPolicy::default()),
            LagOutcome::Accepted(Duration::ZERO)
        );
    }

    #[test]
    fn absolute_mode_uses_magnitude() {
        let policy = LagPolicy {
            negative: NegativeLagMode::Absolute,
            ..LagPolicy::default()
        };
        let received = t0() - TimeDelta::milliseconds(5000);
        assert_eq!(
            measure_lag(t0(), received, &policy),
            LagOutcome::Accepted(Duration::from_millis(5000))
        );
    }

    #[test]
    fn stale_event_above_ceiling_is_dropped() {
        let received = t0() + TimeDelta::minutes(3);
        assert_eq!(
            measure_lag(t0(), received, &LagPolicy::default()),
            LagOutcome::AboveCeiling { lag_ms: 180_000 }
        );
    }

    #[test]
    fn ceiling_is_inclusive() {
        let received = t0() + TimeDelta::milliseconds(120_000);
        assert_eq!(
            measure_lag(t0(), received, &LagPolicy::default()),
            LagOutcome::Accepted(Duration::from_millis(120_000))
        );
    }

    #[test]
    fn normalize_drops_missing_fields() {
        assert!(EventCandidate::swap("base", None, Some(t0())).normalize().is_none());
        assert!(
            EventCandidate::swap("base", Some(String::new()), Some(t0()))
                .normalize()
                .is_none()
        );
        assert!(
            EventCandidate::swap("base", Some("0xabc".to_string()), None)
                .normalize()
                .is_none()
        );

        let event = EventCandidate::swap("base", Some("0xabc".to_string()), Some(t0()))
            .with_block_number(Some(42))
            .normalize()
            .unwrap();
        assert_eq!(event.tx_id, "0xabc");
        assert_eq!(event.block_number, Some(42));
        assert_eq!(event.kind, EventKind::Swap);
    }

    #[test]
    fn created_candidate_uses_address_as_identifier() {
        let discovered = DiscoveredInstrument {
            address: "So1anaToken".to_string(),
            chain_id: "solana:solana".to_string(),
            symbol: Some("NEW".to_string()),
            name: None,
        };
        let event = EventCandidate::created("solana", discovered, Some(t0()))
            .normalize()
            .unwrap();
        assert_eq!(event.tx_id, "So1anaToken");
        assert_eq!(event.kind, EventKind::Created);
    }

    #[test]
    fn zero_timestamps_are_absent() {
        assert!(timestamp_from_millis(0).is_none());
        assert!(timestamp_from_secs(0).is_none());
        assert_eq!(
            timestamp_from_secs(1_700_000_000).unwrap(),
            timestamp_from_millis(1_700_000_000_000).unwrap()
        );
    }

    proptest! {
        #[test]
        fn accepted_lags_respect_bounds(offset_ms in -300_000i64..300_000i64) {
            let policy = LagPolicy::default();
            let received = t0() + TimeDelta::milliseconds(offset_ms);
            match measure_lag(t0(), received, &policy) {
                LagOutcome::Accepted(lag) => {
                    prop_assert!(offset_ms >= -1000);
                    prop_assert!(offset_ms <= 120_000);
                    prop_assert_eq!(lag.as_millis(), u128::from(offset_ms.max(0).unsigned_abs()));
                }
                LagOutcome::Negative { lag_ms } => {
                    prop_assert!(lag_ms < -1000);
                }
                LagOutcome::AboveCeiling { lag_ms } => {
                    prop_assert!(lag_ms > 120_000);
                }
            }
        }
    }
}
