//! Measurement Recording
//!
//! Applies the lag calculator to each normalized event, forwards accepted
//! measurements to the metrics sink, and turns first sightings of newly
//! created instruments into check requests.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::dispatcher::CheckDispatcher;
use crate::application::ports::MetricsSink;
use crate::domain::check::{CheckRequest, SightingSet};
use crate::domain::lag::{
    EventKind, LagMeasurement, LagOutcome, LagPolicy, NormalizedEvent, measure_lag,
};

/// Per-provider recorder. One instance per stream, shared by its sessions.
pub struct MeasurementRecorder {
    provider: String,
    policy: LagPolicy,
    sink: Arc<dyn MetricsSink>,
    dispatcher: Option<Arc<CheckDispatcher>>,
    sightings: SightingSet,
}

impl MeasurementRecorder {
    /// Create a recorder that does not trigger checks.
    #[must_use]
    pub fn new(provider: impl Into<String>, policy: LagPolicy, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            provider: provider.into(),
            policy,
            sink,
            dispatcher: None,
            sightings: SightingSet::default(),
        }
    }

    /// Trigger checks for first sightings through `dispatcher`.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<CheckDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Provider name.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Lag policy in force.
    #[must_use]
    pub const fn policy(&self) -> &LagPolicy {
        &self.policy
    }

    /// Measure one event received at `received_at`.
    ///
    /// Returns the measurement when it passed the policy bounds.
    pub fn record(
        &self,
        event: NormalizedEvent,
        received_at: DateTime<Utc>,
    ) -> Option<LagMeasurement> {
        let lag = match measure_lag(event.occurred_at, received_at, &self.policy) {
            LagOutcome::Accepted(lag) => lag,
            LagOutcome::Negative { lag_ms } => {
                tracing::debug!(
                    provider = %self.provider,
                    chain = %event.chain,
                    lag_ms,
                    tx = %event.tx_id,
                    "Dropping event with negative lag"
                );
                return None;
            }
            LagOutcome::AboveCeiling { lag_ms } => {
                tracing::debug!(
                    provider = %self.provider,
                    chain = %event.chain,
                    lag_ms,
                    tx = %event.tx_id,
                    "Dropping stale event above lag ceiling"
                );
                return None;
            }
        };

        let measurement = LagMeasurement {
            provider: self.provider.clone(),
            chain: event.chain.clone(),
            lag,
            received_at,
        };
        let lag_ms = measurement.lag_ms();

        match event.kind {
            EventKind::Swap => self.sink.record_lag(&self.provider, &event.chain, lag_ms),
            EventKind::Created => {
                self.sink
                    .record_discovery_latency(&self.provider, &event.chain, lag_ms);
            }
        }
        if let Some(block_number) = event.block_number {
            self.sink
                .record_block_number(&self.provider, &event.chain, block_number);
        }

        if lag > self.policy.slow_threshold {
            tracing::info!(
                provider = %self.provider,
                chain = %event.chain,
                kind = event.kind.as_str(),
                lag_ms,
                tx = %event.tx_id,
                "Slow event"
            );
        } else {
            tracing::debug!(
                provider = %self.provider,
                chain = %event.chain,
                kind = event.kind.as_str(),
                lag_ms,
                "Event measured"
            );
        }

        self.trigger_check(&event, received_at);
        Some(measurement)
    }

    fn trigger_check(&self, event: &NormalizedEvent, received_at: DateTime<Utc>) {
        let (Some(dispatcher), Some(discovered)) = (&self.dispatcher, &event.discovered) else {
            return;
        };
        if !self
            .sightings
            .first_sighting(&event.chain, &discovered.address)
        {
            return;
        }
        let request = CheckRequest::from_discovery(&self.provider, &event.chain, discovered, received_at);
        dispatcher.enqueue(request);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::application::ports::{CheckExecutor, MockMetricsSink};
    use crate::application::services::dispatcher::DispatcherConfig;
    use crate::domain::check::CheckReport;
    use crate::domain::lag::{DiscoveredInstrument, EventCandidate, timestamp_from_millis};

    struct NoopExecutor;

    #[async_trait::async_trait]
    impl CheckExecutor for NoopExecutor {
        async fn execute(&self, _request: &CheckRequest) -> Vec<CheckReport> {
            Vec::new()
        }
    }

    fn discovered_swap(tx: &str, at_ms: i64) -> NormalizedEvent {
        let mut candidate =
            EventCandidate::swap("base", Some(tx.to_string()), timestamp_from_millis(at_ms));
        candidate.discovered = Some(DiscoveredInstrument {
            address: "0xpool".to_string(),
            chain_id: "evm:8453".to_string(),
            symbol: Some("NEW".to_string()),
            name: None,
        });
        candidate.normalize().unwrap()
    }

    #[test]
    fn first_sighting_records_lag_and_enqueues_one_check() {
        let mut sink = MockMetricsSink::new();
        sink.expect_record_lag()
            .withf(|provider, chain, lag| provider == "test" && chain == "base" && *lag == 500)
            .times(2)
            .return_const(());

        let sink: Arc<dyn MetricsSink> = Arc::new(sink);
        let (dispatcher, _worker) = CheckDispatcher::new(
            DispatcherConfig::default(),
            Arc::new(NoopExecutor),
            Arc::clone(&sink),
            CancellationToken::new(),
        );
        let recorder = MeasurementRecorder::new("test", LagPolicy::default(), sink)
            .with_dispatcher(Arc::clone(&dispatcher));

        let received = timestamp_from_millis(1_700_000_000_500).unwrap();
        let measurement = recorder
            .record(discovered_swap("0xabc", 1_700_000_000_000), received)
            .unwrap();
        assert_eq!(measurement.lag, Duration::from_millis(500));
        assert_eq!(dispatcher.enqueued_count(), 1);

        recorder.record(discovered_swap("0xdef", 1_700_000_000_000), received);
        assert_eq!(dispatcher.enqueued_count(), 1);
    }

    #[test]
    fn rejected_lag_is_not_forwarded() {
        let sink = MockMetricsSink::new();
        let recorder = MeasurementRecorder::new("test", LagPolicy::default(), Arc::new(sink));

        let received = timestamp_from_millis(1_700_000_000_000 - 5000).unwrap();
        assert!(
            recorder
                .record(discovered_swap("0xabc", 1_700_000_000_000), received)
                .is_none()
        );
    }

    #[test]
    fn created_event_records_discovery_latency_and_block() {
        let mut sink = MockMetricsSink::new();
        sink.expect_record_discovery_latency()
            .withf(|_, chain, latency| chain == "solana" && *latency == 1500)
            .times(1)
            .return_const(());
        sink.expect_record_block_number()
            .withf(|_, _, block| *block == 77)
            .times(1)
            .return_const(());

        let recorder = MeasurementRecorder::new("pulse", LagPolicy::default(), Arc::new(sink));
        let discovered = DiscoveredInstrument {
            address: "Mint111".to_string(),
            chain_id: "solana:solana".to_string(),
            symbol: None,
            name: None,
        };
        let event = EventCandidate::created(
            "solana",
            discovered,
            timestamp_from_millis(1_700_000_000_000),
        )
        .with_block_number(Some(77))
        .normalize()
        .unwrap();

        let received = timestamp_from_millis(1_700_000_001_500).unwrap();
        assert!(recorder.record(event, received).is_some());
    }
}
