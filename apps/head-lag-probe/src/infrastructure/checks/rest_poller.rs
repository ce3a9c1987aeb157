//! REST Latency Pollers
//!
//! Periodically issues one lightweight request per chain to each REST API
//! and records round-trip latency and status codes. The responses
//! themselves are discarded; only timing and status matter. The same
//! poller drives the swap quote APIs in [`super::quote`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::http::{CODEX_GRAPHQL_URL, CheckError, MOBULA_REST_BASE_URL, categorize_status};
use crate::application::ports::MetricsSink;
use crate::infrastructure::config::ApiKey;

const GET_BARS_QUERY: &str = "query GetPoolBars($address: String!, $networkId: Int!, $from: Int!, $to: Int!) { \
    getBars(symbol: \"\", address: $address, networkId: $networkId, resolution: \"1\", \
    from: $from, to: $to, currencyCode: \"USD\") { t o h l c v } }";

/// A pool polled on every REST API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestTarget {
    /// Normalized chain name.
    pub chain: &'static str,
    /// Pool address.
    pub pool_address: &'static str,
    /// Mobula `blockchain` query value.
    pub mobula_blockchain: &'static str,
    /// Codex network id.
    pub network_id: u64,
}

impl PolledTarget for RestTarget {
    fn chain(&self) -> &str {
        self.chain
    }
}

/// Default polled pools.
pub const REST_TARGETS: [RestTarget; 4] = [
    RestTarget {
        chain: "solana",
        pool_address: "7qbRF6YsyGuLUVs6Y1q64bdVrfe4ZcUUz1JRdoVNUJnm",
        mobula_blockchain: "solana",
        network_id: 1_399_811_149,
    },
    RestTarget {
        chain: "bnb",
        pool_address: "0x58f876857a02d6762e0101bb5c46a8c1ed44dc16",
        mobula_blockchain: "56",
        network_id: 56,
    },
    RestTarget {
        chain: "base",
        pool_address: "0x4c36388be6f416a29c8d8eee81c771ce6be14b18",
        mobula_blockchain: "base",
        network_id: 8453,
    },
    RestTarget {
        chain: "monad",
        pool_address: "0x659bD0BC4167BA25c62E05656F78043E7eD4a9da",
        mobula_blockchain: "monad",
        network_id: 143,
    },
];

/// Anything a [`RestPoller`] iterates over.
pub trait PolledTarget: Send + Sync {
    /// Chain label recorded with each sample.
    fn chain(&self) -> &str;
}

/// One REST API probed by a [`RestPoller`].
#[async_trait]
pub trait RestProbe<T: PolledTarget = RestTarget>: Send + Sync {
    /// Provider label.
    fn provider(&self) -> &'static str;

    /// Endpoint label.
    fn endpoint(&self) -> &'static str;

    /// Issue the request for `target`, returning the HTTP status.
    async fn probe(&self, target: &T) -> Result<u16, CheckError>;
}

// =============================================================================
// Mobula
// =============================================================================

/// Mobula market history endpoint.
#[derive(Debug)]
pub struct MobulaRestProbe {
    client: Client,
    base_url: String,
    api_key: ApiKey,
}

impl MobulaRestProbe {
    /// Create a probe against `base_url` (normally [`MOBULA_REST_BASE_URL`]).
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Probe against the production API.
    #[must_use]
    pub fn production(client: Client, api_key: ApiKey) -> Self {
        Self::new(client, MOBULA_REST_BASE_URL, api_key)
    }
}

#[async_trait]
impl RestProbe for MobulaRestProbe {
    fn provider(&self) -> &'static str {
        "mobula"
    }

    fn endpoint(&self) -> &'static str {
        "market_data"
    }

    async fn probe(&self, target: &RestTarget) -> Result<u16, CheckError> {
        let to = Utc::now().timestamp_millis();
        let from = to - 3_600_000;

        let response = self
            .client
            .get(format!("{}/api/1/market/history/pair", self.base_url))
            .query(&[
                ("address", target.pool_address.to_string()),
                ("blockchain", target.mobula_blockchain.to_string()),
                ("period", "1min".to_string()),
                ("from", from.to_string()),
                ("to", to.to_string()),
                ("amount", "5".to_string()),
            ])
            .header(AUTHORIZATION, self.api_key.expose())
            .send()
            .await?;

        Ok(response.status().as_u16())
    }
}

// =============================================================================
// Codex
// =============================================================================

/// Codex `getBars` GraphQL query.
#[derive(Debug)]
pub struct CodexRestProbe {
    client: Client,
    url: String,
    api_key: ApiKey,
}

impl CodexRestProbe {
    /// Create a probe against `url` (normally [`CODEX_GRAPHQL_URL`]).
    #[must_use]
    pub fn new(client: Client, url: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            client,
            url: url.into(),
            api_key,
        }
    }

    /// Probe against the production API.
    #[must_use]
    pub fn production(client: Client, api_key: ApiKey) -> Self {
        Self::new(client, CODEX_GRAPHQL_URL, api_key)
    }
}

#[async_trait]
impl RestProbe for CodexRestProbe {
    fn provider(&self) -> &'static str {
        "codex"
    }

    fn endpoint(&self) -> &'static str {
        "graphql"
    }

    async fn probe(&self, target: &RestTarget) -> Result<u16, CheckError> {
        let to = Utc::now().timestamp();
        let body = json!({
            "query": GET_BARS_QUERY,
            "variables": {
                "address": target.pool_address,
                "networkId": target.network_id,
                "from": to - 3600,
                "to": to,
            },
        });

        let response = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, self.api_key.expose())
            .json(&body)
            .send()
            .await?;

        Ok(response.status().as_u16())
    }
}

// =============================================================================
// Poller
// =============================================================================

/// Runs one [`RestProbe`] against every target on a fixed period.
pub struct RestPoller<T: PolledTarget = RestTarget> {
    probe: Box<dyn RestProbe<T>>,
    targets: Vec<T>,
    interval: Duration,
    sink: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
}

impl<T: PolledTarget> std::fmt::Debug for RestPoller<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestPoller")
            .field("provider", &self.probe.provider())
            .field("targets", &self.targets.len())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl<T: PolledTarget> RestPoller<T> {
    /// Create a poller.
    #[must_use]
    pub fn new(
        probe: Box<dyn RestProbe<T>>,
        targets: Vec<T>,
        interval: Duration,
        sink: Arc<dyn MetricsSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            probe,
            targets,
            interval,
            sink,
            cancel,
        }
    }

    /// Poll immediately, then every interval, until cancelled.
    pub async fn run(self) {
        let provider = self.probe.provider();
        tracing::info!(
            provider,
            endpoint = self.probe.endpoint(),
            targets = self.targets.len(),
            interval_secs = self.interval.as_secs(),
            "REST poller started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        () = self.poll_once() => {}
                    }
                }
            }
        }

        tracing::info!(provider, "REST poller stopped");
    }

    /// Probe every target once, in order.
    pub async fn poll_once(&self) {
        let provider = self.probe.provider();
        let endpoint = self.probe.endpoint();

        for target in &self.targets {
            let chain = target.chain();
            let started = Instant::now();
            let result = self.probe.probe(target).await;
            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(status) => {
                    self.sink
                        .record_rest_latency(provider, endpoint, chain, latency_ms, status);
                    if let Some(kind) = categorize_status(status) {
                        self.sink
                            .record_rest_error(provider, endpoint, chain, kind.as_str());
                        tracing::warn!(provider, endpoint, chain, status, latency_ms, "REST probe returned error status");
                    } else {
                        tracing::debug!(provider, endpoint, chain, status, latency_ms, "REST probe");
                    }
                }
                Err(e) => {
                    let kind = e.error_kind();
                    self.sink
                        .record_rest_error(provider, endpoint, chain, kind.as_str());
                    tracing::warn!(provider, endpoint, chain, error = %e, latency_ms, "REST probe failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::MockMetricsSink;

    struct ScriptedProbe {
        results: Mutex<Vec<Result<u16, CheckError>>>,
    }

    #[async_trait]
    impl RestProbe for ScriptedProbe {
        fn provider(&self) -> &'static str {
            "mobula"
        }

        fn endpoint(&self) -> &'static str {
            "market_data"
        }

        async fn probe(&self, _target: &RestTarget) -> Result<u16, CheckError> {
            self.results.lock().remove(0)
        }
    }

    fn poller(results: Vec<Result<u16, CheckError>>, sink: MockMetricsSink) -> RestPoller {
        RestPoller::new(
            Box::new(ScriptedProbe {
                results: Mutex::new(results),
            }),
            REST_TARGETS[..3].to_vec(),
            Duration::from_secs(20),
            Arc::new(sink),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn poll_records_status_and_classifies_failures() {
        let mut sink = MockMetricsSink::new();
        sink.expect_record_rest_latency()
            .withf(|provider, endpoint, chain, _, status| {
                provider == "mobula" && endpoint == "market_data" && chain == "solana" && *status == 200
            })
            .times(1)
            .return_const(());
        sink.expect_record_rest_latency()
            .withf(|_, _, chain, _, status| chain == "bnb" && *status == 503)
            .times(1)
            .return_const(());
        sink.expect_record_rest_error()
            .withf(|_, _, chain, kind| chain == "bnb" && kind == "server_error")
            .times(1)
            .return_const(());
        sink.expect_record_rest_error()
            .withf(|_, _, chain, kind| chain == "base" && kind == "timeout_error")
            .times(1)
            .return_const(());

        let poller = poller(vec![Ok(200), Ok(503), Err(CheckError::Timeout)], sink);
        poller.poll_once().await;
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_immediately_and_stops_on_cancel() {
        let mut sink = MockMetricsSink::new();
        sink.expect_record_rest_latency().times(3).return_const(());

        let cancel = CancellationToken::new();
        let poller: RestPoller = RestPoller::new(
            Box::new(ScriptedProbe {
                results: Mutex::new(vec![Ok(200), Ok(200), Ok(200)]),
            }),
            REST_TARGETS[..3].to_vec(),
            Duration::from_secs(20),
            Arc::new(sink),
            cancel.clone(),
        );

        let handle = tokio::spawn(poller.run());
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
