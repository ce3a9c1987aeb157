//! Prometheus Metrics Module
//!
//! The production [`MetricsSink`]. Every series carries `provider` and
//! `chain` labels; the head-lag gauge also carries the monitor region so
//! probes in different regions can be compared.
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

use crate::application::ports::MetricsSink;
use crate::domain::check::MetadataField;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const LAG_BUCKETS_MS: &[f64] = &[
    100.0, 250.0, 500.0, 1_000.0, 2_000.0, 5_000.0, 10_000.0, 30_000.0, 60_000.0, 120_000.0,
];
const REST_BUCKETS_MS: &[f64] = &[
    50.0, 100.0, 200.0, 500.0, 1_000.0, 2_000.0, 5_000.0, 10_000.0,
];

/// Prometheus builder with the probe's histogram buckets.
///
/// # Errors
///
/// Returns [`BuildError`] if a bucket set is rejected.
pub fn prometheus_builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("head_lag_observations_milliseconds".to_string()),
            LAG_BUCKETS_MS,
        )?
        .set_buckets_for_metric(
            Matcher::Full("metadata_check_latency_milliseconds".to_string()),
            REST_BUCKETS_MS,
        )?
        .set_buckets_for_metric(
            Matcher::Full("rest_api_latency_milliseconds".to_string()),
            REST_BUCKETS_MS,
        )
}

/// Install the global Prometheus recorder. Later calls return the same handle.
///
/// # Errors
///
/// Returns [`BuildError`] if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = prometheus_builder()?.install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Stream lag
    describe_gauge!(
        "head_lag_milliseconds",
        "Latest delay between on-chain event time and receipt"
    );
    describe_histogram!(
        "head_lag_observations_milliseconds",
        "Distribution of head lag observations"
    );
    describe_gauge!(
        "pool_discovery_latency_milliseconds",
        "Delay between instrument creation and its announcement"
    );
    describe_gauge!(
        "head_lag_block_number",
        "Latest block number seen per provider and chain"
    );

    // Stream health
    describe_counter!(
        "stream_errors_total",
        "Stream errors by provider, chain and kind"
    );
    describe_counter!(
        "stream_reconnects_total",
        "Stream reconnection attempts by reason"
    );

    // Triggered checks
    describe_counter!(
        "metadata_coverage_total",
        "Metadata field presence observed by triggered checks"
    );
    describe_histogram!(
        "metadata_check_latency_milliseconds",
        "Latency of metadata lookups"
    );
    describe_counter!(
        "check_queue_dropped_total",
        "Check requests dropped because the queue was full"
    );

    // REST pollers
    describe_histogram!(
        "rest_api_latency_milliseconds",
        "REST request latency by provider, endpoint and chain"
    );
    describe_counter!(
        "rest_api_status_codes_total",
        "REST responses by status code"
    );
    describe_counter!(
        "rest_api_errors_total",
        "Failed REST requests by error type"
    );
}

// =============================================================================
// Sink
// =============================================================================

#[allow(clippy::cast_precision_loss)]
fn as_f64(value: u64) -> f64 {
    value as f64
}

/// [`MetricsSink`] backed by the global `metrics` recorder.
#[derive(Debug, Clone)]
pub struct PrometheusSink {
    region: String,
}

impl PrometheusSink {
    /// Create a sink that labels lag gauges with `region`.
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }
}

impl MetricsSink for PrometheusSink {
    fn record_lag(&self, provider: &str, chain: &str, lag_ms: u64) {
        gauge!(
            "head_lag_milliseconds",
            "provider" => provider.to_string(),
            "chain" => chain.to_string(),
            "region" => self.region.clone()
        )
        .set(as_f64(lag_ms));
        histogram!(
            "head_lag_observations_milliseconds",
            "provider" => provider.to_string(),
            "chain" => chain.to_string()
        )
        .record(as_f64(lag_ms));
    }

    fn record_error(&self, provider: &str, chain: &str, error_kind: &str) {
        counter!(
            "stream_errors_total",
            "provider" => provider.to_string(),
            "chain" => chain.to_string(),
            "error_kind" => error_kind.to_string()
        )
        .increment(1);
    }

    fn record_discovery_latency(&self, provider: &str, chain: &str, latency_ms: u64) {
        gauge!(
            "pool_discovery_latency_milliseconds",
            "provider" => provider.to_string(),
            "chain" => chain.to_string()
        )
        .set(as_f64(latency_ms));
    }

    fn record_metadata_coverage(
        &self,
        provider: &str,
        chain: &str,
        field: MetadataField,
        present: bool,
    ) {
        counter!(
            "metadata_coverage_total",
            "provider" => provider.to_string(),
            "chain" => chain.to_string(),
            "field" => field.as_str(),
            "present" => if present { "true" } else { "false" }
        )
        .increment(1);
    }

    fn record_metadata_latency(&self, provider: &str, chain: &str, latency_ms: u64) {
        histogram!(
            "metadata_check_latency_milliseconds",
            "provider" => provider.to_string(),
            "chain" => chain.to_string()
        )
        .record(as_f64(latency_ms));
    }

    fn record_block_number(&self, provider: &str, chain: &str, block_number: u64) {
        gauge!(
            "head_lag_block_number",
            "provider" => provider.to_string(),
            "chain" => chain.to_string()
        )
        .set(as_f64(block_number));
    }

    fn record_reconnect(&self, provider: &str, reason: &str) {
        counter!(
            "stream_reconnects_total",
            "provider" => provider.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    fn record_check_dropped(&self) {
        counter!("check_queue_dropped_total").increment(1);
    }

    fn record_rest_latency(
        &self,
        provider: &str,
        endpoint: &str,
        chain: &str,
        latency_ms: u64,
        status_code: u16,
    ) {
        histogram!(
            "rest_api_latency_milliseconds",
            "provider" => provider.to_string(),
            "endpoint" => endpoint.to_string(),
            "chain" => chain.to_string()
        )
        .record(as_f64(latency_ms));
        counter!(
            "rest_api_status_codes_total",
            "provider" => provider.to_string(),
            "endpoint" => endpoint.to_string(),
            "chain" => chain.to_string(),
            "status_code" => status_code.to_string()
        )
        .increment(1);
    }

    fn record_rest_error(&self, provider: &str, endpoint: &str, chain: &str, error_type: &str) {
        counter!(
            "rest_api_errors_total",
            "provider" => provider.to_string(),
            "endpoint" => endpoint.to_string(),
            "chain" => chain.to_string(),
            "error_type" => error_type.to_string()
        )
        .increment(1);
    }
}

// =============================================================================
// Tests
// =============================================================================
