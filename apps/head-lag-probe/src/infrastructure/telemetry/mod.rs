//! Log Output and Trace Export
//!
//! Every probe task logs through `tracing`. Output goes to stdout, filtered
//! by `RUST_LOG` on top of a quiet baseline for the websocket and HTTP
//! stacks. Spans can additionally be shipped to a collector over OTLP.
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: "true" or "1" to ship spans (default: off)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: collector address (default: http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: service attribute on exported spans (default: head-lag-probe)
//! - `RUST_LOG`: extra filter directives

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{ExporterBuildError, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_SERVICE_NAME: &str = "head-lag-probe";

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Baseline directives; `RUST_LOG` entries for the same target win.
const BASELINE_DIRECTIVES: [&str; 4] = [
    "head_lag_probe=info",
    "tungstenite=warn",
    "h2=warn",
    "hyper=warn",
];

/// Flushes pending spans when the probe exits. Hold it in `main`.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            // The subscriber may already be gone at this point
            eprintln!("span flush on exit failed: {e}");
        }
    }
}

/// Where, and whether, spans are exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Ship spans over OTLP.
    pub enabled: bool,
    /// Collector address.
    pub otlp_endpoint: String,
    /// `service.name` resource attribute.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read the `OTEL_*` variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the `OTEL_*` variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            enabled: lookup("OTEL_ENABLED")
                .is_some_and(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1")),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or(defaults.otlp_endpoint),
            service_name: lookup("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
        }
    }
}

fn log_filter() -> EnvFilter {
    BASELINE_DIRECTIVES
        .iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive)
}

fn span_exporter(config: &TelemetryConfig) -> Result<SdkTracerProvider, ExporterBuildError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build())
}

/// Install the global subscriber from the environment.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Install the global subscriber.
///
/// A collector that cannot be reached at startup only costs the span
/// export; logging still comes up.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let provider = config.enabled.then(|| span_exporter(&config));
    let tracer = match &provider {
        Some(Ok(provider)) => Some(provider.tracer(config.service_name.clone())),
        _ => None,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(log_filter())
        .with(fmt_layer)
        .with(tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer)))
        .init();

    let tracer_provider = match provider {
        Some(Ok(provider)) => {
            tracing::info!(endpoint = %config.otlp_endpoint, "Exporting spans over OTLP");
            Some(provider)
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, endpoint = %config.otlp_endpoint, "OTLP exporter unavailable, logging only");
            None
        }
        None => None,
    };

    TelemetryGuard { tracer_provider }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> TelemetryConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        TelemetryConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn export_is_off_without_environment() {
        assert_eq!(config(&[]), TelemetryConfig::default());
        assert_eq!(TelemetryConfig::default().service_name, "head-lag-probe");
    }

    #[test_case("true", true)]
    #[test_case(" TRUE ", true)]
    #[test_case("1", true)]
    #[test_case("yes", false)]
    #[test_case("0", false)]
    fn enabled_flag(value: &str, expected: bool) {
        assert_eq!(config(&[("OTEL_ENABLED", value)]).enabled, expected);
    }

    #[test]
    fn collector_overrides() {
        let config = config(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
            ("OTEL_SERVICE_NAME", "head-lag-probe-eu"),
        ]);
        assert_eq!(config.otlp_endpoint, "http://collector:4317");
        assert_eq!(config.service_name, "head-lag-probe-eu");
    }

    #[test]
    fn baseline_directives_parse() {
        for directive in BASELINE_DIRECTIVES {
            assert!(
                directive.parse::<tracing_subscriber::filter::Directive>().is_ok(),
                "{directive}"
            );
        }
    }
}
