#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Head Lag Probe - Data Provider Freshness Benchmark
//!
//! Subscribes to the real-time streams of several blockchain data providers
//! and measures, per provider and chain, how long after an on-chain event
//! the provider delivers it. Newly created tokens additionally trigger
//! metadata coverage checks against the providers' REST APIs.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Event normalization, the lag calculator, check types
//!   - `instrument`: Monitored pools and chain-name normalization
//!   - `lag`: Event candidates and the lag policy
//!   - `check`: Check requests, first-sighting tracking, coverage tallies
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Metrics sink, token exchange, check executor, clock
//!   - `services`: Measurement recording and the check dispatcher
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `auth`: Session credential and bearer token cache
//!   - `stream`: Provider WebSocket clients and the reconnection supervisor
//!   - `checks`: Metadata checks and REST latency pollers
//!   - `config`: Environment configuration
//!   - `health`: Health, readiness and metrics HTTP endpoints
//!   - `metrics`: Prometheus sink
//!
//! # Data Flow
//!
//! ```text
//! provider WS ──► StreamSession ──► MeasurementRecorder ──► MetricsSink
//!      ▲                                   │
//!  StreamSupervisor                        ▼
//!  (backoff)                       CheckDispatcher ──► CheckWorker ──► REST APIs
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Measurement types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::check::{CheckOutcome, CheckReport, CheckRequest, MetadataCoverage};
pub use domain::instrument::{MonitoredInstrument, default_instruments};
pub use domain::lag::{LagPolicy, NegativeLagMode};

// Ports and services
pub use application::ports::{CheckExecutor, Clock, MetricsSink, SystemClock, TokenExchange};
pub use application::services::{CheckDispatcher, DispatcherConfig, MeasurementRecorder};

// Infrastructure config
pub use infrastructure::config::{ApiKey, ConfigError, Credentials, ProbeConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::{PrometheusSink, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
