//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the port interfaces defined in the
//! application layer.

/// Session credential exchange and bearer token caching.
pub mod auth;

/// REST metadata checks and periodic REST latency polling.
pub mod checks;

/// Environment-driven configuration.
pub mod config;

/// Health and readiness HTTP endpoints.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Provider WebSocket clients and their reconnection supervisor.
pub mod stream;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
