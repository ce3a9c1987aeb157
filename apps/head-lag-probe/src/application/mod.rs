//! Application Layer - Use cases and port definitions.
//!
//! Ports describe what the measurement core needs from the outside world;
//! services hold the provider-independent logic that sits between the
//! stream adapters and the metrics sink.

/// Port interfaces (metrics sink, token exchange, check executor, clock).
pub mod ports;

/// Measurement recording and the triggered check dispatcher.
pub mod services;
