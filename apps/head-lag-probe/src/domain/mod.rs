//! Domain Layer - Measurement types and pure logic.
//!
//! Nothing here performs I/O. Event normalization, the lag calculation and
//! first-sighting tracking are all testable without a network.

/// Monitored instruments and chain-name normalization.
pub mod instrument;

/// Event normalization and the lag calculator.
pub mod lag;

/// Triggered check requests and results.
pub mod check;
