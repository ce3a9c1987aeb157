//! Application Services
//!
//! Provider-independent logic shared by every stream adapter.

/// Bounded triggered-check queue and its single worker.
pub mod dispatcher;

/// Lag measurement and check triggering for normalized events.
pub mod measurement;

pub use dispatcher::{CheckDispatcher, CheckWorker, DispatcherConfig, EnqueueOutcome};
pub use measurement::MeasurementRecorder;
