//! Configuration Module
//!
//! Environment-driven configuration for the probe.

mod settings;

pub use settings::{
    ApiKey, AuthSettings, ConfigError, Credentials, ProbeConfig, ProviderTable, RestSettings,
    ServerSettings,
};
