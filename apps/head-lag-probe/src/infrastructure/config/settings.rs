//! Probe Configuration Settings
//!
//! Configuration types for the probe, loaded from environment variables.
//! Every value is optional; a missing credential disables the providers
//! that need it.

use std::time::Duration;

use crate::application::services::DispatcherConfig;
use crate::domain::instrument::{MonitoredInstrument, default_instruments};
use crate::domain::lag::{LagPolicy, NegativeLagMode};
use crate::infrastructure::stream::{ProviderSettings, ReconnectConfig};

/// An API key or session secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a secret.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The secret itself.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Provider credentials.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Mobula API key.
    pub mobula_api_key: Option<ApiKey>,
    /// Codex static API key.
    pub codex_api_key: Option<ApiKey>,
    /// Session credential used to mint Codex bearer tokens.
    pub defined_session: Option<ApiKey>,
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP port for metrics and health endpoints.
    pub metrics_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { metrics_port: 2112 }
    }
}

/// Token cache timing.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Refresh tokens this long before expiry.
    pub safety_margin: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(60 * 60),
        }
    }
}

/// REST poller settings.
#[derive(Debug, Clone)]
pub struct RestSettings {
    /// Poll period for the market data endpoints.
    pub poll_interval: Duration,
    /// Poll period for the swap quote endpoints.
    pub quote_interval: Duration,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(20),
            quote_interval: Duration::from_secs(30),
        }
    }
}

/// Per-provider stream settings.
#[derive(Debug, Clone)]
pub struct ProviderTable {
    /// Mobula fast-trade.
    pub mobula: ProviderSettings,
    /// Mobula pulse.
    pub mobula_pulse: ProviderSettings,
    /// Codex pool events.
    pub codex: ProviderSettings,
    /// Codex launchpad.
    pub codex_launchpad: ProviderSettings,
    /// GeckoTerminal.
    pub gecko: ProviderSettings,
}

/// Complete probe configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Region label attached to lag metrics.
    pub region: String,
    /// Provider credentials.
    pub credentials: Credentials,
    /// Server port settings.
    pub server: ServerSettings,
    /// Triggered check queue.
    pub checks: DispatcherConfig,
    /// REST pollers.
    pub rest: RestSettings,
    /// Token cache.
    pub auth: AuthSettings,
    /// Per-provider stream settings.
    pub providers: ProviderTable,
    /// Pools to watch.
    pub instruments: Vec<MonitoredInstrument>,
}

impl ProbeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let credentials = Credentials {
            mobula_api_key: env.secret("MOBULA_API_KEY"),
            codex_api_key: env.secret("CODEX_API_KEY"),
            defined_session: env.secret("DEFINED_SESSION_COOKIE"),
        };

        let region = env
            .string("MONITOR_REGION")
            .unwrap_or_else(|| "unknown".to_string());

        let server = ServerSettings {
            metrics_port: env.u16("PROBE_METRICS_PORT", ServerSettings::default().metrics_port),
        };

        let defaults = DispatcherConfig::default();
        let checks = DispatcherConfig {
            capacity: env.usize("PROBE_CHECK_QUEUE_CAPACITY", defaults.capacity),
            check_delay: env.duration_millis("PROBE_CHECK_DELAY_MS", defaults.check_delay),
            summary_every: defaults.summary_every,
        };
        if checks.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PROBE_CHECK_QUEUE_CAPACITY".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let rest_defaults = RestSettings::default();
        let rest = RestSettings {
            poll_interval: env
                .duration_secs("PROBE_REST_POLL_INTERVAL_SECS", rest_defaults.poll_interval),
            quote_interval: env
                .duration_secs("PROBE_QUOTE_POLL_INTERVAL_SECS", rest_defaults.quote_interval),
        };
        for (key, period) in [
            ("PROBE_REST_POLL_INTERVAL_SECS", rest.poll_interval),
            ("PROBE_QUOTE_POLL_INTERVAL_SECS", rest.quote_interval),
        ] {
            if period.is_zero() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        let auth = AuthSettings {
            safety_margin: env.duration_secs(
                "PROBE_TOKEN_SAFETY_MARGIN_SECS",
                AuthSettings::default().safety_margin,
            ),
        };

        let idle_timeout =
            env.duration_secs("PROBE_READ_IDLE_TIMEOUT_SECS", Duration::from_secs(60));
        let fast_backoff = ReconnectConfig::default();
        let slow_backoff =
            ReconnectConfig::with_backoff(Duration::from_secs(30), Duration::from_secs(300));
        let gecko_lag = LagPolicy {
            slow_threshold: Duration::from_secs(10),
            ..LagPolicy::default()
        };

        let providers = ProviderTable {
            mobula: env.provider("MOBULA", LagPolicy::default(), &fast_backoff, idle_timeout)?,
            mobula_pulse: env.provider(
                "MOBULA_PULSE",
                LagPolicy::default(),
                &fast_backoff,
                idle_timeout,
            )?,
            codex: env.provider("CODEX", LagPolicy::default(), &slow_backoff, idle_timeout)?,
            codex_launchpad: env.provider(
                "CODEX_LAUNCHPAD",
                LagPolicy::default(),
                &fast_backoff,
                idle_timeout.max(Duration::from_secs(120)),
            )?,
            gecko: env.provider("GECKO", gecko_lag, &fast_backoff, idle_timeout)?,
        };

        Ok(Self {
            region,
            credentials,
            server,
            checks,
            rest,
            auth,
            providers,
            instruments: default_instruments(),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable is set but unusable.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn secret(&self, key: &str) -> Option<ApiKey> {
        self.string(key).map(ApiKey::new)
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.string(key).and_then(|v| v.parse().ok())
    }

    fn u16(&self, key: &str, default: u16) -> u16 {
        self.parsed(key).unwrap_or(default)
    }

    fn usize(&self, key: &str, default: usize) -> usize {
        self.parsed(key).unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.parsed::<u64>(key).map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.parsed::<u64>(key).map_or(default, Duration::from_millis)
    }

    fn provider(
        &self,
        prefix: &str,
        lag: LagPolicy,
        backoff: &ReconnectConfig,
        idle_timeout: Duration,
    ) -> Result<ProviderSettings, ConfigError> {
        let lag = LagPolicy {
            ceiling: self.duration_millis(&format!("{prefix}_LAG_CEILING_MS"), lag.ceiling),
            skew_tolerance: self
                .duration_millis(&format!("{prefix}_SKEW_TOLERANCE_MS"), lag.skew_tolerance),
            negative: self
                .string(&format!("{prefix}_NEGATIVE_LAG"))
                .map_or(lag.negative, |v| NegativeLagMode::from_str_case_insensitive(&v)),
            slow_threshold: lag.slow_threshold,
        };
        if lag.ceiling.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: format!("{prefix}_LAG_CEILING_MS"),
                reason: "must be greater than zero".to_string(),
            });
        }

        let reconnect = ReconnectConfig {
            initial_delay: self
                .duration_secs(&format!("{prefix}_BACKOFF_BASE_SECS"), backoff.initial_delay),
            max_delay: self.duration_secs(&format!("{prefix}_BACKOFF_MAX_SECS"), backoff.max_delay),
            max_attempts: self
                .parsed(&format!("{prefix}_MAX_ATTEMPTS"))
                .unwrap_or(backoff.max_attempts),
            ..backoff.clone()
        };
        if reconnect.initial_delay > reconnect.max_delay {
            return Err(ConfigError::InvalidValue {
                key: format!("{prefix}_BACKOFF_BASE_SECS"),
                reason: format!("exceeds {prefix}_BACKOFF_MAX_SECS"),
            });
        }

        Ok(ProviderSettings {
            lag,
            reconnect,
            idle_timeout,
            ..ProviderSettings::default()
        })
    }
}
