//! Head Lag Probe Binary
//!
//! Starts every provider stream whose credentials are configured, the
//! triggered check worker, the REST and swap quote pollers and the health
//! server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin head-lag-probe
//! ```
//!
//! # Environment Variables
//!
//! ## Credentials (each optional)
//! - `MOBULA_API_KEY`: enables the Mobula streams, REST and quote pollers, and metadata checks
//! - `CODEX_API_KEY`: enables the Codex launchpad stream and REST poller
//! - `DEFINED_SESSION_COOKIE`: enables the Codex pool stream and metadata checks
//!
//! ## Optional
//! - `MONITOR_REGION`: region label on lag metrics (default: unknown)
//! - `PROBE_METRICS_PORT`: metrics and health HTTP port (default: 2112)
//! - `OTEL_ENABLED`: export traces over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)
//!
//! # Signals
//!
//! SIGHUP re-reads `DEFINED_SESSION_COOKIE` from `.env` and drops the cached
//! bearer token so the next request mints one from the new cookie.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use head_lag_probe::application::ports::{CheckExecutor, MetricsSink};
use head_lag_probe::application::services::{CheckDispatcher, MeasurementRecorder};
use head_lag_probe::infrastructure::auth::{
    BearerSource, DEFAULT_VALIDITY, DEFINED_TOKEN_ENDPOINT, DefinedTokenExchange,
    SessionCredential, TokenCache,
};
use head_lag_probe::infrastructure::checks::{
    CodexRestProbe, MetadataCheckExecutor, MetadataEndpoints, MobulaRestProbe, QuoteApi,
    QuoteProbe, QuoteTarget, REST_TARGETS, RestPoller, RestTarget, build_client,
};
use head_lag_probe::infrastructure::health::{HealthServer, HealthServerState};
use head_lag_probe::infrastructure::stream::{
    CODEX_STREAM_URL, CodexLaunchpadProvider, CodexProvider, GECKO_STREAM_URL,
    GeckoTerminalProvider, MOBULA_PULSE_STREAM_URL, MOBULA_STREAM_URL, MobulaProvider,
    MobulaPulseProvider, ProviderStatus, StreamProvider, StreamSession, StreamSupervisor,
};
use head_lag_probe::infrastructure::telemetry;
use head_lag_probe::{ProbeConfig, PrometheusSink, init_metrics};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Handles shared by every spawned stream.
struct Runtime {
    sink: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
    statuses: Vec<Arc<ProviderStatus>>,
}

impl Runtime {
    /// Wire a provider into a session and supervisor and spawn it.
    fn spawn_stream<P: StreamProvider>(
        &mut self,
        provider: P,
        dispatcher: Option<&Arc<CheckDispatcher>>,
    ) {
        let name = provider.name().to_string();
        let settings = provider.settings().clone();

        let mut recorder =
            MeasurementRecorder::new(name.clone(), settings.lag, Arc::clone(&self.sink));
        if let Some(dispatcher) = dispatcher {
            recorder = recorder.with_dispatcher(Arc::clone(dispatcher));
        }

        let session = StreamSession::new(
            Arc::new(provider),
            Arc::new(recorder),
            Arc::clone(&self.sink),
            self.cancel.clone(),
        );
        self.statuses.push(session.status());

        let supervisor = StreamSupervisor::new(
            session,
            settings.reconnect,
            Arc::clone(&self.sink),
            self.cancel.clone(),
        );
        self.tasks.spawn(async move {
            if let Err(e) = supervisor.run().await {
                tracing::error!(provider = %name, error = %e, "Stream supervisor gave up");
            }
        });
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Head Lag Probe");

    let _metrics_handle = init_metrics().context("failed to install Prometheus recorder")?;

    let config = ProbeConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let mut runtime = Runtime {
        sink: Arc::new(PrometheusSink::new(config.region.clone())),
        cancel: shutdown_token.clone(),
        tasks: JoinSet::new(),
        statuses: Vec::new(),
    };

    // Bearer tokens for Codex, minted from the session credential
    let credential = Arc::new(SessionCredential::new(
        config
            .credentials
            .defined_session
            .as_ref()
            .map(|key| key.expose().to_string()),
    ));
    let exchange = DefinedTokenExchange::new(DEFINED_TOKEN_ENDPOINT)
        .context("failed to build token exchange client")?;
    let token_cache = Arc::new(TokenCache::with_policy(
        Arc::new(exchange),
        config.auth.safety_margin,
        DEFAULT_VALIDITY,
    ));
    let bearer = BearerSource::new(credential, token_cache);

    // Triggered metadata checks
    let executor = MetadataCheckExecutor::new(
        MetadataEndpoints::default(),
        config.credentials.mobula_api_key.clone(),
        bearer.clone(),
    )
    .context("failed to build metadata check client")?;
    let (dispatcher, worker) = CheckDispatcher::new(
        config.checks.clone(),
        Arc::new(executor) as Arc<dyn CheckExecutor>,
        Arc::clone(&runtime.sink),
        shutdown_token.clone(),
    );
    runtime.tasks.spawn(worker.run());

    // Provider streams
    let providers = &config.providers;
    if let Some(key) = &config.credentials.mobula_api_key {
        runtime.spawn_stream(
            MobulaProvider::new(
                MOBULA_STREAM_URL,
                key.clone(),
                config.instruments.clone(),
                providers.mobula.clone(),
            ),
            None,
        );
        runtime.spawn_stream(
            MobulaPulseProvider::new(
                MOBULA_PULSE_STREAM_URL,
                key.clone(),
                providers.mobula_pulse.clone(),
            ),
            Some(&dispatcher),
        );
    } else {
        tracing::info!("MOBULA_API_KEY not set, skipping Mobula streams");
    }

    if bearer.is_configured() {
        runtime.spawn_stream(
            CodexProvider::new(
                CODEX_STREAM_URL,
                bearer.clone(),
                config.instruments.clone(),
                providers.codex.clone(),
            ),
            None,
        );
    } else {
        tracing::info!("DEFINED_SESSION_COOKIE not set, skipping Codex pool stream");
    }

    if let Some(key) = &config.credentials.codex_api_key {
        runtime.spawn_stream(
            CodexLaunchpadProvider::new(
                CODEX_STREAM_URL,
                key.clone(),
                providers.codex_launchpad.clone(),
            ),
            Some(&dispatcher),
        );
    } else {
        tracing::info!("CODEX_API_KEY not set, skipping Codex launchpad stream");
    }

    runtime.spawn_stream(
        GeckoTerminalProvider::new(
            GECKO_STREAM_URL,
            &config.instruments,
            providers.gecko.clone(),
        ),
        None,
    );

    // REST latency pollers
    let http = build_client().context("failed to build REST client")?;
    if let Some(key) = &config.credentials.mobula_api_key {
        let poller: RestPoller<RestTarget> = RestPoller::new(
            Box::new(MobulaRestProbe::production(http.clone(), key.clone())),
            REST_TARGETS.to_vec(),
            config.rest.poll_interval,
            Arc::clone(&runtime.sink),
            shutdown_token.clone(),
        );
        runtime.tasks.spawn(poller.run());
    }
    if let Some(key) = &config.credentials.codex_api_key {
        let poller: RestPoller<RestTarget> = RestPoller::new(
            Box::new(CodexRestProbe::production(http.clone(), key.clone())),
            REST_TARGETS.to_vec(),
            config.rest.poll_interval,
            Arc::clone(&runtime.sink),
            shutdown_token.clone(),
        );
        runtime.tasks.spawn(poller.run());
    }

    // Swap quote latency, one poller per aggregator
    for api in QuoteApi::ALL {
        let mut probe = QuoteProbe::production(http.clone(), api);
        if api == QuoteApi::Mobula {
            let Some(key) = &config.credentials.mobula_api_key else {
                tracing::info!("MOBULA_API_KEY not set, skipping Mobula quote poller");
                continue;
            };
            probe = probe.with_api_key(key.clone());
        }
        let poller: RestPoller<QuoteTarget> = RestPoller::new(
            Box::new(probe),
            api.targets(),
            config.rest.quote_interval,
            Arc::clone(&runtime.sink),
            shutdown_token.clone(),
        );
        runtime.tasks.spawn(poller.run());
    }

    #[cfg(unix)]
    runtime
        .tasks
        .spawn(reload_session_on_hangup(bearer.clone(), shutdown_token.clone()));

    // Health and metrics endpoint
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        runtime.statuses.clone(),
        Some(Arc::clone(&dispatcher)),
    )
    .with_bearer(bearer.clone()));
    let health_server = HealthServer::new(
        config.server.metrics_port,
        health_state,
        shutdown_token.clone(),
    );
    runtime.tasks.spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!(streams = runtime.statuses.len(), "Probe running");

    await_shutdown(shutdown_token).await;

    let mut tasks = runtime.tasks;
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            remaining = tasks.len(),
            "Shutdown timeout elapsed, aborting remaining tasks"
        );
        tasks.abort_all();
    }

    tracing::info!(
        checks_enqueued = dispatcher.enqueued_count(),
        checks_dropped = dispatcher.dropped_count(),
        "Head Lag Probe stopped"
    );
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ProbeConfig) {
    let credentials = &config.credentials;
    tracing::info!(
        region = %config.region,
        metrics_port = config.server.metrics_port,
        instruments = config.instruments.len(),
        mobula = credentials.mobula_api_key.is_some(),
        codex = credentials.codex_api_key.is_some(),
        defined_session = credentials.defined_session.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(
        check_capacity = config.checks.capacity,
        check_delay_ms = config.checks.check_delay.as_millis(),
        rest_poll_secs = config.rest.poll_interval.as_secs(),
        quote_poll_secs = config.rest.quote_interval.as_secs(),
        token_margin_secs = config.auth.safety_margin.as_secs(),
        "Tuning"
    );
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Re-read `DEFINED_SESSION_COOKIE` from `.env` on every SIGHUP and rotate
/// the bearer source onto it.
#[cfg(unix)]
async fn reload_session_on_hangup(bearer: BearerSource, cancel: CancellationToken) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!(error = %e, "SIGHUP handler unavailable, session reload disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                match read_session_cookie() {
                    Some(cookie) => bearer.rotate(cookie).await,
                    None => tracing::warn!("SIGHUP received but DEFINED_SESSION_COOKIE not found in .env"),
                }
            }
        }
    }
}

/// Current `DEFINED_SESSION_COOKIE` from the nearest `.env` file.
#[cfg(unix)]
fn read_session_cookie() -> Option<String> {
    dotenvy::dotenv_iter()
        .ok()?
        .filter_map(Result::ok)
        .find(|(key, _)| key == "DEFINED_SESSION_COOKIE")
        .map(|(_, value)| value)
        .filter(|value| !value.trim().is_empty())
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
