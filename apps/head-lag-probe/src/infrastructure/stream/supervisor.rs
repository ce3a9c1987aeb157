//! Reconnection Supervisor
//!
//! Keeps one provider session alive for the lifetime of the process.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::provider::{FailureKind, StreamProvider};
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use super::session::{ALL_CHAINS, SessionEnd, StreamSession};
use super::status::ProviderStatus;
use crate::application::ports::MetricsSink;

/// Something the supervisor can restart.
#[async_trait]
pub trait SupervisedStream: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Shared status handle.
    fn status(&self) -> Arc<ProviderStatus>;

    /// One connection attempt.
    async fn run_once(&self) -> SessionEnd;

    /// Drop cached credentials.
    async fn invalidate_credentials(&self);
}

#[async_trait]
impl<P: StreamProvider> SupervisedStream for StreamSession<P> {
    fn name(&self) -> &str {
        self.provider().name()
    }

    fn status(&self) -> Arc<ProviderStatus> {
        Self::status(self)
    }

    async fn run_once(&self) -> SessionEnd {
        Self::run_once(self).await
    }

    async fn invalidate_credentials(&self) {
        self.provider().invalidate_credentials().await;
    }
}

/// Restarts a stream with backoff until cancelled.
pub struct StreamSupervisor<S> {
    stream: S,
    policy: ReconnectPolicy,
    sink: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
}

impl<S: SupervisedStream> StreamSupervisor<S> {
    /// Create a supervisor.
    #[must_use]
    pub fn new(
        stream: S,
        config: ReconnectConfig,
        sink: Arc<dyn MetricsSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream,
            policy: ReconnectPolicy::new(config),
            sink,
            cancel,
        }
    }

    /// Run until cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`ReconnectError::MaxAttemptsExceeded`] when the configured
    /// attempt limit is reached.
    pub async fn run(mut self) -> Result<(), ReconnectError> {
        let status = self.stream.status();

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(provider = self.stream.name(), "Supervisor cancelled");
                return Ok(());
            }

            let (error, streamed) = match self.stream.run_once().await {
                SessionEnd::Cancelled => {
                    self.policy.reset();
                    tracing::info!(provider = self.stream.name(), "Stream stopped");
                    return Ok(());
                }
                SessionEnd::Failed { error, streamed } => (error, streamed),
            };

            if streamed {
                self.policy.reset();
            }

            let name = self.stream.name();
            let kind = error.failure_kind();
            tracing::warn!(
                provider = name,
                error = %error,
                failure = kind.as_str(),
                streamed,
                "Stream disconnected"
            );

            if kind == FailureKind::Auth {
                self.stream.invalidate_credentials().await;
            }
            self.sink
                .record_error(name, ALL_CHAINS, kind.error_kind().as_str());
            self.sink.record_reconnect(name, kind.as_str());

            let Some(delay) = self.policy.next_delay(kind) else {
                tracing::error!(provider = name, "Giving up on stream");
                return Err(ReconnectError::MaxAttemptsExceeded(self.policy.attempt_count()));
            };
            status.increment_reconnect_attempts();

            tracing::info!(
                provider = name,
                attempt = self.policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting"
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!(provider = self.stream.name(), "Cancelled during reconnect delay");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
