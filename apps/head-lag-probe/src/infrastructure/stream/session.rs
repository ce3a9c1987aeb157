//! Stream Session
//!
//! One connection attempt against a [`StreamProvider`]: dial, handshake,
//! subscribe, then read frames until failure or cancellation. Receipt time
//! is captured immediately after each read, before any decoding.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::provider::{Frame, StreamError, StreamProvider};
use super::status::{ConnectionState, ProviderStatus};
use crate::application::ports::{Clock, ErrorKind, MetricsSink, SystemClock};
use crate::application::services::MeasurementRecorder;

/// Chain label for errors that are not tied to one chain.
pub const ALL_CHAINS: &str = "all";

/// How a session attempt ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Shutdown was requested.
    Cancelled,
    /// The attempt failed.
    Failed {
        /// Cause.
        error: StreamError,
        /// Whether the connection reached streaming before failing.
        streamed: bool,
    },
}

/// Connection loop for one provider.
pub struct StreamSession<P> {
    provider: Arc<P>,
    recorder: Arc<MeasurementRecorder>,
    status: Arc<ProviderStatus>,
    sink: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl<P> std::fmt::Debug for StreamSession<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("provider", &self.status.provider())
            .field("state", &self.status.get_state())
            .finish_non_exhaustive()
    }
}

impl<P: StreamProvider> StreamSession<P> {
    /// Create a session using the system clock.
    #[must_use]
    pub fn new(
        provider: Arc<P>,
        recorder: Arc<MeasurementRecorder>,
        sink: Arc<dyn MetricsSink>,
        cancel: CancellationToken,
    ) -> Self {
        let status = Arc::new(ProviderStatus::new(provider.name()));
        Self {
            provider,
            recorder,
            status,
            sink,
            clock: Arc::new(SystemClock),
            cancel,
        }
    }

    /// Replace the receipt clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Shared status handle.
    #[must_use]
    pub fn status(&self) -> Arc<ProviderStatus> {
        Arc::clone(&self.status)
    }

    /// The provider driven by this session.
    #[must_use]
    pub const fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Run one connection attempt to completion.
    pub async fn run_once(&self) -> SessionEnd {
        let mut streamed = false;
        let result = tokio::select! {
            biased;
            result = self.connect_and_stream(&mut streamed) => result,
            () = self.cancel.cancelled() => Ok(()),
        };

        match result {
            Ok(()) => {
                self.status.transition(ConnectionState::Disconnected);
                SessionEnd::Cancelled
            }
            Err(error) => {
                self.status.set_error(error.to_string());
                SessionEnd::Failed { error, streamed }
            }
        }
    }

    async fn connect_and_stream(&self, streamed: &mut bool) -> Result<(), StreamError> {
        let name = self.provider.name();
        let settings = self.provider.settings();

        self.status.transition(ConnectionState::Connecting);
        let handshake = self.provider.connect().await?;
        tracing::info!(provider = name, url = %handshake.request.uri(), "Connecting to stream");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(handshake.request).await?;
        let (mut write, mut read) = ws_stream.split();

        self.status.transition(ConnectionState::Handshaking);
        if let Some(init) = handshake.init_frame {
            write.send(Message::Text(init.into())).await?;
        }
        if handshake.await_ack {
            let ack = tokio::time::timeout(settings.ack_timeout, next_text(&mut read))
                .await
                .map_err(|_| StreamError::HandshakeTimeout(settings.ack_timeout))??;
            self.provider.acknowledge(&ack)?;
            tracing::debug!(provider = name, "Handshake acknowledged");
        }

        self.status.transition(ConnectionState::Subscribing);
        let frames = self.provider.subscribe();
        let count = frames.len();
        for (index, frame) in frames.into_iter().enumerate() {
            write
                .send(Message::Text(frame.into()))
                .await
                .map_err(|source| StreamError::SubscribeFailed { index, source })?;
        }

        self.status.transition(ConnectionState::Streaming);
        *streamed = true;
        tracing::info!(provider = name, subscriptions = count, "Streaming");

        let keepalive = self.provider.keepalive();
        let mut ticker = keepalive.as_ref().map(|k| {
            let mut interval = tokio::time::interval_at(Instant::now() + k.interval, k.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let idle_timeout = settings.idle_timeout;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                () = tick(ticker.as_mut()) => {
                    if let Some(keepalive) = &keepalive {
                        write.send(Message::Text(keepalive.frame.clone().into())).await?;
                    }
                }
                next = tokio::time::timeout(idle_timeout, read.next()) => {
                    let received_at = self.clock.now();
                    match next {
                        Err(_) => return Err(StreamError::IdleTimeout(idle_timeout)),
                        Ok(Some(Ok(Message::Text(text)))) => {
                            if let Some(reply) = self.process_frame(text.as_str(), received_at)? {
                                write.send(Message::Text(reply.into())).await?;
                            }
                        }
                        Ok(Some(Ok(Message::Ping(data)))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Ok(Some(Ok(Message::Close(frame)))) => {
                            tracing::info!(provider = name, frame = ?frame, "Server sent close frame");
                            return Err(StreamError::ConnectionClosed);
                        }
                        Ok(Some(Ok(_))) => {}
                        Ok(Some(Err(e))) => return Err(e.into()),
                        Ok(None) => {
                            tracing::info!(provider = name, "WebSocket stream ended");
                            return Err(StreamError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Handle one decoded text frame.
    ///
    /// Returns a reply to send back, if any. Decode failures and provider
    /// error frames are counted and skipped; only termination ends the
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Terminated`] when the provider ends the stream.
    pub fn process_frame(
        &self,
        text: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Option<String>, StreamError> {
        self.status.increment_messages();
        let name = self.provider.name();

        match self.provider.parse_frame(text) {
            Ok(Frame::KeepAlive { reply }) => Ok(reply),
            Ok(Frame::Data(candidates)) => {
                for candidate in candidates {
                    let Some(event) = candidate.normalize() else {
                        tracing::trace!(provider = name, "Skipping incomplete event");
                        continue;
                    };
                    if self.recorder.record(event, received_at).is_some() {
                        self.status.increment_measurements();
                    }
                }
                Ok(None)
            }
            Ok(Frame::Error(message)) => {
                tracing::warn!(provider = name, error = %message, "Provider error frame");
                self.sink
                    .record_error(name, ALL_CHAINS, ErrorKind::ErrorFrame.as_str());
                Ok(None)
            }
            Ok(Frame::Terminated(reason)) => Err(StreamError::Terminated(reason)),
            Ok(Frame::Ignored) => Ok(None),
            Err(e) => {
                tracing::debug!(provider = name, error = %e, "Skipping undecodable frame");
                self.sink
                    .record_error(name, ALL_CHAINS, ErrorKind::Decode.as_str());
                Ok(None)
            }
        }
    }
}

async fn next_text<S>(read: &mut S) -> Result<String, StreamError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
            Some(Ok(Message::Close(_))) | None => return Err(StreamError::ConnectionClosed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
