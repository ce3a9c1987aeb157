//! Triggered Check Dispatcher
//!
//! Multi-producer, single-consumer queue of [`CheckRequest`]s. Producers are
//! stream receive loops and must never wait, so [`CheckDispatcher::enqueue`]
//! uses `try_send` and drops the request when the queue is full. A single
//! [`CheckWorker`] drains the queue, waits a fixed delay so the provider's
//! own indexing can catch up, then runs the downstream checks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{CheckExecutor, MetricsSink};
use crate::domain::check::{CheckOutcome, CheckReport, CheckRequest, CoverageTally, MetadataField};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Queue bound.
    pub capacity: usize,
    /// Delay before each check.
    pub check_delay: Duration,
    /// Log a coverage summary every this many completed requests (0 = never).
    pub summary_every: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            check_delay: Duration::from_secs(2),
            summary_every: 50,
        }
    }
}

/// Result of [`CheckDispatcher::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The request is waiting for the worker.
    Queued,
    /// The queue was full or the worker has stopped.
    Dropped,
}

/// Producer side of the check queue. Shared across all stream tasks.
pub struct CheckDispatcher {
    tx: mpsc::Sender<CheckRequest>,
    sink: Arc<dyn MetricsSink>,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

impl std::fmt::Debug for CheckDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckDispatcher")
            .field("enqueued", &self.enqueued_count())
            .field("dropped", &self.dropped_count())
            .finish_non_exhaustive()
    }
}

impl CheckDispatcher {
    /// Create the dispatcher and its worker. The worker must be spawned.
    #[must_use]
    pub fn new(
        config: DispatcherConfig,
        executor: Arc<dyn CheckExecutor>,
        sink: Arc<dyn MetricsSink>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, CheckWorker) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));

        let dispatcher = Arc::new(Self {
            tx,
            sink: Arc::clone(&sink),
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let worker = CheckWorker {
            rx,
            executor,
            sink,
            check_delay: config.check_delay,
            summary_every: config.summary_every,
            cancel,
            tally: CoverageTally::default(),
            completed: 0,
        };

        (dispatcher, worker)
    }

    /// Queue a request without waiting. A full queue drops the request.
    pub fn enqueue(&self, request: CheckRequest) -> EnqueueOutcome {
        match self.tx.try_send(request) {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Queued
            }
            Err(TrySendError::Full(request)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.sink.record_check_dropped();
                tracing::warn!(
                    address = %request.address,
                    chain = %request.chain,
                    source = %request.source,
                    "Check queue full, dropping request"
                );
                EnqueueOutcome::Dropped
            }
            Err(TrySendError::Closed(request)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.sink.record_check_dropped();
                tracing::debug!(
                    address = %request.address,
                    "Check worker stopped, dropping request"
                );
                EnqueueOutcome::Dropped
            }
        }
    }

    /// Requests accepted into the queue.
    #[must_use]
    pub fn enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Requests dropped.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side of the check queue.
pub struct CheckWorker {
    rx: mpsc::Receiver<CheckRequest>,
    executor: Arc<dyn CheckExecutor>,
    sink: Arc<dyn MetricsSink>,
    check_delay: Duration,
    summary_every: u64,
    cancel: CancellationToken,
    tally: CoverageTally,
    completed: u64,
}

impl CheckWorker {
    /// Drain the queue until cancelled or every producer is gone.
    pub async fn run(mut self) {
        tracing::info!(delay_ms = self.check_delay.as_millis(), "Check worker started");

        loop {
            let request = tokio::select! {
                () = self.cancel.cancelled() => break,
                request = self.rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.check_delay) => {}
            }

            let reports = tokio::select! {
                () = self.cancel.cancelled() => break,
                reports = self.executor.execute(&request) => reports,
            };

            for report in &reports {
                self.forward(report);
            }
            log_request_result(&request, &reports);

            self.completed += 1;
            if self.summary_every > 0 && self.completed % self.summary_every == 0 {
                self.log_summary();
            }
        }

        self.log_summary();
        tracing::info!(completed = self.completed, "Check worker stopped");
    }

    fn forward(&mut self, report: &CheckReport) {
        match &report.outcome {
            CheckOutcome::Coverage(coverage) => {
                for (field, present) in coverage.fields() {
                    self.sink.record_metadata_coverage(
                        &report.provider,
                        &report.chain,
                        field,
                        present,
                    );
                }
                self.sink.record_metadata_latency(
                    &report.provider,
                    &report.chain,
                    duration_ms(report.latency),
                );
            }
            CheckOutcome::Failed { error_kind } => {
                self.sink
                    .record_error(&report.provider, &report.chain, error_kind);
            }
            CheckOutcome::Skipped { reason } => {
                tracing::debug!(provider = %report.provider, reason = %reason, "Check skipped");
                self.sink.record_error(&report.provider, &report.chain, reason);
            }
        }
        self.tally.record(report);
    }

    fn log_summary(&self) {
        for provider in self.tally.providers() {
            tracing::info!(
                provider = %provider,
                checks = self.tally.checks(&provider),
                logo_pct = self.tally.coverage_pct(&provider, MetadataField::Logo),
                description_pct = self.tally.coverage_pct(&provider, MetadataField::Description),
                twitter_pct = self.tally.coverage_pct(&provider, MetadataField::Twitter),
                website_pct = self.tally.coverage_pct(&provider, MetadataField::Website),
                "Metadata coverage summary"
            );
        }
    }
}

fn log_request_result(request: &CheckRequest, reports: &[CheckReport]) {
    let summary: Vec<String> = reports
        .iter()
        .map(|report| match &report.outcome {
            CheckOutcome::Coverage(c) => format!(
                "{}:logo={},desc={},twitter={},web={}",
                report.provider, c.logo, c.description, c.twitter, c.website
            ),
            CheckOutcome::Failed { error_kind } => format!("{}:{error_kind}", report.provider),
            CheckOutcome::Skipped { reason } => format!("{}:skipped({reason})", report.provider),
        })
        .collect();

    tracing::info!(
        address = %request.address,
        chain = %request.chain,
        symbol = request.symbol.as_deref().unwrap_or("-"),
        results = %summary.join(" "),
        "Metadata check completed"
    );
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
