//! Stream Session Integration Tests
//!
//! Runs a real WebSocket session against a local ActionCable-style server
//! and checks what reaches the metrics sink.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_util::sync::CancellationToken;

use head_lag_probe::application::ports::{Clock, MetricsSink};
use head_lag_probe::application::services::MeasurementRecorder;
use head_lag_probe::domain::check::MetadataField;
use head_lag_probe::domain::instrument::MonitoredInstrument;
use head_lag_probe::domain::lag::LagPolicy;
use head_lag_probe::infrastructure::stream::{
    ConnectionState, FailureKind, GeckoTerminalProvider, ProviderSettings, SessionEnd,
    StreamSession,
};

const POOL_ID: &str = "162840764";

/// Sink that keeps lag observations and error labels.
#[derive(Default)]
struct RecordingSink {
    lags: Mutex<Vec<(String, String, u64)>>,
    errors: Mutex<Vec<(String, String, String)>>,
}

impl MetricsSink for RecordingSink {
    fn record_lag(&self, provider: &str, chain: &str, lag_ms: u64) {
        self.lags
            .lock()
            .push((provider.to_string(), chain.to_string(), lag_ms));
    }

    fn record_error(&self, provider: &str, chain: &str, error_kind: &str) {
        self.errors.lock().push((
            provider.to_string(),
            chain.to_string(),
            error_kind.to_string(),
        ));
    }

    fn record_discovery_latency(&self, _: &str, _: &str, _: u64) {}
    fn record_metadata_coverage(&self, _: &str, _: &str, _: MetadataField, _: bool) {}
    fn record_metadata_latency(&self, _: &str, _: &str, _: u64) {}
    fn record_block_number(&self, _: &str, _: &str, _: u64) {}
    fn record_reconnect(&self, _: &str, _: &str) {}
    fn record_check_dropped(&self) {}
    fn record_rest_latency(&self, _: &str, _: &str, _: &str, _: u64, _: u16) {}
    fn record_rest_error(&self, _: &str, _: &str, _: &str, _: &str) {}
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

fn base_pool() -> MonitoredInstrument {
    MonitoredInstrument::new(
        "WETH/USDC Base",
        "base",
        "0x4c36388be6f416a29c8d8eee81c771ce6be14b18",
        "evm:8453",
        8453,
        POOL_ID,
    )
}

fn identifier() -> String {
    json!({ "channel": "SwapChannel", "pool_id": POOL_ID }).to_string()
}

fn session(
    addr: std::net::SocketAddr,
    sink: &Arc<RecordingSink>,
    cancel: &CancellationToken,
) -> StreamSession<GeckoTerminalProvider> {
    let sink_dyn: Arc<dyn MetricsSink> = Arc::clone(sink) as Arc<dyn MetricsSink>;
    let provider = GeckoTerminalProvider::new(
        format!("ws://{addr}/cable"),
        &[base_pool()],
        ProviderSettings::default(),
    );
    let recorder = MeasurementRecorder::new(
        "geckoterminal",
        LagPolicy::default(),
        Arc::clone(&sink_dyn),
    );
    StreamSession::new(
        Arc::new(provider),
        Arc::new(recorder),
        sink_dyn,
        cancel.clone(),
    )
    .with_clock(Arc::new(FixedClock(
        Utc.timestamp_millis_opt(1_700_000_000_500).unwrap(),
    )))
}

/// Accept one connection, greet, confirm the subscription, send one swap.
/// Returns the subscribe frames the client sent.
async fn serve_one_swap(listener: TcpListener, close_after: bool) -> Vec<String> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    ws.send(Message::Text(json!({ "type": "welcome" }).to_string().into()))
        .await
        .unwrap();

    let mut subscribes = Vec::new();
    if let Some(Ok(Message::Text(text))) = ws.next().await {
        subscribes.push(text.as_str().to_string());
    }

    ws.send(Message::Text(
        json!({ "type": "confirm_subscription", "identifier": identifier() })
            .to_string()
            .into(),
    ))
    .await
    .unwrap();
    ws.send(Message::Text(
        json!({
            "identifier": identifier(),
            "message": {
                "type": "newSwap",
                "data": { "block_timestamp": 1_700_000_000_000_i64, "tx_hash": "0xabc" },
            },
        })
        .to_string()
        .into(),
    ))
    .await
    .unwrap();

    if close_after {
        ws.close(None).await.unwrap();
    } else {
        // Hold the connection open until the client closes it.
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
    }
    subscribes
}

#[tokio::test]
async fn swap_is_measured_against_receipt_time() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_one_swap(listener, false));

    let sink = Arc::new(RecordingSink::default());
    let cancel = CancellationToken::new();
    let session = Arc::new(session(addr, &sink, &cancel));
    let status = session.status();

    let runner = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run_once().await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while sink.lags.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no lag recorded");

    assert_eq!(
        sink.lags.lock().as_slice(),
        [("geckoterminal".to_string(), "base".to_string(), 500)]
    );
    assert_eq!(status.get_state(), ConnectionState::Streaming);
    assert_eq!(status.snapshot().measurements, 1);

    cancel.cancel();
    let end = runner.await.unwrap();
    assert!(matches!(end, SessionEnd::Cancelled));
    assert_eq!(status.get_state(), ConnectionState::Disconnected);

    let subscribes = server.await.unwrap();
    assert_eq!(subscribes.len(), 1);
    let frame: serde_json::Value = serde_json::from_str(&subscribes[0]).unwrap();
    assert_eq!(frame["command"], "subscribe");
    assert_eq!(frame["identifier"], identifier());
}

#[tokio::test]
async fn server_close_after_streaming_is_reported_as_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_one_swap(listener, true));

    let sink = Arc::new(RecordingSink::default());
    let cancel = CancellationToken::new();
    let session = session(addr, &sink, &cancel);

    let end = tokio::time::timeout(Duration::from_secs(5), session.run_once())
        .await
        .expect("session did not end");

    match end {
        SessionEnd::Failed { error, streamed } => {
            assert!(streamed);
            assert_eq!(error.failure_kind(), FailureKind::Transient);
        }
        SessionEnd::Cancelled => panic!("expected failure"),
    }
    assert_eq!(sink.lags.lock().len(), 1);
    assert!(session.status().snapshot().last_error.is_some());
}

#[tokio::test]
async fn upgrade_rejected_with_429_is_rate_limited() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let reject = |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
            Err(http::Response::builder()
                .status(http::StatusCode::TOO_MANY_REQUESTS)
                .body(None)
                .unwrap())
        };
        let _ = tokio_tungstenite::accept_hdr_async(stream, reject).await;
    });

    let sink = Arc::new(RecordingSink::default());
    let cancel = CancellationToken::new();
    let session = session(addr, &sink, &cancel);

    let end = tokio::time::timeout(Duration::from_secs(5), session.run_once())
        .await
        .expect("session did not end");

    match end {
        SessionEnd::Failed { error, streamed } => {
            assert!(!streamed);
            assert_eq!(error.failure_kind(), FailureKind::RateLimited);
        }
        SessionEnd::Cancelled => panic!("expected failure"),
    }
    assert!(sink.lags.lock().is_empty());
}
