//! Metadata Check and REST Poller Integration Tests
//!
//! Runs the production check executor, REST probes and swap quote probes
//! against mock HTTP servers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use head_lag_probe::application::ports::{AuthError, CheckExecutor, MetricsSink, TokenExchange};
use head_lag_probe::domain::check::{
    CheckOutcome, CheckReport, CheckRequest, MetadataCoverage, MetadataField,
};
use head_lag_probe::infrastructure::auth::{BearerSource, SessionCredential, TokenCache};
use head_lag_probe::infrastructure::checks::{
    CodexRestProbe, MetadataCheckExecutor, MetadataEndpoints, MobulaRestProbe, QuoteApi,
    QuoteProbe, QuoteTarget, REST_TARGETS, RestPoller, RestTarget, build_client,
};
use head_lag_probe::infrastructure::config::ApiKey;

struct StaticExchange {
    calls: AtomicUsize,
}

#[async_trait]
impl TokenExchange for StaticExchange {
    async fn exchange(&self, _session_credential: &str) -> Result<String, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("bearer-token".to_string())
    }
}

fn bearer(session: Option<&str>) -> (BearerSource, Arc<StaticExchange>) {
    let exchange = Arc::new(StaticExchange {
        calls: AtomicUsize::new(0),
    });
    let source = BearerSource::new(
        Arc::new(SessionCredential::new(session.map(str::to_string))),
        Arc::new(TokenCache::new(
            Arc::clone(&exchange) as Arc<dyn TokenExchange>
        )),
    );
    (source, exchange)
}

fn endpoints(server: &MockServer) -> MetadataEndpoints {
    MetadataEndpoints {
        mobula_base: server.uri(),
        codex_graphql: format!("{}/graphql", server.uri()),
        jupiter_tokens: format!("{}/tokens", server.uri()),
    }
}

fn jupiter_page(id: &str, icon: &str) -> String {
    let data = json!({
        "props": { "pageProps": { "dehydratedState": { "queries": [
            { "state": { "data": { "id": id, "name": "Token", "symbol": "TKN", "icon": icon, "decimals": 6 } } }
        ] } } }
    });
    format!(
        r#"<html><body><script id="__NEXT_DATA__" type="application/json">{data}</script></body></html>"#
    )
}

fn request(chain_id: &str, chain: &str) -> CheckRequest {
    CheckRequest {
        address: "TokenMint111".to_string(),
        chain: chain.to_string(),
        chain_id: chain_id.to_string(),
        discovered_at: Utc::now(),
        source: "mobula-pulse".to_string(),
        symbol: Some("TKN".to_string()),
        name: None,
    }
}

fn report_for<'a>(reports: &'a [CheckReport], provider: &str) -> &'a CheckReport {
    reports
        .iter()
        .find(|r| r.provider == provider)
        .unwrap_or_else(|| panic!("no {provider} report"))
}

#[tokio::test]
async fn every_provider_reports_coverage_for_solana() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/2/token/details"))
        .and(query_param("address", "TokenMint111"))
        .and(query_param("blockchain", "solana"))
        .and(header("Authorization", "mobula-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "logo": "https://img/logo.png",
                "description": "",
                "socials": { "twitter": "https://x.com/tkn", "website": null },
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("Authorization", "Bearer bearer-token"))
        .and(body_partial_json(json!({
            "variables": { "address": "TokenMint111", "networkId": 1_399_811_149_u64 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "token": {
                "address": "TokenMint111",
                "info": { "imageLargeUrl": "https://img/l.png", "description": "Meme" },
                "socialLinks": { "twitter": null, "website": "https://tkn.io" },
            } }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tokens/TokenMint111"))
        .and(header(
            "User-Agent",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36",
        ))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(jupiter_page("TokenMint111", "https://img/jup.png")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (bearer, _) = bearer(Some("session"));
    let executor = MetadataCheckExecutor::new(
        endpoints(&server),
        Some(ApiKey::new("mobula-key")),
        bearer,
    )
    .unwrap();

    let reports = executor.execute(&request("solana:solana", "solana")).await;
    assert_eq!(reports.len(), 3);
    assert_eq!(
        report_for(&reports, "jupiter").outcome,
        CheckOutcome::Coverage(MetadataCoverage {
            logo: true,
            ..MetadataCoverage::default()
        })
    );

    assert_eq!(
        report_for(&reports, "mobula").outcome,
        CheckOutcome::Coverage(MetadataCoverage {
            logo: true,
            description: false,
            twitter: true,
            website: false,
        })
    );
    let codex = report_for(&reports, "codex");
    assert_eq!(codex.chain, "solana");
    assert_eq!(
        codex.outcome,
        CheckOutcome::Coverage(MetadataCoverage {
            logo: true,
            description: true,
            twitter: false,
            website: true,
        })
    );
}

#[tokio::test]
async fn codex_401_invalidates_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let (bearer, exchange) = bearer(Some("session"));
    let executor = MetadataCheckExecutor::new(endpoints(&server), None, bearer).unwrap();

    let first = executor.execute(&request("evm:8453", "base")).await;
    assert_eq!(first.len(), 1);
    assert_eq!(
        first[0].outcome,
        CheckOutcome::Failed {
            error_kind: "status_401".to_string()
        }
    );

    executor.execute(&request("evm:8453", "base")).await;
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_session_credential_skips_codex() {
    let server = MockServer::start().await;
    let (bearer, exchange) = bearer(None);
    let executor = MetadataCheckExecutor::new(endpoints(&server), None, bearer).unwrap();

    let reports = executor.execute(&request("evm:56", "bnb")).await;

    assert_eq!(
        reports,
        vec![CheckReport {
            provider: "codex".to_string(),
            chain: "bnb".to_string(),
            latency: Duration::ZERO,
            outcome: CheckOutcome::Skipped {
                reason: "session_credential_missing".to_string()
            },
        }]
    );
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 0);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_chain_skips_codex_and_unknown_token_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "token": null } })))
        .mount(&server)
        .await;

    let (bearer, _) = bearer(Some("session"));
    let executor = MetadataCheckExecutor::new(endpoints(&server), None, bearer).unwrap();

    let unsupported = executor.execute(&request("tron:mainnet", "tron")).await;
    assert_eq!(
        unsupported[0].outcome,
        CheckOutcome::Skipped {
            reason: "unsupported_chain".to_string()
        }
    );

    let missing = executor.execute(&request("evm:1", "ethereum")).await;
    assert_eq!(
        missing[0].outcome,
        CheckOutcome::Failed {
            error_kind: "token_not_found".to_string()
        }
    );
}

#[tokio::test]
async fn jupiter_page_failures_are_labelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tokens/TokenMint111"))
        .respond_with(ResponseTemplate::new(200).set_body_string(jupiter_page("OtherMint", "")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tokens/TokenMint111"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tokens/TokenMint111"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let (bearer, _) = bearer(None);
    let executor = MetadataCheckExecutor::new(endpoints(&server), None, bearer).unwrap();

    let mut labels = Vec::new();
    for _ in 0..3 {
        let reports = executor.execute(&request("solana", "solana")).await;
        match &report_for(&reports, "jupiter").outcome {
            CheckOutcome::Failed { error_kind } => labels.push(error_kind.clone()),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(labels, ["token_not_found", "next_data_not_found", "status_403"]);
}

#[tokio::test]
async fn jupiter_is_not_asked_about_evm_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tokens/TokenMint111"))
        .respond_with(ResponseTemplate::new(200).set_body_string(jupiter_page("TokenMint111", "x")))
        .expect(0)
        .mount(&server)
        .await;

    let (bearer, _) = bearer(None);
    let executor = MetadataCheckExecutor::new(endpoints(&server), None, bearer).unwrap();

    let reports = executor.execute(&request("evm:8453", "base")).await;
    assert!(reports.iter().all(|r| r.provider != "jupiter"));
}

#[tokio::test]
async fn mobula_error_status_is_labelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/2/token/details"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (bearer, _) = bearer(None);
    let executor = MetadataCheckExecutor::new(
        endpoints(&server),
        Some(ApiKey::new("mobula-key")),
        bearer,
    )
    .unwrap();

    let reports = executor.execute(&request("evm:8453", "base")).await;
    assert_eq!(
        report_for(&reports, "mobula").outcome,
        CheckOutcome::Failed {
            error_kind: "status_404".to_string()
        }
    );
}

// =============================================================================
// REST pollers
// =============================================================================

#[derive(Default)]
struct RestRecorder {
    latencies: Mutex<Vec<(String, String, String, u16)>>,
    errors: Mutex<Vec<(String, String, String, String)>>,
}

impl MetricsSink for RestRecorder {
    fn record_lag(&self, _: &str, _: &str, _: u64) {}
    fn record_error(&self, _: &str, _: &str, _: &str) {}
    fn record_discovery_latency(&self, _: &str, _: &str, _: u64) {}
    fn record_metadata_coverage(&self, _: &str, _: &str, _: MetadataField, _: bool) {}
    fn record_metadata_latency(&self, _: &str, _: &str, _: u64) {}
    fn record_block_number(&self, _: &str, _: &str, _: u64) {}
    fn record_reconnect(&self, _: &str, _: &str) {}
    fn record_check_dropped(&self) {}

    fn record_rest_latency(
        &self,
        provider: &str,
        endpoint: &str,
        chain: &str,
        _latency_ms: u64,
        status_code: u16,
    ) {
        self.latencies.lock().push((
            provider.to_string(),
            endpoint.to_string(),
            chain.to_string(),
            status_code,
        ));
    }

    fn record_rest_error(&self, provider: &str, endpoint: &str, chain: &str, error_type: &str) {
        self.errors.lock().push((
            provider.to_string(),
            endpoint.to_string(),
            chain.to_string(),
            error_type.to_string(),
        ));
    }
}

#[tokio::test]
async fn mobula_poller_requests_history_per_chain() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/1/market/history/pair"))
        .and(query_param("period", "1min"))
        .and(query_param("amount", "5"))
        .and(header("Authorization", "mobula-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .expect(4)
        .mount(&server)
        .await;

    let sink = Arc::new(RestRecorder::default());
    let poller: RestPoller<RestTarget> = RestPoller::new(
        Box::new(MobulaRestProbe::new(
            build_client().unwrap(),
            server.uri(),
            ApiKey::new("mobula-key"),
        )),
        REST_TARGETS.to_vec(),
        Duration::from_secs(20),
        Arc::clone(&sink) as Arc<dyn MetricsSink>,
        CancellationToken::new(),
    );

    poller.poll_once().await;

    let latencies = sink.latencies.lock();
    let chains: Vec<&str> = latencies.iter().map(|(_, _, c, _)| c.as_str()).collect();
    assert_eq!(chains, ["solana", "bnb", "base", "monad"]);
    assert!(
        latencies
            .iter()
            .all(|(p, e, _, s)| p == "mobula" && e == "market_data" && *s == 200)
    );
    assert!(sink.errors.lock().is_empty());
}

#[tokio::test]
async fn codex_poller_classifies_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("Authorization", "codex-key"))
        .and(body_partial_json(json!({ "variables": { "networkId": 143 } })))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "getBars": null } })))
        .mount(&server)
        .await;

    let sink = Arc::new(RestRecorder::default());
    let poller: RestPoller<RestTarget> = RestPoller::new(
        Box::new(CodexRestProbe::new(
            build_client().unwrap(),
            server.uri(),
            ApiKey::new("codex-key"),
        )),
        REST_TARGETS.to_vec(),
        Duration::from_secs(20),
        Arc::clone(&sink) as Arc<dyn MetricsSink>,
        CancellationToken::new(),
    );

    poller.poll_once().await;

    assert_eq!(sink.latencies.lock().len(), 4);
    assert_eq!(
        sink.errors.lock().as_slice(),
        [(
            "codex".to_string(),
            "graphql".to_string(),
            "monad".to_string(),
            "server_error".to_string()
        )]
    );
}

#[tokio::test]
async fn unreachable_api_is_a_request_error() {
    let sink = Arc::new(RestRecorder::default());
    let poller: RestPoller<RestTarget> = RestPoller::new(
        Box::new(MobulaRestProbe::new(
            build_client().unwrap(),
            "http://127.0.0.1:9",
            ApiKey::new("mobula-key"),
        )),
        REST_TARGETS[..1].to_vec(),
        Duration::from_secs(20),
        Arc::clone(&sink) as Arc<dyn MetricsSink>,
        CancellationToken::new(),
    );

    poller.poll_once().await;

    assert!(sink.latencies.lock().is_empty());
    assert_eq!(sink.errors.lock()[0].3, "request_error");
}

// =============================================================================
// Swap quote pollers
// =============================================================================

fn quote_poller(
    api: QuoteApi,
    probe: QuoteProbe,
    sink: &Arc<RestRecorder>,
) -> RestPoller<QuoteTarget> {
    RestPoller::new(
        Box::new(probe),
        api.targets(),
        Duration::from_secs(30),
        Arc::clone(sink) as Arc<dyn MetricsSink>,
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn jupiter_quote_covers_solana_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quote"))
        .and(query_param("inputMint", "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"))
        .and(query_param("outputMint", "So11111111111111111111111111111111111111112"))
        .and(query_param("amount", "100000000"))
        .and(query_param("slippageBps", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "outAmount": "1" })))
        .expect(1)
        .mount(&server)
        .await;

    let sink = Arc::new(RestRecorder::default());
    let probe = QuoteProbe::new(build_client().unwrap(), QuoteApi::Jupiter, server.uri());
    quote_poller(QuoteApi::Jupiter, probe, &sink).poll_once().await;

    assert_eq!(
        sink.latencies.lock().as_slice(),
        [(
            "jupiter".to_string(),
            "quote".to_string(),
            "solana".to_string(),
            200
        )]
    );
    assert!(sink.errors.lock().is_empty());
}

#[tokio::test]
async fn mobula_quote_error_body_is_a_client_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/2/swap/quoting"))
        .and(query_param("chainId", "evm:8453"))
        .and(query_param("walletAddress", "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "no route found" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/2/swap/quoting"))
        .and(query_param("amount", "100"))
        .and(header("Authorization", "mobula-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "amountOut": "0.5" }, "error": null })))
        .expect(2)
        .mount(&server)
        .await;

    let sink = Arc::new(RestRecorder::default());
    let probe = QuoteProbe::new(build_client().unwrap(), QuoteApi::Mobula, server.uri())
        .with_api_key(ApiKey::new("mobula-key"));
    quote_poller(QuoteApi::Mobula, probe, &sink).poll_once().await;

    let statuses: Vec<(String, u16)> = sink
        .latencies
        .lock()
        .iter()
        .map(|(_, _, chain, status)| (chain.clone(), *status))
        .collect();
    assert_eq!(
        statuses,
        [
            ("solana".to_string(), 200),
            ("base".to_string(), 400),
            ("arbitrum".to_string(), 200)
        ]
    );
    assert_eq!(
        sink.errors.lock().as_slice(),
        [(
            "mobula".to_string(),
            "quote".to_string(),
            "base".to_string(),
            "client_error".to_string()
        )]
    );
}

#[tokio::test]
async fn kyberswap_quote_uses_chain_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bsc/api/v1/routes"))
        .and(query_param("amountIn", "100000000000000000000"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;
    for chain in ["ethereum", "base", "arbitrum"] {
        Mock::given(method("GET"))
            .and(path(format!("/{chain}/api/v1/routes")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let sink = Arc::new(RestRecorder::default());
    let probe = QuoteProbe::new(build_client().unwrap(), QuoteApi::KyberSwap, server.uri());
    quote_poller(QuoteApi::KyberSwap, probe, &sink).poll_once().await;

    let chains: Vec<String> = sink.latencies.lock().iter().map(|(_, _, c, _)| c.clone()).collect();
    assert_eq!(chains, ["ethereum", "base", "bnb", "arbitrum"]);
    assert_eq!(
        sink.errors.lock().as_slice(),
        [(
            "kyberswap".to_string(),
            "quote".to_string(),
            "bnb".to_string(),
            "server_error".to_string()
        )]
    );
}

#[tokio::test]
async fn evm_quote_apis_send_chain_ids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/56/quote"))
        .and(query_param("gasPrice", "5"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/prices"))
        .and(query_param("network", "56"))
        .and(query_param("srcDecimals", "18"))
        .and(query_param("destDecimals", "18"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/quote"))
        .and(query_param("fromChain", "56"))
        .and(query_param("toChain", "56"))
        .and(query_param("fromAddress", "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let bnb: Vec<QuoteTarget> = QuoteApi::OpenOcean
        .targets()
        .into_iter()
        .filter(|t| t.chain == "bnb")
        .collect();
    let sink = Arc::new(RestRecorder::default());
    for api in [QuoteApi::OpenOcean, QuoteApi::ParaSwap, QuoteApi::Lifi] {
        let poller: RestPoller<QuoteTarget> = RestPoller::new(
            Box::new(QuoteProbe::new(build_client().unwrap(), api, server.uri())),
            bnb.clone(),
            Duration::from_secs(30),
            Arc::clone(&sink) as Arc<dyn MetricsSink>,
            CancellationToken::new(),
        );
        poller.poll_once().await;
    }

    let providers: Vec<String> = sink.latencies.lock().iter().map(|(p, _, _, _)| p.clone()).collect();
    assert_eq!(providers, ["openocean", "paraswap", "lifi"]);
    assert!(sink.errors.lock().is_empty());
}
