//! Codex launchpad stream: new-token discovery across networks.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::graphql_ws::{self, GraphqlMessage};
use super::provider::{
    CodecError, Frame, Handshake, ProviderSettings, StreamError, StreamProvider, build_request,
};
use crate::domain::instrument::{SOLANA_NETWORK_ID, chain_for_network_id};
use crate::domain::lag::{DiscoveredInstrument, EventCandidate, timestamp_from_secs};
use crate::infrastructure::config::ApiKey;

/// Networks watched for launches.
pub const LAUNCHPAD_NETWORKS: [u64; 5] = [SOLANA_NETWORK_ID, 1, 8453, 56, 42161];

const SUBSCRIPTION_ID: &str = "launchpad_monitor";

const LAUNCHPAD_QUERY: &str = "subscription OnLaunchpadEvents($networkFilter: [Int!]) { \
    onLaunchpadTokenEventBatch(networkFilter: $networkFilter) { \
    networkId eventType token { address name symbol createdAt } launchpadName transactions1 } }";

#[derive(Debug, Deserialize)]
struct LaunchpadPayload {
    data: LaunchpadData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LaunchpadData {
    #[serde(default)]
    on_launchpad_token_event_batch: Vec<LaunchpadEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LaunchpadEvent {
    network_id: u64,
    #[serde(default)]
    event_type: String,
    token: LaunchpadToken,
    launchpad_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LaunchpadToken {
    #[serde(default)]
    address: String,
    name: Option<String>,
    symbol: Option<String>,
    #[serde(default)]
    created_at: i64,
}

/// Chain id in the `namespace:id` scheme metadata checks expect.
#[must_use]
pub fn launchpad_chain_id(network_id: u64) -> String {
    if network_id == SOLANA_NETWORK_ID {
        "solana:solana".to_string()
    } else {
        format!("evm:{network_id}")
    }
}

/// Codex launchpad provider.
#[derive(Debug)]
pub struct CodexLaunchpadProvider {
    url: String,
    api_key: ApiKey,
    settings: ProviderSettings,
}

impl CodexLaunchpadProvider {
    /// Create a provider.
    #[must_use]
    pub fn new(url: impl Into<String>, api_key: ApiKey, settings: ProviderSettings) -> Self {
        Self {
            url: url.into(),
            api_key,
            settings,
        }
    }

    fn launch(event: LaunchpadEvent) -> Option<EventCandidate> {
        if !matches!(event.event_type.as_str(), "Deployed" | "Created") {
            return None;
        }
        tracing::trace!(
            launchpad = event.launchpad_name.as_deref().unwrap_or("unknown"),
            token = %event.token.address,
            "Launchpad event"
        );
        let discovered = DiscoveredInstrument {
            address: event.token.address,
            chain_id: launchpad_chain_id(event.network_id),
            symbol: event.token.symbol,
            name: event.token.name,
        };
        Some(EventCandidate::created(
            chain_for_network_id(event.network_id),
            discovered,
            timestamp_from_secs(event.token.created_at),
        ))
    }
}

#[async_trait]
impl StreamProvider for CodexLaunchpadProvider {
    fn name(&self) -> &str {
        "codex-launchpad"
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    async fn connect(&self) -> Result<Handshake, StreamError> {
        let request = build_request(
            &self.url,
            &[("Sec-WebSocket-Protocol", graphql_ws::SUBPROTOCOL.to_string())],
        )?;
        Ok(Handshake {
            request,
            init_frame: Some(graphql_ws::connection_init(self.api_key.expose())),
            await_ack: true,
        })
    }

    fn acknowledge(&self, frame: &str) -> Result<(), StreamError> {
        graphql_ws::check_ack(frame)
    }

    fn subscribe(&self) -> Vec<String> {
        vec![graphql_ws::subscribe_frame(
            SUBSCRIPTION_ID,
            LAUNCHPAD_QUERY,
            &json!({ "networkFilter": LAUNCHPAD_NETWORKS }),
        )]
    }

    fn parse_frame(&self, text: &str) -> Result<Frame, CodecError> {
        match graphql_ws::decode(text)? {
            GraphqlMessage::Next { payload, .. } => {
                let payload: LaunchpadPayload = serde_json::from_value(payload)?;
                let candidates: Vec<_> = payload
                    .data
                    .on_launchpad_token_event_batch
                    .into_iter()
                    .filter_map(Self::launch)
                    .collect();
                Ok(Frame::Data(candidates))
            }
            GraphqlMessage::Ping => Ok(Frame::KeepAlive {
                reply: Some(graphql_ws::pong()),
            }),
            GraphqlMessage::KeepAlive => Ok(Frame::KeepAlive { reply: None }),
            GraphqlMessage::Error(message) => Ok(Frame::Error(message)),
            GraphqlMessage::Complete(_) => {
                Ok(Frame::Terminated("launchpad subscription completed".to_string()))
            }
            GraphqlMessage::Other(_) => Ok(Frame::Ignored),
        }
    }
}
