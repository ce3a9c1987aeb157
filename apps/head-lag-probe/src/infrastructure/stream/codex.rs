//! Codex pool-event stream.
//!
//! GraphQL subscriptions over `graphql-transport-ws`, authenticated with a
//! bearer token from the token cache. Solana pools use the unconfirmed
//! event feed, which arrives earlier than the confirmed one.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;

use super::graphql_ws::{self, GraphqlMessage};
use super::provider::{
    CodecError, Frame, Handshake, ProviderSettings, StreamError, StreamProvider, build_request,
};
use crate::domain::instrument::{MonitoredInstrument, SOLANA_NETWORK_ID, chain_for_network_id};
use crate::domain::lag::{EventCandidate, timestamp_from_secs};
use crate::infrastructure::auth::BearerSource;

/// Production endpoint.
pub const CODEX_STREAM_URL: &str = "wss://graph.codex.io/graphql";

const POOL_EVENTS_QUERY: &str = "subscription OnPoolEvents($address: String!, $networkId: Int!) { \
    onEventsCreated(address: $address, networkId: $networkId) { \
    address networkId events { networkId blockNumber timestamp transactionHash eventType } } }";

const SUBSCRIPTION_PREFIX: &str = "headlag_";

const UNCONFIRMED_EVENTS_QUERY: &str = "subscription OnUnconfirmedPoolEvents($id: String!) { \
    onUnconfirmedEventsCreated(id: $id) { \
    address networkId events { networkId blockNumber timestamp transactionHash eventType } } }";

#[derive(Debug, Default, Deserialize)]
struct EventsPayload {
    #[serde(default)]
    data: EventsData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsData {
    on_events_created: Option<EventBatch>,
    on_unconfirmed_events_created: Option<EventBatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventBatch {
    network_id: Option<u64>,
    #[serde(default)]
    events: Vec<PoolEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolEvent {
    network_id: Option<u64>,
    block_number: Option<i64>,
    #[serde(default)]
    timestamp: i64,
    transaction_hash: Option<String>,
    #[serde(default)]
    event_type: String,
}

/// Codex pool-event provider.
///
/// A `complete` for one pool ends only that subscription. The stream is
/// treated as terminated once every pool has completed.
#[derive(Debug)]
pub struct CodexProvider {
    url: String,
    bearer: BearerSource,
    instruments: Vec<MonitoredInstrument>,
    settings: ProviderSettings,
    completed: Mutex<HashSet<usize>>,
}

impl CodexProvider {
    /// Create a provider.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        bearer: BearerSource,
        instruments: Vec<MonitoredInstrument>,
        settings: ProviderSettings,
    ) -> Self {
        Self {
            url: url.into(),
            bearer,
            instruments,
            settings,
            completed: Mutex::new(HashSet::new()),
        }
    }

    fn subscription_index(&self, id: &str) -> Option<usize> {
        id.strip_prefix(SUBSCRIPTION_PREFIX)?
            .parse()
            .ok()
            .filter(|i| *i < self.instruments.len())
    }

    fn complete(&self, id: Option<String>) -> Frame {
        let id = id.unwrap_or_default();
        let Some(index) = self.subscription_index(&id) else {
            return Frame::Ignored;
        };

        let mut completed = self.completed.lock();
        completed.insert(index);
        if completed.len() == self.instruments.len() {
            return Frame::Terminated(format!("all {} subscriptions completed", completed.len()));
        }
        Frame::Error(format!(
            "subscription {id} completed ({} of {} still active)",
            self.instruments.len() - completed.len(),
            self.instruments.len()
        ))
    }

    fn swaps(batch: EventBatch) -> impl Iterator<Item = EventCandidate> {
        let batch_network = batch.network_id;
        batch
            .events
            .into_iter()
            .filter(|event| event.event_type == "Swap")
            .map(move |event| {
                let network_id = event.network_id.or(batch_network).unwrap_or_default();
                EventCandidate::swap(
                    chain_for_network_id(network_id),
                    event.transaction_hash,
                    timestamp_from_secs(event.timestamp),
                )
                .with_block_number(event.block_number.and_then(|n| u64::try_from(n).ok()))
            })
    }
}

#[async_trait]
impl StreamProvider for CodexProvider {
    fn name(&self) -> &str {
        "codex"
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    async fn connect(&self) -> Result<Handshake, StreamError> {
        let token = self.bearer.bearer().await?;
        let request = build_request(
            &self.url,
            &[("Sec-WebSocket-Protocol", graphql_ws::SUBPROTOCOL.to_string())],
        )?;
        Ok(Handshake {
            request,
            init_frame: Some(graphql_ws::connection_init(&format!("Bearer {token}"))),
            await_ack: true,
        })
    }

    fn acknowledge(&self, frame: &str) -> Result<(), StreamError> {
        graphql_ws::check_ack(frame)
    }

    fn subscribe(&self) -> Vec<String> {
        self.completed.lock().clear();
        self.instruments
            .iter()
            .enumerate()
            .map(|(i, instrument)| {
                let id = format!("{SUBSCRIPTION_PREFIX}{i}");
                if instrument.network_id == SOLANA_NETWORK_ID {
                    let pair = format!("{}:{}", instrument.pool_address, instrument.network_id);
                    graphql_ws::subscribe_frame(&id, UNCONFIRMED_EVENTS_QUERY, &json!({ "id": pair }))
                } else {
                    graphql_ws::subscribe_frame(
                        &id,
                        POOL_EVENTS_QUERY,
                        &json!({
                            "address": instrument.pool_address,
                            "networkId": instrument.network_id,
                        }),
                    )
                }
            })
            .collect()
    }

    fn parse_frame(&self, text: &str) -> Result<Frame, CodecError> {
        match graphql_ws::decode(text)? {
            GraphqlMessage::Next { payload, .. } => {
                let payload: EventsPayload = serde_json::from_value(payload)?;
                let candidates: Vec<_> = payload
                    .data
                    .on_unconfirmed_events_created
                    .into_iter()
                    .chain(payload.data.on_events_created)
                    .flat_map(Self::swaps)
                    .collect();
                Ok(Frame::Data(candidates))
            }
            GraphqlMessage::Ping => Ok(Frame::KeepAlive {
                reply: Some(graphql_ws::pong()),
            }),
            GraphqlMessage::KeepAlive => Ok(Frame::KeepAlive { reply: None }),
            GraphqlMessage::Error(message) => Ok(Frame::Error(message)),
            GraphqlMessage::Complete(id) => Ok(self.complete(id)),
            GraphqlMessage::Other(_) => Ok(Frame::Ignored),
        }
    }

    async fn invalidate_credentials(&self) {
        self.bearer.invalidate().await;
    }
}
