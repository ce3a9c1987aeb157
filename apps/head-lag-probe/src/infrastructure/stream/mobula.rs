//! Mobula fast-trade stream.
//!
//! One subscribe frame lists every monitored pool. Trades carry the
//! transaction hash, a millisecond trade time, and the blockchain label.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::provider::{
    ClientKeepAlive, CodecError, Frame, Handshake, ProviderSettings, StreamError, StreamProvider,
    build_request,
};
use crate::domain::instrument::{MonitoredInstrument, chain_for_blockchain_label};
use crate::domain::lag::{EventCandidate, timestamp_from_millis};
use crate::infrastructure::config::ApiKey;

/// Production endpoint.
pub const MOBULA_STREAM_URL: &str = "wss://api.mobula.io";

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

#[derive(Debug, Deserialize)]
struct TradeFrame {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    blockchain: String,
    #[serde(default)]
    date: i64,
}

/// Mobula fast-trade provider.
#[derive(Debug)]
pub struct MobulaProvider {
    url: String,
    api_key: ApiKey,
    instruments: Vec<MonitoredInstrument>,
    settings: ProviderSettings,
}

impl MobulaProvider {
    /// Create a provider.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        api_key: ApiKey,
        instruments: Vec<MonitoredInstrument>,
        settings: ProviderSettings,
    ) -> Self {
        Self {
            url: url.into(),
            api_key,
            instruments,
            settings,
        }
    }

    fn decode_trade(value: Value) -> Result<Option<EventCandidate>, CodecError> {
        let trade: TradeFrame = serde_json::from_value(value)?;
        if trade.hash.is_empty() || trade.blockchain.is_empty() {
            return Ok(None);
        }
        Ok(Some(EventCandidate::swap(
            chain_for_blockchain_label(&trade.blockchain),
            Some(trade.hash),
            timestamp_from_millis(trade.date),
        )))
    }
}

#[async_trait]
impl StreamProvider for MobulaProvider {
    fn name(&self) -> &str {
        "mobula"
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    async fn connect(&self) -> Result<Handshake, StreamError> {
        Ok(Handshake::plain(build_request(&self.url, &[])?))
    }

    fn subscribe(&self) -> Vec<String> {
        let items: Vec<Value> = self
            .instruments
            .iter()
            .map(|i| json!({ "blockchain": i.mobula_blockchain, "address": i.pool_address }))
            .collect();
        vec![
            json!({
                "type": "fast-trade",
                "authorization": self.api_key.expose(),
                "payload": { "assetMode": false, "items": items },
            })
            .to_string(),
        ]
    }

    fn parse_frame(&self, text: &str) -> Result<Frame, CodecError> {
        let value: Value = serde_json::from_str(text)?;

        if let Some(error) = value.get("error") {
            return Ok(Frame::Error(error.to_string()));
        }
        if let Some(status) = value.get("status").and_then(Value::as_str) {
            return Ok(match status {
                "success" | "ok" => Frame::Ignored,
                other => Frame::Error(format!("subscription status {other}")),
            });
        }
        if value.get("event").and_then(Value::as_str) == Some("pong") {
            return Ok(Frame::KeepAlive { reply: None });
        }

        let candidates = match value {
            Value::Array(items) => items
                .into_iter()
                .map(Self::decode_trade)
                .filter_map(Result::transpose)
                .collect::<Result<Vec<_>, _>>()?,
            other => Self::decode_trade(other)?.into_iter().collect(),
        };
        if candidates.is_empty() {
            return Ok(Frame::Ignored);
        }
        Ok(Frame::Data(candidates))
    }

    fn keepalive(&self) -> Option<ClientKeepAlive> {
        Some(ClientKeepAlive {
            interval: KEEPALIVE_INTERVAL,
            frame: json!({ "event": "ping" }).to_string(),
        })
    }
}
