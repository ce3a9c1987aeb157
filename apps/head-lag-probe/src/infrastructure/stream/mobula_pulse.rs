//! Mobula pulse stream: new-pool discovery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use super::provider::{
    CodecError, Frame, Handshake, ProviderSettings, StreamError, StreamProvider, build_request,
};
use crate::domain::instrument::chain_for_blockchain_label;
use crate::domain::lag::{DiscoveredInstrument, EventCandidate};
use crate::infrastructure::config::ApiKey;

/// Production endpoint.
pub const MOBULA_PULSE_STREAM_URL: &str = "wss://pulse-v2-api.mobula.io";

/// Chains watched for new pools.
pub const PULSE_CHAIN_IDS: [&str; 5] = [
    "solana:solana",
    "evm:1",
    "evm:8453",
    "evm:56",
    "evm:42161",
];

#[derive(Debug, Deserialize)]
struct NewTokenFrame {
    payload: NewTokenPayload,
}

#[derive(Debug, Deserialize)]
struct NewTokenPayload {
    token: TokenEnvelope,
}

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    token: PulseToken,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PulseToken {
    #[serde(default)]
    address: String,
    name: Option<String>,
    symbol: Option<String>,
    #[serde(default)]
    chain_id: String,
    created_at: Option<String>,
}

fn parse_created_at(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Mobula pulse-v2 provider.
#[derive(Debug)]
pub struct MobulaPulseProvider {
    url: String,
    api_key: ApiKey,
    settings: ProviderSettings,
}

impl MobulaPulseProvider {
    /// Create a provider.
    #[must_use]
    pub fn new(url: impl Into<String>, api_key: ApiKey, settings: ProviderSettings) -> Self {
        Self {
            url: url.into(),
            api_key,
            settings,
        }
    }

    fn decode_new_token(value: Value) -> Result<Frame, CodecError> {
        let frame: NewTokenFrame = serde_json::from_value(value)?;
        let token = frame.payload.token.token;
        if token.address.is_empty() {
            return Ok(Frame::Ignored);
        }

        let occurred_at = parse_created_at(token.created_at.as_deref());
        let chain = chain_for_blockchain_label(&token.chain_id);
        let discovered = DiscoveredInstrument {
            address: token.address,
            chain_id: token.chain_id,
            symbol: token.symbol,
            name: token.name,
        };
        Ok(Frame::Data(vec![EventCandidate::created(
            chain,
            discovered,
            occurred_at,
        )]))
    }
}

#[async_trait]
impl StreamProvider for MobulaPulseProvider {
    fn name(&self) -> &str {
        "mobula-pulse"
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    async fn connect(&self) -> Result<Handshake, StreamError> {
        let request = build_request(
            &self.url,
            &[("Authorization", self.api_key.expose().to_string())],
        )?;
        Ok(Handshake::plain(request))
    }

    fn subscribe(&self) -> Vec<String> {
        vec![
            json!({
                "type": "pulse-v2",
                "authorization": self.api_key.expose(),
                "payload": {
                    "model": "default",
                    "assetMode": true,
                    "chainId": PULSE_CHAIN_IDS,
                    "compressed": false,
                    "views": [{
                        "name": "new",
                        "sortBy": "created_at",
                        "sortOrder": "desc",
                        "limit": 50,
                    }],
                },
            })
            .to_string(),
        ]
    }

    fn parse_frame(&self, text: &str) -> Result<Frame, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CodecError::InvalidFormat("missing type".to_string()))?;

        match kind {
            "new-token" => Self::decode_new_token(value),
            "ping" | "pong" => Ok(Frame::KeepAlive { reply: None }),
            "error" => Ok(Frame::Error(value.to_string())),
            _ => Ok(Frame::Ignored),
        }
    }
}
