//! GeckoTerminal swap stream (ActionCable).
//!
//! The cable greets with `welcome`; each pool gets its own `SwapChannel`
//! subscription identified by GeckoTerminal's internal pool id. Data frames
//! carry only the pool id, so chain names come from the instrument list.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::provider::{
    CodecError, Frame, Handshake, ProviderSettings, StreamError, StreamProvider, build_request,
};
use crate::domain::instrument::MonitoredInstrument;
use crate::domain::lag::{EventCandidate, timestamp_from_millis};

/// Production endpoint.
pub const GECKO_STREAM_URL: &str = "wss://cables.geckoterminal.com/cable";

const ORIGIN: &str = "https://www.geckoterminal.com";
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";
const CHANNEL: &str = "SwapChannel";

#[derive(Debug, Deserialize)]
struct CableFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    identifier: Option<String>,
    #[serde(default)]
    message: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChannelIdentifier {
    #[serde(default)]
    pool_id: String,
}

#[derive(Debug, Deserialize)]
struct SwapMessage {
    #[serde(rename = "type", default)]
    kind: String,
    data: Option<SwapData>,
}

#[derive(Debug, Deserialize)]
struct SwapData {
    #[serde(default)]
    block_timestamp: i64,
    tx_hash: Option<String>,
}

/// GeckoTerminal provider.
#[derive(Debug)]
pub struct GeckoTerminalProvider {
    url: String,
    pools: Vec<String>,
    chains: HashMap<String, String>,
    settings: ProviderSettings,
}

impl GeckoTerminalProvider {
    /// Create a provider for the given instruments.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        instruments: &[MonitoredInstrument],
        settings: ProviderSettings,
    ) -> Self {
        Self {
            url: url.into(),
            pools: instruments.iter().map(|i| i.gecko_pool_id.clone()).collect(),
            chains: instruments
                .iter()
                .map(|i| (i.gecko_pool_id.clone(), i.chain.clone()))
                .collect(),
            settings,
        }
    }

    fn identifier(pool_id: &str) -> String {
        json!({ "channel": CHANNEL, "pool_id": pool_id }).to_string()
    }

    fn decode_swap(&self, identifier: Option<&str>, message: Value) -> Result<Frame, CodecError> {
        let swap: SwapMessage = serde_json::from_value(message)?;
        if swap.kind != "newSwap" {
            return Ok(Frame::Ignored);
        }
        let identifier = identifier
            .ok_or_else(|| CodecError::InvalidFormat("data frame without identifier".to_string()))?;
        let channel: ChannelIdentifier = serde_json::from_str(identifier)?;
        let Some(chain) = self.chains.get(&channel.pool_id) else {
            return Ok(Frame::Ignored);
        };
        let Some(data) = swap.data else {
            return Ok(Frame::Ignored);
        };
        Ok(Frame::Data(vec![EventCandidate::swap(
            chain.clone(),
            data.tx_hash,
            timestamp_from_millis(data.block_timestamp),
        )]))
    }
}

#[async_trait]
impl StreamProvider for GeckoTerminalProvider {
    fn name(&self) -> &str {
        "geckoterminal"
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    async fn connect(&self) -> Result<Handshake, StreamError> {
        let request = build_request(
            &self.url,
            &[
                ("Origin", ORIGIN.to_string()),
                ("User-Agent", USER_AGENT.to_string()),
            ],
        )?;
        Ok(Handshake {
            request,
            init_frame: None,
            await_ack: true,
        })
    }

    fn acknowledge(&self, frame: &str) -> Result<(), StreamError> {
        let welcome = serde_json::from_str::<CableFrame>(frame)
            .ok()
            .and_then(|f| f.kind)
            .is_some_and(|kind| kind == "welcome");
        if welcome {
            Ok(())
        } else {
            Err(StreamError::UnexpectedAck(frame.chars().take(200).collect()))
        }
    }

    fn subscribe(&self) -> Vec<String> {
        self.pools
            .iter()
            .map(|pool_id| {
                json!({ "command": "subscribe", "identifier": Self::identifier(pool_id) })
                    .to_string()
            })
            .collect()
    }

    fn parse_frame(&self, text: &str) -> Result<Frame, CodecError> {
        let frame: CableFrame = serde_json::from_str(text)?;
        match frame.kind.as_deref() {
            Some("ping") => Ok(Frame::KeepAlive {
                reply: Some(json!({ "type": "pong" }).to_string()),
            }),
            Some("welcome" | "confirm_subscription") => Ok(Frame::Ignored),
            Some("reject_subscription") => Ok(Frame::Error(format!(
                "subscription rejected: {}",
                frame.identifier.unwrap_or_default()
            ))),
            Some("disconnect") => Ok(Frame::Terminated(text.to_string())),
            _ => match frame.message {
                Some(message) => self.decode_swap(frame.identifier.as_deref(), message),
                None => Ok(Frame::Ignored),
            },
        }
    }
}
