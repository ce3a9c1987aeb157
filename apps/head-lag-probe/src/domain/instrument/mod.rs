//! Monitored Instruments
//!
//! Static configuration entries for the pools the probe watches, plus the
//! chain-name normalization shared by every provider. Each provider labels
//! chains in its own scheme (numeric network ids, blockchain display names,
//! `namespace:id` chain ids); everything is reduced to one short lowercase
//! chain name before it reaches the metrics sink.

// =============================================================================
// Types
// =============================================================================

/// A pool the probe subscribes to on every provider that supports it.
///
/// Immutable after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredInstrument {
    /// Human label (e.g. `ETH/USDC Uniswap V3`).
    pub label: String,
    /// Normalized chain name.
    pub chain: String,
    /// On-chain pool address.
    pub pool_address: String,
    /// Blockchain identifier in Mobula's scheme (`evm:1`, `solana`).
    pub mobula_blockchain: String,
    /// Numeric network id in Codex's scheme.
    pub network_id: u64,
    /// GeckoTerminal internal pool id.
    pub gecko_pool_id: String,
}

impl MonitoredInstrument {
    /// Create a new instrument entry.
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        chain: impl Into<String>,
        pool_address: impl Into<String>,
        mobula_blockchain: impl Into<String>,
        network_id: u64,
        gecko_pool_id: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            chain: chain.into(),
            pool_address: pool_address.into(),
            mobula_blockchain: mobula_blockchain.into(),
            network_id,
            gecko_pool_id: gecko_pool_id.into(),
        }
    }
}

/// High-activity pools, one per supported chain.
#[must_use]
pub fn default_instruments() -> Vec<MonitoredInstrument> {
    vec![
        MonitoredInstrument::new(
            "ETH/USDC Uniswap V3",
            "ethereum",
            "0x88e6a0c2ddd26feeb64f039a2c41296fcb3f5640",
            "evm:1",
            1,
            "147971598",
        ),
        MonitoredInstrument::new(
            "SOL/USDC Raydium",
            "solana",
            "7qbRF6YsyGuLUVs6Y1q64bdVrfe4ZcUUz1JRdoVNUJnm",
            "solana",
            SOLANA_NETWORK_ID,
            "162715608",
        ),
        MonitoredInstrument::new(
            "WETH/USDC Base",
            "base",
            "0x4c36388be6f416a29c8d8eee81c771ce6be14b18",
            "evm:8453",
            8453,
            "162840764",
        ),
        MonitoredInstrument::new(
            "WBNB/BUSD PancakeSwap",
            "bnb",
            "0x58f876857a02d6762e0101bb5c46a8c1ed44dc16",
            "evm:56",
            56,
            "24",
        ),
        MonitoredInstrument::new(
            "WETH/USDC Arbitrum",
            "arbitrum",
            "0xc6962004f452be9203591991d15f6b388e09e8d0",
            "evm:42161",
            42161,
            "162634438",
        ),
    ]
}

// =============================================================================
// Chain Normalization
// =============================================================================

/// Codex network id for Solana.
pub const SOLANA_NETWORK_ID: u64 = 1_399_811_149;

/// Map a numeric network id to a chain name.
///
/// Unknown ids become `network_<id>` so they stay distinguishable.
#[must_use]
pub fn chain_for_network_id(network_id: u64) -> String {
    match network_id {
        1 => "ethereum".to_string(),
        SOLANA_NETWORK_ID => "solana".to_string(),
        8453 => "base".to_string(),
        56 => "bnb".to_string(),
        42161 => "arbitrum".to_string(),
        other => format!("network_{other}"),
    }
}

/// Map a Mobula blockchain label or chain id to a chain name.
///
/// Accepts both display names (`BNB Smart Chain (BEP20)`) and chain ids
/// (`evm:56`, `solana:solana`). Unknown labels pass through unchanged.
#[must_use]
pub fn chain_for_blockchain_label(label: &str) -> String {
    match label {
        "Ethereum" | "evm:1" => "ethereum".to_string(),
        "Solana" | "solana" | "solana:solana" => "solana".to_string(),
        "Base" | "evm:8453" => "base".to_string(),
        "BNB Smart Chain (BEP20)" | "BSC" | "evm:56" => "bnb".to_string(),
        "Arbitrum" | "evm:42161" => "arbitrum".to_string(),
        "evm:143" => "monad".to_string(),
        other => other.to_string(),
    }
}

/// Map a `namespace:id` chain id to a Codex network id.
///
/// Returns `None` for chain ids Codex has no numeric id for.
#[must_use]
pub fn network_id_for_chain_id(chain_id: &str) -> Option<u64> {
    match chain_id {
        "solana" | "solana:solana" => Some(SOLANA_NETWORK_ID),
        other => other.strip_prefix("evm:")?.parse().ok(),
    }
}

/// Whether a `namespace:id` chain id names Solana.
#[must_use]
pub fn is_solana_chain_id(chain_id: &str) -> bool {
    matches!(chain_id, "solana" | "solana:solana")
}

/// Map a `namespace:id` chain id to Mobula's `blockchain` query value.
#[must_use]
pub fn mobula_blockchain_for_chain_id(chain_id: &str) -> &str {
    match chain_id {
        "solana:solana" => "solana",
        other => other,
    }
}
