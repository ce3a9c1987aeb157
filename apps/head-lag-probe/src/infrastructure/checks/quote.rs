//! Swap Quote Latency
//!
//! Asks six swap aggregators for a 100 USDC to native-token quote on each
//! chain they serve and feeds the round trip into a [`RestPoller`]. Only
//! the status matters, except for Mobula, which reports failures inside a
//! 200 body.
//!
//! [`RestPoller`]: super::RestPoller

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder};

use super::http::{CheckError, MOBULA_REST_BASE_URL};
use super::rest_poller::{PolledTarget, RestProbe};
use crate::infrastructure::config::ApiKey;

/// Wallet sent where an EVM quote API insists on a sender.
const EVM_WALLET: &str = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045";

/// Wallet sent with Solana quotes.
const SOLANA_WALLET: &str = "HN7cABqLq46Es1jh92dQQisAq662SmxELLLsHHe4YWrH";

/// Mobula takes human units rather than base units.
const MOBULA_AMOUNT: &str = "100";

/// Output decimals sent to ParaSwap; every quoted output is an 18-decimal native token.
const NATIVE_DECIMALS: &str = "18";

/// One chain's quote pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteTarget {
    /// Normalized chain name.
    pub chain: &'static str,
    /// EVM chain id, `None` for Solana.
    pub evm_chain_id: Option<&'static str>,
    /// KyberSwap path segment.
    pub kyber_chain: &'static str,
    /// Input token (USDC).
    pub token_in: &'static str,
    /// Output token (wrapped native).
    pub token_out: &'static str,
    /// Input amount in base units.
    pub amount: &'static str,
    /// Input token decimals.
    pub decimals: u8,
}

impl PolledTarget for QuoteTarget {
    fn chain(&self) -> &str {
        self.chain
    }
}

/// Default quote pairs.
pub const QUOTE_TARGETS: [QuoteTarget; 5] = [
    QuoteTarget {
        chain: "solana",
        evm_chain_id: None,
        kyber_chain: "",
        token_in: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
        token_out: "So11111111111111111111111111111111111111112",
        amount: "100000000",
        decimals: 6,
    },
    QuoteTarget {
        chain: "ethereum",
        evm_chain_id: Some("1"),
        kyber_chain: "ethereum",
        token_in: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
        token_out: "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
        amount: "100000000",
        decimals: 6,
    },
    QuoteTarget {
        chain: "base",
        evm_chain_id: Some("8453"),
        kyber_chain: "base",
        token_in: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
        token_out: "0x4200000000000000000000000000000000000006",
        amount: "100000000",
        decimals: 6,
    },
    QuoteTarget {
        chain: "bnb",
        evm_chain_id: Some("56"),
        kyber_chain: "bsc",
        token_in: "0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d",
        token_out: "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c",
        amount: "100000000000000000000",
        decimals: 18,
    },
    QuoteTarget {
        chain: "arbitrum",
        evm_chain_id: Some("42161"),
        kyber_chain: "arbitrum",
        token_in: "0xaf88d065e77c8cC2239327C5EDb3A432268e5831",
        token_out: "0x82aF49447D8a07e3bd95BD0d56f35241523fBab1",
        amount: "100000000",
        decimals: 6,
    },
];

/// A swap quote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteApi {
    /// Mobula swap quoting. Needs an API key.
    Mobula,
    /// Jupiter public quote API.
    Jupiter,
    /// OpenOcean v3.
    OpenOcean,
    /// ParaSwap v5 prices.
    ParaSwap,
    /// Li.Fi quote.
    Lifi,
    /// KyberSwap aggregator routes.
    KyberSwap,
}

impl QuoteApi {
    /// Every quote API, in polling order.
    pub const ALL: [Self; 6] = [
        Self::Mobula,
        Self::Jupiter,
        Self::OpenOcean,
        Self::ParaSwap,
        Self::Lifi,
        Self::KyberSwap,
    ];

    /// Provider label.
    #[must_use]
    pub const fn provider(self) -> &'static str {
        match self {
            Self::Mobula => "mobula",
            Self::Jupiter => "jupiter",
            Self::OpenOcean => "openocean",
            Self::ParaSwap => "paraswap",
            Self::Lifi => "lifi",
            Self::KyberSwap => "kyberswap",
        }
    }

    /// Production base URL.
    #[must_use]
    pub const fn production_base_url(self) -> &'static str {
        match self {
            Self::Mobula => MOBULA_REST_BASE_URL,
            Self::Jupiter => "https://public.jupiterapi.com",
            Self::OpenOcean => "https://open-api.openocean.finance",
            Self::ParaSwap => "https://apiv5.paraswap.io",
            Self::Lifi => "https://li.quest",
            Self::KyberSwap => "https://aggregator-api.kyberswap.com",
        }
    }

    /// Whether this API quotes on `target`'s chain.
    #[must_use]
    pub fn supports(self, target: &QuoteTarget) -> bool {
        match self {
            Self::Mobula => matches!(target.chain, "solana" | "base" | "arbitrum"),
            Self::Jupiter => target.evm_chain_id.is_none(),
            Self::OpenOcean | Self::ParaSwap | Self::Lifi | Self::KyberSwap => {
                target.evm_chain_id.is_some()
            }
        }
    }

    /// The default targets this API serves.
    #[must_use]
    pub fn targets(self) -> Vec<QuoteTarget> {
        QUOTE_TARGETS
            .iter()
            .filter(|target| self.supports(target))
            .copied()
            .collect()
    }
}

/// Requests one quote from a [`QuoteApi`].
#[derive(Debug)]
pub struct QuoteProbe {
    client: Client,
    api: QuoteApi,
    base_url: String,
    api_key: Option<ApiKey>,
}

impl QuoteProbe {
    /// Create a probe against `base_url`.
    #[must_use]
    pub fn new(client: Client, api: QuoteApi, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api,
            base_url: base_url.into(),
            api_key: None,
        }
    }

    /// Probe against the production API.
    #[must_use]
    pub fn production(client: Client, api: QuoteApi) -> Self {
        Self::new(client, api, api.production_base_url())
    }

    /// Send `key` as the `Authorization` header.
    #[must_use]
    pub fn with_api_key(mut self, key: ApiKey) -> Self {
        self.api_key = Some(key);
        self
    }

    fn request(&self, target: &QuoteTarget) -> RequestBuilder {
        let base = &self.base_url;
        let chain_id = target.evm_chain_id.unwrap_or_default();
        let builder = match self.api {
            QuoteApi::Mobula => {
                let (chain, wallet) = match target.evm_chain_id {
                    Some(id) => (format!("evm:{id}"), EVM_WALLET),
                    None => ("solana".to_string(), SOLANA_WALLET),
                };
                self.client
                    .get(format!("{base}/api/2/swap/quoting"))
                    .query(&[
                        ("chainId", chain.as_str()),
                        ("tokenIn", target.token_in),
                        ("tokenOut", target.token_out),
                        ("amount", MOBULA_AMOUNT),
                        ("walletAddress", wallet),
                        ("slippage", "1"),
                    ])
            }
            QuoteApi::Jupiter => self.client.get(format!("{base}/quote")).query(&[
                ("inputMint", target.token_in),
                ("outputMint", target.token_out),
                ("amount", target.amount),
                ("slippageBps", "50"),
            ]),
            QuoteApi::OpenOcean => self
                .client
                .get(format!("{base}/v3/{chain_id}/quote"))
                .query(&[
                    ("inTokenAddress", target.token_in),
                    ("outTokenAddress", target.token_out),
                    ("amount", target.amount),
                    ("gasPrice", "5"),
                ]),
            QuoteApi::ParaSwap => {
                let decimals = target.decimals.to_string();
                self.client.get(format!("{base}/prices")).query(&[
                    ("srcToken", target.token_in),
                    ("destToken", target.token_out),
                    ("amount", target.amount),
                    ("srcDecimals", decimals.as_str()),
                    ("destDecimals", NATIVE_DECIMALS),
                    ("network", chain_id),
                ])
            }
            QuoteApi::Lifi => self.client.get(format!("{base}/v1/quote")).query(&[
                ("fromChain", chain_id),
                ("toChain", chain_id),
                ("fromToken", target.token_in),
                ("toToken", target.token_out),
                ("fromAmount", target.amount),
                ("fromAddress", EVM_WALLET),
            ]),
            QuoteApi::KyberSwap => self
                .client
                .get(format!("{base}/{}/api/v1/routes", target.kyber_chain))
                .query(&[
                    ("tokenIn", target.token_in),
                    ("tokenOut", target.token_out),
                    ("amountIn", target.amount),
                ]),
        };

        let builder = builder.header(ACCEPT, "application/json");
        match &self.api_key {
            Some(key) => builder.header(AUTHORIZATION, key.expose()),
            None => builder,
        }
    }
}

/// Whether a quote body carries a non-null `error` field.
fn body_reports_error(body: &serde_json::Value) -> bool {
    body.get("error").is_some_and(|error| !error.is_null())
}

#[async_trait]
impl RestProbe<QuoteTarget> for QuoteProbe {
    fn provider(&self) -> &'static str {
        self.api.provider()
    }

    fn endpoint(&self) -> &'static str {
        "quote"
    }

    async fn probe(&self, target: &QuoteTarget) -> Result<u16, CheckError> {
        let response = self.request(target).send().await?;
        let status = response.status().as_u16();
        if self.api != QuoteApi::Mobula {
            return Ok(status);
        }

        // A quote failure arrives as a 200 with an `error` field
        match response.json::<serde_json::Value>().await {
            Ok(body) if body_reports_error(&body) => Ok(400),
            _ => Ok(status),
        }
    }
}
