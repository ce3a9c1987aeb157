//! Metadata coverage checks.
//!
//! For every discovered token, asks Mobula and Codex what they know about
//! it and reports which of the tracked fields (logo, description, twitter,
//! website) each returned. Solana tokens are also looked up on Jupiter's
//! token page, which only ever carries a logo.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use serde_json::json;

use super::http::{
    CODEX_GRAPHQL_URL, CheckError, MOBULA_REST_BASE_URL, build_client, fetch_json, fetch_text,
};
use crate::application::ports::{AuthError, CheckExecutor, ErrorKind};
use crate::domain::check::{CheckOutcome, CheckReport, CheckRequest, MetadataCoverage};
use crate::domain::instrument::{
    is_solana_chain_id, mobula_blockchain_for_chain_id, network_id_for_chain_id,
};
use crate::infrastructure::auth::BearerSource;
use crate::infrastructure::config::ApiKey;

const TOKEN_QUERY: &str = "query GetToken($address: String!, $networkId: Int!) { \
    token(input: { address: $address, networkId: $networkId }) { \
    address name symbol networkId \
    info { imageThumbUrl imageSmallUrl imageLargeUrl description } \
    socialLinks { twitter website telegram } } }";

/// Jupiter token page base URL.
pub const JUPITER_TOKENS_URL: &str = "https://jup.ag/tokens";

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

const NEXT_DATA_OPEN: &str = r#"<script id="__NEXT_DATA__" type="application/json">"#;

// =============================================================================
// Response Shapes
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct MobulaDetailsResponse {
    #[serde(default)]
    data: MobulaToken,
}

#[derive(Debug, Default, Deserialize)]
struct MobulaToken {
    logo: Option<String>,
    description: Option<String>,
    #[serde(default)]
    socials: MobulaSocials,
}

#[derive(Debug, Default, Deserialize)]
struct MobulaSocials {
    twitter: Option<String>,
    website: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    token: Option<CodexToken>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodexToken {
    address: Option<String>,
    info: Option<CodexTokenInfo>,
    social_links: Option<CodexSocialLinks>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodexTokenInfo {
    image_thumb_url: Option<String>,
    image_small_url: Option<String>,
    image_large_url: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CodexSocialLinks {
    twitter: Option<String>,
    website: Option<String>,
}

// Jupiter embeds its react-query cache in the page; only the token entry matters.

#[derive(Debug, Default, Deserialize)]
struct NextData {
    #[serde(default)]
    props: NextProps,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextProps {
    #[serde(default)]
    page_props: PageProps,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageProps {
    #[serde(default)]
    dehydrated_state: DehydratedState,
}

#[derive(Debug, Default, Deserialize)]
struct DehydratedState {
    #[serde(default)]
    queries: Vec<DehydratedQuery>,
}

#[derive(Debug, Default, Deserialize)]
struct DehydratedQuery {
    #[serde(default)]
    state: QueryState,
}

#[derive(Debug, Default, Deserialize)]
struct QueryState {
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JupiterToken {
    id: String,
    icon: Option<String>,
}

/// The JSON inside the page's `__NEXT_DATA__` script tag.
fn next_data(html: &str) -> Result<&str, CheckError> {
    let start = html
        .find(NEXT_DATA_OPEN)
        .ok_or(CheckError::PageDataMissing)?
        + NEXT_DATA_OPEN.len();
    let len = html[start..]
        .find("</script>")
        .ok_or(CheckError::PageDataMissing)?;
    Ok(&html[start..start + len])
}

fn jupiter_coverage(html: &str, address: &str) -> Result<MetadataCoverage, CheckError> {
    let data: NextData =
        serde_json::from_str(next_data(html)?).map_err(|e| CheckError::Parse(e.to_string()))?;
    let token = data
        .props
        .page_props
        .dehydrated_state
        .queries
        .into_iter()
        .filter_map(|query| serde_json::from_value::<JupiterToken>(query.state.data).ok())
        .find(|token| token.id == address)
        .ok_or(CheckError::NotFound)?;

    Ok(MetadataCoverage {
        logo: present(token.icon.as_ref()),
        ..MetadataCoverage::default()
    })
}

fn present(value: Option<&String>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

impl MobulaToken {
    fn coverage(&self) -> MetadataCoverage {
        MetadataCoverage {
            logo: present(self.logo.as_ref()),
            description: present(self.description.as_ref()),
            twitter: present(self.socials.twitter.as_ref()),
            website: present(self.socials.website.as_ref()),
        }
    }
}

impl CodexToken {
    fn coverage(&self) -> MetadataCoverage {
        let mut coverage = MetadataCoverage::default();
        if let Some(info) = &self.info {
            coverage.logo = present(info.image_thumb_url.as_ref())
                || present(info.image_small_url.as_ref())
                || present(info.image_large_url.as_ref());
            coverage.description = present(info.description.as_ref());
        }
        if let Some(links) = &self.social_links {
            coverage.twitter = present(links.twitter.as_ref());
            coverage.website = present(links.website.as_ref());
        }
        coverage
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Endpoints queried by [`MetadataCheckExecutor`].
#[derive(Debug, Clone)]
pub struct MetadataEndpoints {
    /// Mobula REST base URL.
    pub mobula_base: String,
    /// Codex GraphQL URL.
    pub codex_graphql: String,
    /// Jupiter token page base; the address is appended as a path segment.
    pub jupiter_tokens: String,
}

impl Default for MetadataEndpoints {
    fn default() -> Self {
        Self {
            mobula_base: MOBULA_REST_BASE_URL.to_string(),
            codex_graphql: CODEX_GRAPHQL_URL.to_string(),
            jupiter_tokens: JUPITER_TOKENS_URL.to_string(),
        }
    }
}

/// Production [`CheckExecutor`].
///
/// Mobula is queried only when an API key is configured. Codex is always
/// attempted; without a session credential it reports a skip. Jupiter is
/// queried for Solana tokens only and produces no report otherwise.
#[derive(Debug)]
pub struct MetadataCheckExecutor {
    client: Client,
    endpoints: MetadataEndpoints,
    mobula_key: Option<ApiKey>,
    bearer: BearerSource,
}

impl MetadataCheckExecutor {
    /// Create an executor.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::Client`] if the HTTP client cannot be built.
    pub fn new(
        endpoints: MetadataEndpoints,
        mobula_key: Option<ApiKey>,
        bearer: BearerSource,
    ) -> Result<Self, CheckError> {
        Ok(Self {
            client: build_client()?,
            endpoints,
            mobula_key,
            bearer,
        })
    }

    async fn check_mobula(&self, request: &CheckRequest, key: &ApiKey) -> CheckReport {
        let url = format!("{}/api/2/token/details", self.endpoints.mobula_base);
        let builder = self
            .client
            .get(url)
            .query(&[
                ("address", request.address.as_str()),
                ("blockchain", mobula_blockchain_for_chain_id(&request.chain_id)),
            ])
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, key.expose());

        let (latency, result) = fetch_json::<MobulaDetailsResponse>(builder).await;
        report(
            "mobula",
            request,
            latency,
            result.map(|body| body.data.coverage()),
        )
    }

    async fn check_codex(&self, request: &CheckRequest) -> CheckReport {
        let Some(network_id) = network_id_for_chain_id(&request.chain_id) else {
            return skipped("codex", request, "unsupported_chain");
        };

        let token = match self.bearer.bearer().await {
            Ok(token) => token,
            Err(AuthError::MissingCredential) => {
                return skipped("codex", request, ErrorKind::CredentialMissing.as_str());
            }
            Err(e) => {
                tracing::warn!(error = %e, "Bearer token unavailable for metadata check");
                return CheckReport {
                    provider: "codex".to_string(),
                    chain: request.chain.clone(),
                    latency: Duration::ZERO,
                    outcome: CheckOutcome::Failed {
                        error_kind: ErrorKind::Auth.as_str().to_string(),
                    },
                };
            }
        };

        let builder = self
            .client
            .post(&self.endpoints.codex_graphql)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .json(&json!({
                "query": TOKEN_QUERY,
                "variables": {
                    "address": request.address,
                    "networkId": network_id,
                },
            }));

        let (latency, result) = fetch_json::<GraphqlResponse<TokenData>>(builder).await;
        if matches!(result, Err(CheckError::Status(401))) {
            tracing::info!("Codex rejected bearer token, invalidating cache");
            self.bearer.invalidate().await;
        }

        let coverage = result.and_then(|body| {
            if let Some(first) = body.errors.into_iter().next() {
                return Err(CheckError::Graphql(first.message));
            }
            body.data
                .and_then(|data| data.token)
                .filter(|token| token.address.as_deref().is_some_and(|a| !a.is_empty()))
                .map(|token| token.coverage())
                .ok_or(CheckError::NotFound)
        });
        report("codex", request, latency, coverage)
    }

    async fn check_jupiter(&self, request: &CheckRequest) -> Option<CheckReport> {
        if !is_solana_chain_id(&request.chain_id) {
            return None;
        }

        let builder = self
            .client
            .get(format!("{}/{}", self.endpoints.jupiter_tokens, request.address))
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(ACCEPT, "text/html,application/xhtml+xml");

        let (latency, result) = fetch_text(builder).await;
        let coverage = result.and_then(|html| jupiter_coverage(&html, &request.address));
        Some(report("jupiter", request, latency, coverage))
    }
}

fn report(
    provider: &str,
    request: &CheckRequest,
    latency: Duration,
    result: Result<MetadataCoverage, CheckError>,
) -> CheckReport {
    let outcome = match result {
        Ok(coverage) => CheckOutcome::Coverage(coverage),
        Err(e) => {
            tracing::debug!(provider, address = %request.address, error = %e, "Metadata check failed");
            CheckOutcome::Failed {
                error_kind: e.label(),
            }
        }
    };
    CheckReport {
        provider: provider.to_string(),
        chain: request.chain.clone(),
        latency,
        outcome,
    }
}

fn skipped(provider: &str, request: &CheckRequest, reason: &str) -> CheckReport {
    CheckReport {
        provider: provider.to_string(),
        chain: request.chain.clone(),
        latency: Duration::ZERO,
        outcome: CheckOutcome::Skipped {
            reason: reason.to_string(),
        },
    }
}

#[async_trait]
impl CheckExecutor for MetadataCheckExecutor {
    async fn execute(&self, request: &CheckRequest) -> Vec<CheckReport> {
        let mut reports = Vec::with_capacity(3);
        if let Some(key) = &self.mobula_key {
            reports.push(self.check_mobula(request, key).await);
        }
        reports.push(self.check_codex(request).await);
        reports.extend(self.check_jupiter(request).await);
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mobula_coverage_reads_socials() {
        let body: MobulaDetailsResponse = serde_json::from_str(
            r#"{"data":{"logo":"https://img/x.png","description":"","socials":{"twitter":"https://x.com/t","website":null}}}"#,
        )
        .unwrap();
        assert_eq!(
            body.data.coverage(),
            MetadataCoverage {
                logo: true,
                description: false,
                twitter: true,
                website: false,
            }
        );
    }

    #[test]
    fn mobula_missing_data_is_empty_coverage() {
        let body: MobulaDetailsResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(body.data.coverage(), MetadataCoverage::default());
    }

    #[test]
    fn codex_logo_from_any_image_size() {
        let token: CodexToken = serde_json::from_str(
            r#"{"address":"0xabc","info":{"imageSmallUrl":"https://img/s.png","description":"A token"},"socialLinks":{"twitter":"","website":"https://t.io"}}"#,
        )
        .unwrap();
        assert_eq!(
            token.coverage(),
            MetadataCoverage {
                logo: true,
                description: true,
                twitter: false,
                website: true,
            }
        );
    }

    #[test]
    fn codex_without_info_has_no_coverage() {
        let token: CodexToken = serde_json::from_str(r#"{"address":"0xabc"}"#).unwrap();
        assert_eq!(token.coverage(), MetadataCoverage::default());
    }

    fn jupiter_page(queries: &str) -> String {
        format!(
            r#"<html><head></head><body><div id="__next"></div>{NEXT_DATA_OPEN}{{"props":{{"pageProps":{{"dehydratedState":{{"queries":{queries}}}}}}}}}</script><script src="/app.js"></script></body></html>"#
        )
    }

    #[test]
    fn jupiter_logo_from_matching_query() {
        let html = jupiter_page(
            r#"[{"state":{"data":[1,2,3]}},{"state":{"data":{"id":"Other111","icon":""}}},{"state":{"data":{"id":"Mint111","name":"T","symbol":"T","icon":"https://img/t.png","decimals":6}}}]"#,
        );
        assert_eq!(
            jupiter_coverage(&html, "Mint111").unwrap(),
            MetadataCoverage {
                logo: true,
                ..MetadataCoverage::default()
            }
        );
        assert_eq!(
            jupiter_coverage(&html, "Other111").unwrap(),
            MetadataCoverage::default()
        );
    }

    #[test]
    fn jupiter_failures_are_labelled() {
        let html = jupiter_page(r#"[{"state":{"data":{"id":"Other111"}}}]"#);
        assert_eq!(
            jupiter_coverage(&html, "Mint111").unwrap_err().label(),
            "token_not_found"
        );
        assert_eq!(
            jupiter_coverage("<html>no data</html>", "Mint111").unwrap_err().label(),
            "next_data_not_found"
        );
        let truncated = format!("{NEXT_DATA_OPEN}{{\"props\":");
        assert_eq!(
            jupiter_coverage(&truncated, "Mint111").unwrap_err().label(),
            "next_data_not_found"
        );
    }
}
