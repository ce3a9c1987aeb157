//! Session-credential to bearer-token exchange against the Defined API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::application::ports::{AuthError, TokenExchange};

/// Production token endpoint.
pub const DEFINED_TOKEN_ENDPOINT: &str = "https://www.defined.fi/api";

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const CREATE_TOKEN_MUTATION: &str =
    "mutation CreateApiToken { createApiTokens(input: { count: 1 }) { token } }";

#[derive(Deserialize)]
struct CreateTokenResponse {
    data: Option<CreateTokenData>,
}

#[derive(Deserialize)]
struct CreateTokenData {
    #[serde(rename = "createApiTokens", default)]
    create_api_tokens: Vec<IssuedToken>,
}

#[derive(Deserialize)]
struct IssuedToken {
    token: String,
}

/// Mints bearer tokens by posting the session cookie to the Defined API.
#[derive(Debug, Clone)]
pub struct DefinedTokenExchange {
    client: Client,
    endpoint: String,
}

impl DefinedTokenExchange {
    /// Create an exchange against `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Request`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(EXCHANGE_TIMEOUT)
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .map_err(|e| AuthError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl TokenExchange for DefinedTokenExchange {
    async fn exchange(&self, session_credential: &str) -> Result<String, AuthError> {
        let body = json!({
            "operationName": "CreateApiToken",
            "query": CREATE_TOKEN_MUTATION,
            "variables": {},
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .header("Origin", "https://www.defined.fi")
            .header("Referer", "https://www.defined.fi/")
            .header("Cookie", format!("session={session_credential}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            tracing::warn!(
                retry_after_secs = retry_after.map(|d| d.as_secs()),
                "Token exchange rate limited"
            );
            return Err(AuthError::RateLimited { retry_after });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AuthError::Unauthorized {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AuthError::UnexpectedStatus {
                status: status.as_u16(),
                body: text.chars().take(100).collect(),
            });
        }

        let parsed: CreateTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        parsed
            .data
            .and_then(|data| data.create_api_tokens.into_iter().next())
            .map(|issued| issued.token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::InvalidResponse("no token returned".to_string()))
    }
}
