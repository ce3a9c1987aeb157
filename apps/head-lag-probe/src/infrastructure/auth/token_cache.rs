//! Bearer token cache with double-checked refresh.
//!
//! Readers take the shared lock and return a fresh token without I/O. A
//! stale or absent token sends the caller into the refresh section, which
//! is serialized by a separate mutex; the freshness test is repeated after
//! the mutex is acquired so racing callers share one exchange. The new
//! token is stored with a single write, so readers never see a partial
//! update.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::application::ports::{AuthError, TokenExchange};

/// Refresh this long before the decoded expiry.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60 * 60);

/// Validity assumed when the token's expiry cannot be decoded.
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
    refreshed_at: DateTime<Utc>,
}

/// Non-secret view of the cached token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CachedTokenInfo {
    /// Decoded (or assumed) expiry.
    pub expires_at: DateTime<Utc>,
    /// When the token was minted.
    pub refreshed_at: DateTime<Utc>,
}

/// Owns the bearer token derived from the session credential.
pub struct TokenCache {
    exchange: Arc<dyn TokenExchange>,
    safety_margin: TimeDelta,
    default_validity: TimeDelta,
    state: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
}

impl TokenCache {
    /// Create a cache with the default margin and fallback validity.
    #[must_use]
    pub fn new(exchange: Arc<dyn TokenExchange>) -> Self {
        Self::with_policy(exchange, DEFAULT_SAFETY_MARGIN, DEFAULT_VALIDITY)
    }

    /// Create a cache with explicit timing.
    #[must_use]
    pub fn with_policy(
        exchange: Arc<dyn TokenExchange>,
        safety_margin: Duration,
        default_validity: Duration,
    ) -> Self {
        Self {
            exchange,
            safety_margin: TimeDelta::from_std(safety_margin).unwrap_or(TimeDelta::hours(1)),
            default_validity: TimeDelta::from_std(default_validity)
                .unwrap_or(TimeDelta::hours(24)),
            state: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Return a token valid beyond the safety margin, minting one if needed.
    ///
    /// # Errors
    ///
    /// Propagates exchange failures; the cache is left untouched.
    /// Rate limiting surfaces as [`AuthError::RateLimited`].
    pub async fn get_token(&self, session_credential: &str) -> Result<String, AuthError> {
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let _refresh = self.refresh.lock().await;

        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let token = self.exchange.exchange(session_credential).await?;
        let now = Utc::now();
        let expires_at = match decode_jwt_expiry(&token) {
            Ok(expires_at) => expires_at,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    fallback_hours = self.default_validity.num_hours(),
                    "Could not decode token expiry, assuming default validity"
                );
                now + self.default_validity
            }
        };

        *self.state.write().await = Some(CachedToken {
            token: token.clone(),
            expires_at,
            refreshed_at: now,
        });

        tracing::info!(
            expires_at = %expires_at,
            expires_in_mins = (expires_at - now).num_minutes(),
            "Bearer token refreshed"
        );

        Ok(token)
    }

    /// Drop the cached token. The next [`Self::get_token`] mints a new one.
    pub async fn invalidate(&self) {
        if self.state.write().await.take().is_some() {
            tracing::info!("Bearer token invalidated");
        }
    }

    /// Expiry details of the cached token, if any.
    pub async fn info(&self) -> Option<CachedTokenInfo> {
        self.state.read().await.as_ref().map(|cached| CachedTokenInfo {
            expires_at: cached.expires_at,
            refreshed_at: cached.refreshed_at,
        })
    }

    async fn fresh_token(&self) -> Option<String> {
        let state = self.state.read().await;
        state
            .as_ref()
            .filter(|cached| Utc::now() < cached.expires_at - self.safety_margin)
            .map(|cached| cached.token.clone())
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("safety_margin", &self.safety_margin)
            .field("default_validity", &self.default_validity)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// JWT Expiry
// =============================================================================

/// Why a token's expiry could not be read.
#[derive(Debug, thiserror::Error)]
pub enum JwtDecodeError {
    /// Not three dot-separated segments.
    #[error("token is not a JWT")]
    Malformed,
    /// Payload is not base64url.
    #[error("payload is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    /// Payload is not JSON.
    #[error("payload is not JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// `exp` claim missing, zero or out of range.
    #[error("no usable exp claim")]
    MissingExpiry,
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    exp: i64,
}

/// Read the `exp` claim from a JWT without verifying it.
///
/// # Errors
///
/// Returns [`JwtDecodeError`] when the token is not a JWT or has no `exp`.
pub fn decode_jwt_expiry(token: &str) -> Result<DateTime<Utc>, JwtDecodeError> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(JwtDecodeError::Malformed);
    };

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    let claims: Claims = serde_json::from_slice(&bytes)?;
    if claims.exp == 0 {
        return Err(JwtDecodeError::MissingExpiry);
    }
    DateTime::from_timestamp(claims.exp, 0).ok_or(JwtDecodeError::MissingExpiry)
}
