//! Credential plus cache, as consumers see it.

use std::sync::Arc;

use super::{CachedTokenInfo, SessionCredential, TokenCache};
use crate::application::ports::AuthError;

/// Hands out bearer tokens for the configured session credential.
#[derive(Clone)]
pub struct BearerSource {
    credential: Arc<SessionCredential>,
    cache: Arc<TokenCache>,
}

impl BearerSource {
    /// Combine a credential holder with a token cache.
    #[must_use]
    pub const fn new(credential: Arc<SessionCredential>, cache: Arc<TokenCache>) -> Self {
        Self { credential, cache }
    }

    /// Whether a session credential is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.credential.is_configured()
    }

    /// A bearer token valid beyond the cache's safety margin.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingCredential`] when no credential is
    /// configured, otherwise whatever the exchange reports.
    pub async fn bearer(&self) -> Result<String, AuthError> {
        let credential = self.credential.require()?;
        self.cache.get_token(&credential).await
    }

    /// Drop the cached token after the server rejected it.
    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }

    /// Swap in a refreshed session credential and drop any token minted
    /// from the previous one.
    pub async fn rotate(&self, credential: impl Into<String>) {
        self.credential.replace(credential);
        self.cache.invalidate().await;
    }

    /// Expiry of the cached token, if one is held.
    pub async fn token_info(&self) -> Option<CachedTokenInfo> {
        self.cache.info().await
    }
}

impl std::fmt::Debug for BearerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerSource")
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}
