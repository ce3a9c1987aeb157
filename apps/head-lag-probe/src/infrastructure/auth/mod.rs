//! Bearer Token Authentication
//!
//! Streaming and GraphQL calls to Codex authenticate with a short-lived
//! bearer token minted from a long-lived session credential. The
//! [`TokenCache`] owns the token; [`DefinedTokenExchange`] performs the
//! mint; [`SessionCredential`] holds the credential and lets an external
//! refresh swap it.

mod bearer;
mod credential;
mod exchange;
mod token_cache;

pub use bearer::BearerSource;
pub use credential::SessionCredential;
pub use exchange::{DEFINED_TOKEN_ENDPOINT, DefinedTokenExchange};
pub use token_cache::{
    CachedTokenInfo, DEFAULT_SAFETY_MARGIN, DEFAULT_VALIDITY, JwtDecodeError, TokenCache,
    decode_jwt_expiry,
};
