//! Downstream REST Calls
//!
//! The production [`CheckExecutor`](crate::application::ports::CheckExecutor)
//! for triggered metadata checks, and the periodic REST and swap quote
//! latency pollers.

mod http;
mod metadata;
mod quote;
mod rest_poller;

pub use http::{
    CODEX_GRAPHQL_URL, CheckError, MOBULA_REST_BASE_URL, REQUEST_TIMEOUT, build_client,
    categorize_status,
};
pub use metadata::{JUPITER_TOKENS_URL, MetadataCheckExecutor, MetadataEndpoints};
pub use quote::{QUOTE_TARGETS, QuoteApi, QuoteProbe, QuoteTarget};
pub use rest_poller::{
    CodexRestProbe, MobulaRestProbe, PolledTarget, REST_TARGETS, RestPoller, RestProbe,
    RestTarget,
};
