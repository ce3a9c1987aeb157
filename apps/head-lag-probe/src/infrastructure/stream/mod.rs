//! Provider Stream Clients
//!
//! A shared connection loop ([`StreamSession`]) drives per-vendor protocol
//! adapters ([`StreamProvider`]); a [`StreamSupervisor`] restarts each
//! session with failure-aware backoff.

pub mod codex;
pub mod codex_launchpad;
pub mod gecko;
pub mod graphql_ws;
pub mod mobula;
pub mod mobula_pulse;
pub mod provider;
pub mod reconnect;
pub mod session;
pub mod status;
pub mod supervisor;

pub use codex::{CODEX_STREAM_URL, CodexProvider};
pub use codex_launchpad::CodexLaunchpadProvider;
pub use gecko::{GECKO_STREAM_URL, GeckoTerminalProvider};
pub use mobula::{MOBULA_STREAM_URL, MobulaProvider};
pub use mobula_pulse::{MOBULA_PULSE_STREAM_URL, MobulaPulseProvider};
pub use provider::{
    ClientKeepAlive, CodecError, FailureKind, Frame, Handshake, ProviderSettings, StreamError,
    StreamProvider,
};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use session::{SessionEnd, StreamSession};
pub use status::{ConnectionState, ProviderSnapshot, ProviderStatus};
pub use supervisor::{StreamSupervisor, SupervisedStream};
