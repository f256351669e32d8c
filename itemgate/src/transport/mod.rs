//! Game transport abstraction.
//!
//! The gateway treats the game-client library as a black box: it logs in
//! with a credential, answers inspect calls, and raises lifecycle events
//! when the session drops. Everything else - retry, backoff, cooldowns,
//! scheduling - is owned by the gateway, never by the transport.
//!
//! One transport instance serves exactly one account. Session state on disk
//! is keyed by username, and no two shards share a credential, so transports
//! never contend for session files.

mod simulated;
mod types;

pub use simulated::{SimulatedFactory, SimulatedTransport};
pub use types::{ItemRecord, Keychain, Sticker, TransportError, TransportEvent};

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

/// One account's login material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Ambient login parameters shared by every account.
#[derive(Debug, Clone)]
pub struct LoginContext {
    /// Directory for session files; filenames must include the username.
    pub session_dir: PathBuf,
    /// Outbound proxy, if configured.
    pub proxy_url: Option<String>,
}

/// The game-client collaborator contract.
///
/// Implementations map their protocol errors onto [`TransportError`] reason
/// codes; the fixed permanent kinds drive the caller's retry decisions.
#[async_trait]
pub trait GameTransport: Send + Sync {
    /// Establishes a session for the credential. Returns once the account
    /// is ready to serve inspects.
    async fn login(&self, creds: &Credentials, ctx: &LoginContext) -> Result<(), TransportError>;

    /// Performs one inspect round-trip. `owner` is the S or M head of the
    /// descriptor; the transport does not distinguish the two.
    async fn inspect(
        &self,
        owner: u64,
        asset_id: u64,
        proof: u64,
    ) -> Result<ItemRecord, TransportError>;

    /// Subscribes to out-of-band lifecycle events (`disconnected`, errors).
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Tears the session down. Best-effort; errors are not reported.
    async fn disconnect(&self);
}

/// Creates one transport per account.
///
/// The factory is the seam where a real game-client implementation plugs
/// in; the in-repo [`SimulatedTransport`] stands behind the same seam for
/// tests and local development.
pub trait TransportFactory: Send + Sync {
    fn create(&self, username: &str) -> Arc<dyn GameTransport>;
}

impl<F> TransportFactory for F
where
    F: Fn(&str) -> Arc<dyn GameTransport> + Send + Sync,
{
    fn create(&self, username: &str) -> Arc<dyn GameTransport> {
        self(username)
    }
}
