//! Settings structs for all configuration sections.
//!
//! Each struct covers one concern of the gateway. These are pure data types
//! with no parsing logic; see the module root for env loading.

use std::path::PathBuf;
use std::time::Duration;

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerSettings,
    /// Fleet sizing and dispatch settings
    pub fleet: FleetSettings,
    /// Admission queue settings
    pub queue: QueueSettings,
    /// Per-bot timing settings
    pub bot: BotSettings,
    /// Per-shard maintenance intervals
    pub shard: ShardSettings,
    /// Game transport settings
    pub transport: TransportSettings,
    /// Request handling settings
    pub gateway: GatewaySettings,
    /// Account list settings
    pub accounts: AccountsSettings,
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Listen port.
    pub port: u16,
}

/// Fleet configuration.
#[derive(Debug, Clone)]
pub struct FleetSettings {
    /// Run shards on dedicated OS threads. When false, a single in-process
    /// shard serves the whole account list.
    pub worker_enabled: bool,
    /// Maximum bots per shard; shard count is `ceil(accounts / this)`.
    pub bots_per_worker: usize,
    /// Login retries per account and manager-level inspect retries.
    pub max_retries: u32,
}

/// Admission queue configuration.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Queue capacity; submissions beyond this are rejected, not blocked.
    pub max_size: usize,
    /// Per-request deadline, measured from admission.
    pub timeout: Duration,
}

/// Per-bot timing configuration.
#[derive(Debug, Clone)]
pub struct BotSettings {
    /// Deadline for a single inspect round-trip.
    pub inspect_timeout: Duration,
    /// Post-success rest period before the bot is selectable again.
    pub cooldown: Duration,
    /// Reconnect attempts before a bot is marked permanently failed.
    pub max_reconnect_attempts: u32,
    /// Base delay for reconnect backoff.
    pub base_reconnect_delay: Duration,
    /// Ceiling for reconnect backoff.
    pub max_reconnect_delay: Duration,
}

/// Shard maintenance intervals.
#[derive(Debug, Clone)]
pub struct ShardSettings {
    /// Interval between bot health sweeps (first sweep runs at half this).
    pub health_check_interval: Duration,
    /// Interval between stats snapshots streamed to the manager.
    pub stats_update_interval: Duration,
}

/// Game transport configuration.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Outbound proxy URL, if any.
    pub proxy_url: Option<String>,
    /// Directory for per-account session files. Filenames include the
    /// username; no two shards share a credential, so writes never race.
    pub session_path: PathBuf,
}

/// Request handling configuration.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Honor `refresh=true` on inspect requests.
    pub allow_refresh: bool,
}

/// Account list configuration.
#[derive(Debug, Clone)]
pub struct AccountsSettings {
    /// Path to the blacklist file; listed usernames are never logged in.
    pub blacklist_path: PathBuf,
}
