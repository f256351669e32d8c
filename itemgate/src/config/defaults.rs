//! Default values for every configuration knob.

/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 3000;

/// Sharded workers are opt-in; the default is the single-shard fallback.
pub const DEFAULT_WORKER_ENABLED: bool = false;

/// Maximum bots owned by one shard.
pub const DEFAULT_BOTS_PER_WORKER: usize = 50;

/// Admission queue capacity.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

/// Per-request deadline in milliseconds, measured from admission.
pub const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 10_000;

/// Per-inspect transport deadline in milliseconds.
pub const DEFAULT_INSPECT_TIMEOUT_MS: u64 = 10_000;

/// Post-success bot cooldown in milliseconds. Keeps the fleet below
/// game-side rate limits.
pub const DEFAULT_BOT_COOLDOWN_MS: u64 = 30_000;

/// Login retries per account and manager-level inspect retries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Reconnect attempts before a bot is marked permanently failed.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Base reconnect backoff delay in milliseconds.
pub const DEFAULT_BASE_RECONNECT_DELAY_MS: u64 = 30_000;

/// Reconnect backoff ceiling in milliseconds.
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 600_000;

/// Interval between shard health sweeps in milliseconds.
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 60_000;

/// Interval between shard stats snapshots in milliseconds.
pub const DEFAULT_STATS_UPDATE_INTERVAL_MS: u64 = 3_000;

/// `refresh=true` is ignored unless explicitly enabled.
pub const DEFAULT_ALLOW_REFRESH: bool = false;

/// Default session file directory.
pub const DEFAULT_SESSION_PATH: &str = "./sessions";

/// Default blacklist file path.
pub const DEFAULT_BLACKLIST_PATH: &str = "./blacklist.txt";

/// Hold-off applied to an account after a throttled or failed login,
/// before the health sweep retries it.
pub const ACCOUNT_COOLDOWN_MS: u64 = 30 * 60 * 1000;
