//! Gateway configuration.
//!
//! Configuration is environment-derived: every recognized variable has a
//! default, so a bare `Config::from_env()` always succeeds on a clean
//! environment. The module is split the same way settings are consumed:
//!
//! - [`settings`]: pure data structs, one per concern
//! - [`defaults`]: the default value for every knob
//! - env parsing lives here in `from_env`

mod defaults;
mod settings;

pub use defaults::*;
pub use settings::{
    AccountsSettings, BotSettings, Config, FleetSettings, GatewaySettings, QueueSettings,
    ServerSettings, ShardSettings, TransportSettings,
};

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Error raised when an environment variable is present but unparseable.
#[derive(Debug)]
pub struct ConfigError {
    variable: &'static str,
    value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid value for {}: {:?}",
            self.variable, self.value
        )
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// Unset variables fall back to the defaults in [`defaults`]. Set but
    /// unparseable variables are an error rather than a silent fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerSettings {
                port: parse_var("PORT", DEFAULT_PORT)?,
            },
            fleet: FleetSettings {
                worker_enabled: parse_bool("WORKER_ENABLED", DEFAULT_WORKER_ENABLED)?,
                bots_per_worker: parse_var("BOTS_PER_WORKER", DEFAULT_BOTS_PER_WORKER)?,
                max_retries: parse_var("MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            },
            queue: QueueSettings {
                max_size: parse_var("MAX_QUEUE_SIZE", DEFAULT_MAX_QUEUE_SIZE)?,
                timeout: parse_millis("QUEUE_TIMEOUT", DEFAULT_QUEUE_TIMEOUT_MS)?,
            },
            bot: BotSettings {
                inspect_timeout: parse_millis("INSPECT_TIMEOUT", DEFAULT_INSPECT_TIMEOUT_MS)?,
                cooldown: parse_millis("BOT_COOLDOWN_TIME", DEFAULT_BOT_COOLDOWN_MS)?,
                max_reconnect_attempts: parse_var(
                    "MAX_RECONNECT_ATTEMPTS",
                    DEFAULT_MAX_RECONNECT_ATTEMPTS,
                )?,
                base_reconnect_delay: parse_millis(
                    "BASE_RECONNECT_DELAY",
                    DEFAULT_BASE_RECONNECT_DELAY_MS,
                )?,
                max_reconnect_delay: parse_millis(
                    "MAX_RECONNECT_DELAY",
                    DEFAULT_MAX_RECONNECT_DELAY_MS,
                )?,
            },
            shard: ShardSettings {
                health_check_interval: parse_millis(
                    "HEALTH_CHECK_INTERVAL",
                    DEFAULT_HEALTH_CHECK_INTERVAL_MS,
                )?,
                stats_update_interval: parse_millis(
                    "STATS_UPDATE_INTERVAL",
                    DEFAULT_STATS_UPDATE_INTERVAL_MS,
                )?,
            },
            transport: TransportSettings {
                proxy_url: env::var("PROXY_URL").ok().filter(|v| !v.is_empty()),
                session_path: path_var("SESSION_PATH", DEFAULT_SESSION_PATH),
            },
            gateway: GatewaySettings {
                allow_refresh: parse_bool("ALLOW_REFRESH", DEFAULT_ALLOW_REFRESH)?,
            },
            accounts: AccountsSettings {
                blacklist_path: path_var("BLACKLIST_PATH", DEFAULT_BLACKLIST_PATH),
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    variable: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError {
            variable,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_bool(variable: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(variable) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError {
                variable,
                value: raw,
            }),
        },
        Err(_) => Ok(default),
    }
}

fn parse_millis(variable: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(parse_var(variable, default_ms)?))
}

fn path_var(variable: &'static str, default: &str) -> PathBuf {
    env::var(variable)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // Environment variables are process-global; these names are only
        // set by tests that restore them, so defaults apply here.
        let config = Config::from_env().expect("defaults should parse");
        assert_eq!(config.server.port, 3000);
        assert!(!config.fleet.worker_enabled);
        assert_eq!(config.fleet.bots_per_worker, 50);
        assert_eq!(config.queue.max_size, 100);
        assert_eq!(config.queue.timeout, Duration::from_secs(10));
        assert_eq!(config.bot.cooldown, Duration::from_secs(30));
        assert_eq!(config.bot.max_reconnect_attempts, 10);
        assert_eq!(config.bot.base_reconnect_delay, Duration::from_secs(30));
        assert_eq!(config.bot.max_reconnect_delay, Duration::from_secs(600));
        assert_eq!(config.shard.stats_update_interval, Duration::from_secs(3));
        assert!(!config.gateway.allow_refresh);
        assert_eq!(config.transport.session_path, PathBuf::from("./sessions"));
        assert_eq!(
            config.accounts.blacklist_path,
            PathBuf::from("./blacklist.txt")
        );
    }

    #[test]
    fn test_bool_parsing() {
        assert!(matches!(parse_bool("ITEMGATE_TEST_UNSET_BOOL", true), Ok(true)));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError {
            variable: "PORT",
            value: "not-a-number".into(),
        };
        assert!(err.to_string().contains("PORT"));
        assert!(err.to_string().contains("not-a-number"));
    }
}
