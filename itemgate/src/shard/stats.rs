//! Shard stats snapshots.

use crate::bot::{Bot, BotCounters, BotStateKind, ReconnectStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Usernames are truncated in stats output; enough to identify a bot in a
/// fleet without exposing the full account name.
const USERNAME_DISPLAY_LEN: usize = 12;

/// Shortens a username for display.
pub fn truncate_username(username: &str) -> String {
    if username.chars().count() <= USERNAME_DISPLAY_LEN {
        username.to_string()
    } else {
        let head: String = username.chars().take(USERNAME_DISPLAY_LEN).collect();
        format!("{}…", head)
    }
}

/// One bot's row in a stats snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct BotStatsRow {
    pub username: String,
    pub state: BotStateKind,
    #[serde(flatten)]
    pub counters: BotCounters,
    pub reconnect: ReconnectStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub busy_ms: Option<u64>,
}

/// Bot counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub initializing: usize,
    pub ready: usize,
    pub busy: usize,
    pub cooldown: usize,
    pub disconnected: usize,
    pub error: usize,
    pub permanently_failed: usize,
}

impl StateCounts {
    pub fn observe(&mut self, kind: BotStateKind) {
        match kind {
            BotStateKind::Initializing => self.initializing += 1,
            BotStateKind::Ready => self.ready += 1,
            BotStateKind::Busy => self.busy += 1,
            BotStateKind::Cooldown => self.cooldown += 1,
            BotStateKind::Disconnected => self.disconnected += 1,
            BotStateKind::Error => self.error += 1,
            BotStateKind::PermanentlyFailed => self.permanently_failed += 1,
        }
    }

    /// Bots that are serving or will come back on their own: anything
    /// except disconnected, errored, or terminally failed.
    pub fn usable(&self) -> usize {
        self.initializing + self.ready + self.busy + self.cooldown
    }

    pub fn total(&self) -> usize {
        self.usable() + self.disconnected + self.error + self.permanently_failed
    }

    pub fn merge(&mut self, other: &StateCounts) {
        self.initializing += other.initializing;
        self.ready += other.ready;
        self.busy += other.busy;
        self.cooldown += other.cooldown;
        self.disconnected += other.disconnected;
        self.error += other.error;
        self.permanently_failed += other.permanently_failed;
    }
}

/// Point-in-time snapshot of one shard.
#[derive(Debug, Clone, Serialize)]
pub struct ShardStats {
    pub shard_id: usize,
    pub counts: StateCounts,
    /// Accounts parked on a login throttle.
    pub throttled_accounts: usize,
    /// Accounts awaiting a fresh login attempt after failure.
    pub pending_accounts: usize,
    pub bots: Vec<BotStatsRow>,
}

impl ShardStats {
    /// Builds a snapshot from the shard's bot table.
    pub fn collect(
        shard_id: usize,
        bots: &HashMap<String, Arc<Bot>>,
        throttled_accounts: usize,
        pending_accounts: usize,
    ) -> Self {
        let mut counts = StateCounts::default();
        let mut rows: Vec<BotStatsRow> = bots
            .values()
            .map(|bot| {
                let state = bot.state_kind();
                counts.observe(state);
                BotStatsRow {
                    username: truncate_username(bot.username()),
                    state,
                    counters: bot.counters(),
                    reconnect: bot.reconnect_status(),
                    busy_ms: bot.busy_duration().map(|d| d.as_millis() as u64),
                }
            })
            .collect();
        rows.sort_by(|a, b| a.username.cmp(&b.username));
        Self {
            shard_id,
            counts,
            throttled_accounts,
            pending_accounts,
            bots: rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_username_unchanged() {
        assert_eq!(truncate_username("bot_01"), "bot_01");
    }

    #[test]
    fn test_truncate_long_username() {
        let long = "averyverylongaccountname";
        let truncated = truncate_username(long);
        assert!(truncated.starts_with("averyverylon"));
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn test_state_counts_usable() {
        let mut counts = StateCounts::default();
        counts.observe(BotStateKind::Ready);
        counts.observe(BotStateKind::Busy);
        counts.observe(BotStateKind::Cooldown);
        counts.observe(BotStateKind::Disconnected);
        counts.observe(BotStateKind::PermanentlyFailed);
        assert_eq!(counts.usable(), 3);
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn test_state_counts_merge() {
        let mut a = StateCounts {
            ready: 2,
            ..Default::default()
        };
        let b = StateCounts {
            ready: 1,
            error: 3,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.ready, 3);
        assert_eq!(a.error, 3);
    }
}
