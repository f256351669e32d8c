//! Worker shards.
//!
//! A shard owns a disjoint partition of accounts and the only references to
//! their [`Bot`](crate::bot::Bot) instances. The manager never touches a
//! bot; it sends [`ShardCommand`]s keyed by username and reads
//! [`ShardEvent`]s. All per-account process state (throttle marks, failed
//! login cooldowns) is confined to the owning shard.

mod stats;
mod worker;

pub use stats::{truncate_username, BotStatsRow, ShardStats, StateCounts};
pub use worker::WorkerShard;

use crate::error::InspectError;
use crate::transport::ItemRecord;

/// Commands the manager sends to a shard.
#[derive(Debug)]
pub enum ShardCommand {
    /// Run one inspect on any ready bot.
    Inspect {
        request_id: u64,
        asset_id: u64,
        owner: u64,
        proof: u64,
    },
    /// Force-reconnect one bot by username.
    ReconnectBot { username: String },
    /// Force-reconnect every bot in the shard.
    ReconnectAll,
    /// Run a health sweep now.
    HealthCheck,
    /// Emit a stats snapshot now.
    GetStats,
    /// Destroy all bots and exit the shard loop.
    Shutdown,
}

/// Events a shard streams back to the manager.
#[derive(Debug)]
pub enum ShardEvent {
    /// Result of one dispatched inspect.
    InspectOutcome {
        shard_id: usize,
        request_id: u64,
        asset_id: u64,
        /// Bot that served the request; `None` when no bot was selected.
        username: Option<String>,
        result: Result<ItemRecord, InspectError>,
    },
    /// A bot finished logging in and is selectable.
    BotInitialized { shard_id: usize, username: String },
    /// A bot changed state.
    BotStatusChange {
        shard_id: usize,
        username: String,
        kind: crate::bot::BotStateKind,
    },
    /// Periodic stats snapshot.
    Stats(ShardStats),
    /// Shutdown finished; the shard loop has exited.
    ShutdownComplete { shard_id: usize },
}
