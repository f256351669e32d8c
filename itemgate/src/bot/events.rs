//! Typed bot lifecycle events.
//!
//! Every state transition is mirrored synchronously onto a channel of these
//! events. The owning shard is the only consumer; it reacts (health
//! bookkeeping, readiness notification) and forwards roll-ups to the
//! manager. There is no dynamic event-name dispatch anywhere.

use super::state::BotStateKind;
use std::time::Duration;

/// Events emitted by a bot to its owning shard.
#[derive(Debug, Clone)]
pub enum BotEvent {
    /// The bot entered a new state.
    StateChanged {
        username: String,
        kind: BotStateKind,
    },

    /// One inspect finished, successfully or not.
    Inspected {
        username: String,
        asset_id: u64,
        success: bool,
        duration: Duration,
    },

    /// The transport session dropped.
    Disconnected { username: String },

    /// A reconnect was scheduled with the given backoff delay.
    ReconnectScheduled {
        username: String,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },

    /// The scheduled reconnect is now logging in.
    Reconnecting { username: String, attempt: u32 },

    /// Reconnect succeeded; counters and state were reset.
    Reconnected { username: String },

    /// Attempts exhausted; the bot is about to fail permanently.
    MaxReconnectAttemptsReached { username: String },

    /// Terminal failure with the transport-reported reason.
    PermanentlyFailed { username: String, reason: String },
}

impl BotEvent {
    /// Username the event concerns.
    pub fn username(&self) -> &str {
        match self {
            Self::StateChanged { username, .. }
            | Self::Inspected { username, .. }
            | Self::Disconnected { username }
            | Self::ReconnectScheduled { username, .. }
            | Self::Reconnecting { username, .. }
            | Self::Reconnected { username }
            | Self::MaxReconnectAttemptsReached { username }
            | Self::PermanentlyFailed { username, .. } => username,
        }
    }
}
