//! Bot state machine types.
//!
//! ```text
//!                ┌─────────── login OK ─────────┐
//!  Initializing ─┤                              ├──► Ready
//!                └──► Error(kind)               │
//!                                               │
//!  Ready ──inspect()──► Busy ──result──► Cooldown(now + COOLDOWN)
//!                                           │
//!                                           └──elapsed──► Ready
//!
//!  Ready/Busy ──transport drop──► Disconnected ──► (reconnect backoff)
//!  Error(permanent) ──► PermanentlyFailed   (terminal)
//! ```
//!
//! Exactly one state holds at any instant; transitions happen under the
//! bot's state lock and are mirrored to the shard as typed events.

use crate::transport::TransportError;
use serde::Serialize;
use std::fmt;
use std::time::Instant;

/// Full bot state, including per-state payloads.
#[derive(Debug, Clone)]
pub enum BotState {
    /// Logging in for the first time.
    Initializing,
    /// Logged in and selectable.
    Ready,
    /// Serving one inspect.
    Busy { asset_id: u64, started_at: Instant },
    /// Post-success rest; not selectable until `until`.
    Cooldown { until: Instant },
    /// Session dropped; reconnect logic applies.
    Disconnected,
    /// Last operation failed with a recoverable error.
    Error(TransportError),
    /// Terminal: the account can never come back.
    PermanentlyFailed(String),
}

impl BotState {
    pub fn kind(&self) -> BotStateKind {
        match self {
            Self::Initializing => BotStateKind::Initializing,
            Self::Ready => BotStateKind::Ready,
            Self::Busy { .. } => BotStateKind::Busy,
            Self::Cooldown { .. } => BotStateKind::Cooldown,
            Self::Disconnected => BotStateKind::Disconnected,
            Self::Error(_) => BotStateKind::Error,
            Self::PermanentlyFailed(_) => BotStateKind::PermanentlyFailed,
        }
    }
}

/// Payload-free state discriminant, used in stats rows and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStateKind {
    Initializing,
    Ready,
    Busy,
    Cooldown,
    Disconnected,
    Error,
    PermanentlyFailed,
}

impl fmt::Display for BotStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Cooldown => "cooldown",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::PermanentlyFailed => "permanently_failed",
        };
        write!(f, "{}", name)
    }
}

/// Reconnect bookkeeping exposed through stats and admin queries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconnectStatus {
    /// Consecutive failed reconnect attempts.
    pub attempts: u32,
    /// A reconnect task is currently sleeping or logging in.
    pub scheduled: bool,
    /// Attempts remain and the account is not terminally failed.
    pub can_reconnect: bool,
    /// The bot reached a terminal state.
    pub permanently_failed: bool,
    /// Most recent login/transport error, if any.
    pub last_error: Option<String>,
}

/// Counter snapshot for one bot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BotCounters {
    pub inspect_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Milliseconds since the last inspect started, if any.
    pub last_inspect_ms_ago: Option<u64>,
}
