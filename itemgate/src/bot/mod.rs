//! Bot lifecycle: state machine, reconnect policy, typed events.
//!
//! One bot wraps one logged-in game account. The owning shard holds the
//! only reference; everything above the shard talks about bots by username.

mod core;
mod events;
mod reconnect;
mod state;

pub use self::core::Bot;
pub use events::BotEvent;
pub use reconnect::{delay_ceiling, reconnect_delay};
pub use state::{BotCounters, BotState, BotStateKind, ReconnectStatus};
