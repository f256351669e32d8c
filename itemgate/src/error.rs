//! Gateway error taxonomy.
//!
//! Every failure surfaced by the inspect pipeline is one of these kinds.
//! The split matters operationally:
//!
//! - **User errors** (`BadDescriptor`, `QueueFull`) map to 4xx responses.
//! - **Transient errors** (`NoBotsReady`, `InspectTimeout`, `TransportDrop`)
//!   are retried by the worker manager within the request deadline; if they
//!   still fail they map to 504.
//! - **Bot-permanent errors** are terminal for a single bot, never for the
//!   fleet or the request path.
//! - **Infrastructure errors**: cache reads are swallowed as misses;
//!   persistence failures on the write path map to 500.

use std::fmt;

/// Errors produced by the inspect pipeline.
///
/// Cloneable so one failure can be broadcast to every caller coalesced onto
/// the same in-flight request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectError {
    /// The descriptor was malformed (bad link, both or neither of S/M set).
    BadDescriptor(String),
    /// The admission queue is at capacity.
    QueueFull,
    /// No shard has a bot that could serve the request.
    NoBotsReady,
    /// The request deadline elapsed before a result arrived.
    InspectTimeout,
    /// The transport dropped mid-inspect.
    TransportDrop,
    /// The transport reported a protocol-level failure.
    Transport(String),
    /// The persistence store failed on the write path.
    Persistence(String),
    /// The gateway is shutting down; pending requests are released.
    ShuttingDown,
}

impl InspectError {
    /// True for kinds the manager may retry within the request deadline.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoBotsReady | Self::InspectTimeout | Self::TransportDrop
        )
    }

    /// True for kinds caused by the caller rather than the fleet.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::BadDescriptor(_) | Self::QueueFull)
    }
}

impl fmt::Display for InspectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadDescriptor(msg) => write!(f, "bad inspect descriptor: {}", msg),
            Self::QueueFull => write!(f, "admission queue is full"),
            Self::NoBotsReady => write!(f, "no bots ready to serve the request"),
            Self::InspectTimeout => write!(f, "inspect timed out"),
            Self::TransportDrop => write!(f, "game transport dropped"),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::Persistence(msg) => write!(f, "persistence error: {}", msg),
            Self::ShuttingDown => write!(f, "gateway is shutting down"),
        }
    }
}

impl std::error::Error for InspectError {}
