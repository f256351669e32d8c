//! ItemGate - Inspection gateway for CS2 in-game items
//!
//! This library implements an inspection gateway: clients submit an inspect
//! descriptor (the `S/A/D/M` tuple from a steam inspect link) and receive the
//! item's detailed attributes (wear, paint seed, stickers, keychains, ...).
//! Those attributes are only obtainable through a logged-in game account, so
//! the gateway maintains a fleet of such accounts ("bots"), multiplexes
//! concurrent requests onto them, and caches results.
//!
//! # High-Level API
//!
//! The [`coordinator`] module provides the public entry point:
//!
//! ```ignore
//! use itemgate::config::Config;
//! use itemgate::coordinator::InspectCoordinator;
//!
//! let config = Config::from_env()?;
//! let coordinator = InspectCoordinator::new(store, fleet, config.gateway);
//!
//! let response = coordinator.inspect_item(descriptor).await?;
//! ```
//!
//! The [`fleet`] module owns the sharded bot pool; [`server`] exposes the
//! HTTP surface.

pub mod accounts;
pub mod bot;
pub mod config;
pub mod coordinator;
pub mod descriptor;
pub mod error;
pub mod fleet;
pub mod history;
pub mod metrics;
pub mod queue;
pub mod server;
pub mod shard;
pub mod store;
pub mod transport;

/// Version of the ItemGate library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
