//! Deterministic in-process transport.
//!
//! Stands behind the [`TransportFactory`](super::TransportFactory) seam
//! where a real game-client implementation would plug in. Inspect results
//! are derived deterministically from the asset id, and both login and
//! inspect behavior can be scripted per call, which makes fleet behavior
//! reproducible in tests and local development.

use super::{
    Credentials, GameTransport, ItemRecord, LoginContext, Sticker, TransportError, TransportEvent,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Capacity of the lifecycle event channel; events are low-rate.
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug)]
struct SimState {
    /// Scripted login outcomes, consumed front-to-back before the default.
    login_script: VecDeque<Result<(), TransportError>>,
    /// Outcome once the script is exhausted.
    login_default: Result<(), TransportError>,
    /// Per-asset scripted inspect outcomes.
    inspect_overrides: HashMap<u64, Result<ItemRecord, TransportError>>,
    /// Artificial latency per inspect call.
    inspect_delay: Duration,
    logged_in: bool,
}

/// A scriptable, deterministic game transport.
pub struct SimulatedTransport {
    state: Mutex<SimState>,
    events: broadcast::Sender<TransportEvent>,
    login_calls: AtomicU64,
    inspect_calls: AtomicU64,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(SimState {
                login_script: VecDeque::new(),
                login_default: Ok(()),
                inspect_overrides: HashMap::new(),
                inspect_delay: Duration::ZERO,
                logged_in: false,
            }),
            events,
            login_calls: AtomicU64::new(0),
            inspect_calls: AtomicU64::new(0),
        }
    }

    /// Queues an outcome for the next login attempt.
    pub fn script_login(&self, outcome: Result<(), TransportError>) {
        self.state.lock().unwrap().login_script.push_back(outcome);
    }

    /// Sets the outcome for every login once the script is exhausted.
    pub fn set_login_default(&self, outcome: Result<(), TransportError>) {
        self.state.lock().unwrap().login_default = outcome;
    }

    /// Fixes the outcome for inspects of one asset.
    pub fn script_inspect(&self, asset_id: u64, outcome: Result<ItemRecord, TransportError>) {
        self.state
            .lock()
            .unwrap()
            .inspect_overrides
            .insert(asset_id, outcome);
    }

    /// Adds artificial latency to every inspect call.
    pub fn set_inspect_delay(&self, delay: Duration) {
        self.state.lock().unwrap().inspect_delay = delay;
    }

    /// Drops the session and raises a `Disconnected` lifecycle event.
    pub fn emit_disconnected(&self) {
        self.state.lock().unwrap().logged_in = false;
        let _ = self.events.send(TransportEvent::Disconnected);
    }

    /// Number of login attempts observed.
    pub fn login_calls(&self) -> u64 {
        self.login_calls.load(Ordering::Relaxed)
    }

    /// Number of inspect calls observed.
    pub fn inspect_calls(&self) -> u64 {
        self.inspect_calls.load(Ordering::Relaxed)
    }

    /// Deterministic attribute record for an asset id.
    ///
    /// The derivation is stable across calls and processes so cache and
    /// upsert behavior can be asserted against repeated inspects.
    pub fn derive_record(asset_id: u64) -> ItemRecord {
        let mut record = ItemRecord::new(asset_id);
        record.def_index = Some(7 + (asset_id % 50) as u32);
        record.paint_index = Some((asset_id % 400) as u32);
        record.paint_seed = Some((asset_id % 1000) as u32);
        record.paint_wear = Some(((asset_id % 997) as f64) / 1024.0);
        record.origin = Some(8);
        record.quest_id = Some(0);
        record.rarity = Some((asset_id % 7) as u32);
        record.quality = Some(4);
        if asset_id % 3 == 0 {
            record.stickers.push(Sticker {
                slot: 0,
                sticker_id: (asset_id % 5000) as u32,
                wear: Some(0.0),
                offset_x: None,
                offset_y: None,
                offset_z: None,
                rotation: None,
            });
        }
        record
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GameTransport for SimulatedTransport {
    async fn login(
        &self,
        _creds: &Credentials,
        _ctx: &LoginContext,
    ) -> Result<(), TransportError> {
        self.login_calls.fetch_add(1, Ordering::Relaxed);
        let outcome = {
            let mut state = self.state.lock().unwrap();
            let outcome = state
                .login_script
                .pop_front()
                .unwrap_or_else(|| state.login_default.clone());
            state.logged_in = outcome.is_ok();
            outcome
        };
        outcome
    }

    async fn inspect(
        &self,
        _owner: u64,
        asset_id: u64,
        _proof: u64,
    ) -> Result<ItemRecord, TransportError> {
        self.inspect_calls.fetch_add(1, Ordering::Relaxed);
        let (delay, outcome) = {
            let state = self.state.lock().unwrap();
            if !state.logged_in {
                (state.inspect_delay, Err(TransportError::Disconnected))
            } else {
                let outcome = state
                    .inspect_overrides
                    .get(&asset_id)
                    .cloned()
                    .unwrap_or_else(|| Ok(Self::derive_record(asset_id)));
                (state.inspect_delay, outcome)
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        self.state.lock().unwrap().logged_in = false;
    }
}

/// Factory producing one independent [`SimulatedTransport`] per account.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFactory {
    inspect_delay: Duration,
}

impl SimulatedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an inspect latency to every created transport.
    pub fn with_inspect_delay(mut self, delay: Duration) -> Self {
        self.inspect_delay = delay;
        self
    }
}

impl super::TransportFactory for SimulatedFactory {
    fn create(&self, _username: &str) -> Arc<dyn GameTransport> {
        let transport = SimulatedTransport::new();
        transport.set_inspect_delay(self.inspect_delay);
        Arc::new(transport)
    }
}
