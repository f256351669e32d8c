//! The worker manager: shard spawning, dispatch, retry, aggregation.
//!
//! ```text
//! inspect() ──► AdmissionQueue ──► dispatch loop ──► ShardCommand::Inspect
//!                    ▲                                      │
//!                    │            ShardEvent::InspectOutcome▼
//!                    └──── complete / requeue ◄──── manager run loop
//! ```
//!
//! Accounts are partitioned into shards of at most `BOTS_PER_WORKER`. With
//! workers enabled each shard runs on its own OS thread under a
//! single-threaded runtime; the fallback runs one shard as a task on the
//! main runtime. Either way the manager holds only command senders - no
//! bot references ever cross a shard boundary.
//!
//! Dispatch picks a shard by weighted random choice over shards with at
//! least one ready bot (weight = ready count), mirroring the uniform
//! random bot choice one level down. When no shard has a ready bot but
//! some bot is busy, cooling, or still logging in, entries simply wait in
//! the queue for the next readiness signal; when the whole fleet has
//! nothing that could become ready, queued entries fail fast with
//! `NoBotsReady`.

mod stats;

pub use stats::{aggregate_counts, CounterSnapshot, Counters, FleetStats};

use crate::config::Config;
use crate::error::InspectError;
use crate::metrics::ResponseTimeRecorder;
use crate::queue::{Admission, AdmissionQueue, Priority};
use crate::shard::{ShardCommand, ShardEvent, ShardStats, WorkerShard};
use crate::transport::{Credentials, ItemRecord, LoginContext, TransportFactory};
use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deadline sweep cadence; queue expiry is detected within one tick.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

enum ShardRunner {
    Thread(std::thread::JoinHandle<()>),
    Task(tokio::task::JoinHandle<()>),
}

struct ShardHandle {
    id: usize,
    commands: mpsc::UnboundedSender<ShardCommand>,
}

/// Owns the shard fleet and the request lifecycle between admission and
/// completion.
pub struct WorkerManager {
    queue: Arc<AdmissionQueue>,
    counters: Counters,
    /// Last snapshot per shard; read lock-free on the dispatch path.
    latest_stats: DashMap<usize, ShardStats>,
    response_times: Mutex<ResponseTimeRecorder>,
    shards: Vec<ShardHandle>,
    runners: Mutex<Vec<ShardRunner>>,
    work_notify: Notify,
    shutdown: CancellationToken,
    max_retries: u32,
    started_at: Instant,
}

impl WorkerManager {
    /// Partitions accounts, spawns the shards and the manager run loop.
    pub fn spawn(
        accounts: Vec<Credentials>,
        factory: Arc<dyn TransportFactory>,
        config: &Config,
    ) -> Arc<Self> {
        let queue = Arc::new(AdmissionQueue::new(
            config.queue.max_size,
            config.queue.timeout,
        ));
        let login_ctx = LoginContext {
            session_dir: config.transport.session_path.clone(),
            proxy_url: config.transport.proxy_url.clone(),
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let partitions: Vec<Vec<Credentials>> = if config.fleet.worker_enabled {
            accounts
                .chunks(config.fleet.bots_per_worker.max(1))
                .map(|chunk| chunk.to_vec())
                .collect()
        } else {
            vec![accounts]
        };

        let mut shards = Vec::new();
        let mut runners = Vec::new();
        for (id, partition) in partitions.into_iter().enumerate() {
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
            let shard = WorkerShard::new(
                id,
                partition,
                Arc::clone(&factory),
                login_ctx.clone(),
                config.bot.clone(),
                config.shard.clone(),
                config.fleet.max_retries,
                events_tx.clone(),
            );
            let runner = if config.fleet.worker_enabled {
                ShardRunner::Thread(shard.spawn_thread(cmd_rx, shutdown.clone()))
            } else {
                ShardRunner::Task(tokio::spawn(shard.run(cmd_rx, shutdown.clone())))
            };
            shards.push(ShardHandle {
                id,
                commands: cmd_tx,
            });
            runners.push(runner);
        }
        info!(
            shards = shards.len(),
            worker_threads = config.fleet.worker_enabled,
            "Worker manager starting"
        );

        let manager = Arc::new(Self {
            queue,
            counters: Counters::default(),
            latest_stats: DashMap::new(),
            response_times: Mutex::new(ResponseTimeRecorder::new()),
            shards,
            runners: Mutex::new(runners),
            work_notify: Notify::new(),
            shutdown,
            max_retries: config.fleet.max_retries,
            started_at: Instant::now(),
        });

        tokio::spawn(Arc::clone(&manager).run(events_rx));
        manager
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Submits one inspect and awaits its outcome.
    ///
    /// A submission for an asset already in flight coalesces onto the
    /// existing entry; exactly one physical inspect runs per asset at any
    /// instant across the whole fleet.
    pub async fn inspect(
        &self,
        owner: u64,
        asset_id: u64,
        proof: u64,
        market_id: u64,
        priority: Priority,
    ) -> Result<Arc<ItemRecord>, InspectError> {
        let mut rx = match self.queue.add(asset_id, owner, proof, market_id, priority) {
            Admission::Full => return Err(InspectError::QueueFull),
            Admission::Admitted(rx) => {
                self.work_notify.notify_one();
                rx
            }
            Admission::Coalesced(rx) => rx,
        };
        match rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(InspectError::ShuttingDown),
        }
    }

    /// Records a cache hit served without touching the fleet.
    pub fn increment_cached(&self) {
        self.counters.cached.fetch_add(1, Ordering::Relaxed);
    }

    /// True when one more admission would be rejected.
    pub fn queue_is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Merged fleet snapshot for the stats surface.
    pub fn stats(&self) -> FleetStats {
        let mut shards: Vec<ShardStats> = self
            .latest_stats
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        shards.sort_by_key(|s| s.shard_id);
        FleetStats {
            uptime_secs: self.started_at.elapsed().as_secs(),
            fleet: aggregate_counts(&shards),
            counters: self.counters.snapshot(),
            response_times: self.response_times.lock().unwrap().snapshot(),
            queue: self.queue.metrics(),
            shards,
        }
    }

    /// Asks the owning shard to force-reconnect one bot. The command is
    /// broadcast; shards without the username ignore it.
    pub fn reconnect_bot(&self, username: &str) {
        for shard in &self.shards {
            let _ = shard.commands.send(ShardCommand::ReconnectBot {
                username: username.to_string(),
            });
        }
    }

    /// Force-reconnects every bot in the fleet.
    pub fn reconnect_all(&self) {
        for shard in &self.shards {
            let _ = shard.commands.send(ShardCommand::ReconnectAll);
        }
    }

    /// Shuts the fleet down: cancels every shard, releases pending
    /// requests, and joins shard threads.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.queue.fail_all(InspectError::ShuttingDown);
        let runners = std::mem::take(&mut *self.runners.lock().unwrap());
        for runner in runners {
            match runner {
                ShardRunner::Thread(handle) => {
                    let _ = tokio::task::spawn_blocking(move || handle.join()).await;
                }
                ShardRunner::Task(handle) => {
                    let _ = handle.await;
                }
            }
        }
    }

    // =========================================================================
    // Run loop
    // =========================================================================

    async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ShardEvent>) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    for shard in &self.shards {
                        let _ = shard.commands.send(ShardCommand::Shutdown);
                    }
                    self.queue.fail_all(InspectError::ShuttingDown);
                    break;
                }

                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    // Every shard exited; nothing can make progress.
                    None => break,
                },

                _ = self.work_notify.notified() => {
                    self.dispatch_pending();
                }

                _ = sweep.tick() => {
                    let expired = self.queue.expire_due();
                    if !expired.is_empty() {
                        self.counters
                            .timeouts
                            .fetch_add(expired.len() as u64, Ordering::Relaxed);
                        debug!(expired = expired.len(), "Queue entries timed out");
                    }
                    self.dispatch_pending();
                }
            }
        }
        debug!("Worker manager stopped");
    }

    fn handle_event(&self, event: ShardEvent) {
        match event {
            ShardEvent::InspectOutcome {
                request_id,
                asset_id,
                result,
                username,
                shard_id,
            } => self.handle_outcome(shard_id, request_id, asset_id, username, result),
            ShardEvent::Stats(stats) => {
                let has_ready = stats.counts.ready > 0;
                self.latest_stats.insert(stats.shard_id, stats);
                if has_ready {
                    self.work_notify.notify_one();
                }
            }
            ShardEvent::BotInitialized { shard_id, username } => {
                debug!(shard_id, %username, "Bot initialized");
                self.work_notify.notify_one();
            }
            ShardEvent::BotStatusChange { kind, .. } => {
                if kind == crate::bot::BotStateKind::Ready {
                    self.work_notify.notify_one();
                }
            }
            ShardEvent::ShutdownComplete { shard_id } => {
                debug!(shard_id, "Shard shutdown complete");
            }
        }
    }

    fn handle_outcome(
        &self,
        shard_id: usize,
        request_id: u64,
        asset_id: u64,
        username: Option<String>,
        result: Result<ItemRecord, InspectError>,
    ) {
        match result {
            Ok(record) => {
                let Some(completed) =
                    self.queue
                        .complete(asset_id, request_id, Ok(Arc::new(record)))
                else {
                    // Entry expired or was re-dispatched; drop the result.
                    debug!(asset_id, "Dropping result for vacated queue entry");
                    return;
                };
                self.counters.success.fetch_add(1, Ordering::Relaxed);
                if completed.retry_count > 0 {
                    self.counters
                        .success_after_retry
                        .fetch_add(1, Ordering::Relaxed);
                }
                self.response_times
                    .lock()
                    .unwrap()
                    .record(completed.enqueued_at.elapsed());
            }
            Err(InspectError::NoBotsReady) if self.usable_bots() > 0 => {
                // The shard's ready set emptied between our snapshot and
                // the dispatch. Not a failed attempt: the entry goes back
                // to the pool and waits for the next readiness signal or
                // its deadline.
                self.queue.release(asset_id, request_id);
            }
            Err(err) if err.is_transient() => {
                let retries_left = self
                    .queue
                    .retry_count(asset_id)
                    .map_or(false, |count| count < self.max_retries);
                if retries_left && self.queue.requeue(asset_id, request_id) {
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    debug!(asset_id, shard_id, %err, "Transient failure; requeued");
                    self.work_notify.notify_one();
                } else if self
                    .queue
                    .complete(asset_id, request_id, Err(err.clone()))
                    .is_some()
                {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(asset_id, shard_id, %err, "Inspect failed after retries");
                }
            }
            Err(err) => {
                if self
                    .queue
                    .complete(asset_id, request_id, Err(err.clone()))
                    .is_some()
                {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(asset_id, shard_id, ?username, %err, "Inspect failed");
                }
            }
        }
    }

    /// Bots anywhere in the fleet that are serving or will come back on
    /// their own, per the latest shard snapshots.
    fn usable_bots(&self) -> usize {
        self.latest_stats
            .iter()
            .map(|entry| entry.value().counts.usable())
            .sum()
    }

    /// Drains dispatchable queue entries onto shards with ready bots.
    fn dispatch_pending(&self) {
        // Snapshot readiness once per pass; outcomes correct any staleness
        // through the NoBotsReady retry path.
        let mut ready: Vec<(usize, usize)> = self
            .latest_stats
            .iter()
            .filter(|entry| entry.value().counts.ready > 0)
            .map(|entry| (entry.value().shard_id, entry.value().counts.ready))
            .collect();
        let usable_total = self.usable_bots();

        if ready.is_empty() {
            if usable_total == 0 && !self.latest_stats.is_empty() {
                // Nothing in the fleet could ever become ready: fail fast
                // instead of letting entries ride to their deadline.
                while let Some(job) = self.queue.next_dispatchable() {
                    if self
                        .queue
                        .complete(job.asset_id, job.dispatch_id, Err(InspectError::NoBotsReady))
                        .is_some()
                    {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            return;
        }

        while let Some(job) = self.queue.next_dispatchable() {
            if ready.is_empty() {
                self.queue.release(job.asset_id, job.dispatch_id);
                return;
            }
            let total: usize = ready.iter().map(|(_, count)| count).sum();
            let mut pick = rand::thread_rng().gen_range(0..total);
            let mut index = 0;
            for (i, (_, count)) in ready.iter().enumerate() {
                if pick < *count {
                    index = i;
                    break;
                }
                pick -= count;
            }
            let (shard_id, _) = ready[index];

            let head = if job.owner != 0 { job.owner } else { job.market_id };
            let sent = self
                .shards
                .iter()
                .find(|s| s.id == shard_id)
                .map(|s| {
                    s.commands
                        .send(ShardCommand::Inspect {
                            request_id: job.dispatch_id,
                            asset_id: job.asset_id,
                            owner: head,
                            proof: job.proof,
                        })
                        .is_ok()
                })
                .unwrap_or(false);

            if sent {
                ready[index].1 -= 1;
                if ready[index].1 == 0 {
                    ready.swap_remove(index);
                }
            } else {
                self.queue.release(job.asset_id, job.dispatch_id);
                return;
            }
        }
    }
}

impl std::fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerManager")
            .field("shards", &self.shards.len())
            .field("queue_len", &self.queue.len())
            .finish_non_exhaustive()
    }
}
