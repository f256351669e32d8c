//! The worker shard daemon.
//!
//! One shard logs in and owns up to `BOTS_PER_WORKER` bots, dispatches
//! inspect commands onto a uniformly random ready bot, and runs periodic
//! health and stats sweeps. The loop is single-threaded; individual
//! inspects run as spawned tasks so one slow bot never blocks the others.
//!
//! Account-level bookkeeping lives here and only here: login throttles
//! park an account for thirty minutes, disabled accounts leave the
//! partition, and failed logins are retried by the health sweep once
//! their cooldown elapses.

use super::stats::ShardStats;
use super::{ShardCommand, ShardEvent};
use crate::bot::{Bot, BotEvent};
use crate::config::{BotSettings, ShardSettings, ACCOUNT_COOLDOWN_MS};
use crate::error::InspectError;
use crate::transport::{Credentials, LoginContext, TransportError, TransportFactory};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause between login retries during initialization.
const LOGIN_RETRY_DELAY: Duration = Duration::from_millis(250);

enum InitOutcome {
    /// Logged in; bot is in the table and selectable.
    Ready(Arc<Bot>),
    /// Permanent failure other than a disabled account; the bot stays in
    /// the table, terminally failed, so stats show why.
    Failed(Arc<Bot>),
    /// Account disabled; dropped from the partition.
    Disabled,
    /// Login throttled; parked until the account cooldown elapses.
    Throttled,
    /// Transient failures exhausted the retries; the health sweep will
    /// try again after the account cooldown.
    Exhausted,
}

/// A worker shard: owns its bots, serves inspect commands.
pub struct WorkerShard {
    id: usize,
    accounts: Vec<Credentials>,
    factory: Arc<dyn TransportFactory>,
    login_ctx: LoginContext,
    bot_settings: BotSettings,
    shard_settings: ShardSettings,
    max_retries: u32,
    account_cooldown: Duration,
    bots: HashMap<String, Arc<Bot>>,
    /// Accounts parked on a login throttle, with their release time.
    throttled: HashMap<String, Instant>,
    /// Accounts whose logins failed, with the last attempt time.
    failed: HashMap<String, Instant>,
    disabled: HashSet<String>,
    bot_events_tx: mpsc::UnboundedSender<BotEvent>,
    bot_events_rx: mpsc::UnboundedReceiver<BotEvent>,
    events: mpsc::UnboundedSender<ShardEvent>,
}

impl WorkerShard {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        accounts: Vec<Credentials>,
        factory: Arc<dyn TransportFactory>,
        login_ctx: LoginContext,
        bot_settings: BotSettings,
        shard_settings: ShardSettings,
        max_retries: u32,
        events: mpsc::UnboundedSender<ShardEvent>,
    ) -> Self {
        let (bot_events_tx, bot_events_rx) = mpsc::unbounded_channel();
        Self {
            id,
            accounts,
            factory,
            login_ctx,
            bot_settings,
            shard_settings,
            max_retries,
            account_cooldown: Duration::from_millis(ACCOUNT_COOLDOWN_MS),
            bots: HashMap::new(),
            throttled: HashMap::new(),
            failed: HashMap::new(),
            disabled: HashSet::new(),
            bot_events_tx,
            bot_events_rx,
            events,
        }
    }

    /// Overrides the 30-minute account cooldown; used by tests.
    pub fn with_account_cooldown(mut self, cooldown: Duration) -> Self {
        self.account_cooldown = cooldown;
        self
    }

    /// Runs the shard on a dedicated OS thread with its own
    /// single-threaded runtime.
    pub fn spawn_thread(
        self,
        commands: mpsc::UnboundedReceiver<ShardCommand>,
        shutdown: CancellationToken,
    ) -> std::thread::JoinHandle<()> {
        let name = format!("shard-{}", self.id);
        std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("shard runtime");
                rt.block_on(self.run(commands, shutdown));
            })
            .expect("spawn shard thread")
    }

    /// Runs the shard until shutdown is commanded or signalled.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ShardCommand>,
        shutdown: CancellationToken,
    ) {
        info!(
            shard_id = self.id,
            accounts = self.accounts.len(),
            "Worker shard starting"
        );
        self.initialize_bots().await;
        self.emit_stats();

        // First health sweep at half the interval, then at the interval.
        let mut health = tokio::time::interval_at(
            tokio::time::Instant::now() + self.shard_settings.health_check_interval / 2,
            self.shard_settings.health_check_interval,
        );
        health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut stats = tokio::time::interval(self.shard_settings.stats_update_interval);
        stats.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.shutdown_bots().await;
                    break;
                }

                cmd = commands.recv() => match cmd {
                    Some(ShardCommand::Shutdown) | None => {
                        self.shutdown_bots().await;
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                },

                Some(event) = self.bot_events_rx.recv() => {
                    self.handle_bot_event(event);
                }

                _ = health.tick() => {
                    self.health_check().await;
                }

                _ = stats.tick() => {
                    self.emit_stats();
                }
            }
        }

        let _ = self.events.send(ShardEvent::ShutdownComplete { shard_id: self.id });
        info!(shard_id = self.id, "Worker shard stopped");
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    async fn initialize_bots(&mut self) {
        let accounts = self.accounts.clone();
        let shard = &*self;
        let outcomes = futures::future::join_all(accounts.into_iter().map(|creds| {
            let username = creds.username.clone();
            async move { (username, shard.init_account(creds).await) }
        }))
        .await;

        for (username, outcome) in outcomes {
            self.apply_init_outcome(username, outcome);
        }
        info!(
            shard_id = self.id,
            bots = self.bots.len(),
            throttled = self.throttled.len(),
            failed = self.failed.len(),
            disabled = self.disabled.len(),
            "Shard initialization finished"
        );
    }

    async fn init_account(&self, creds: Credentials) -> InitOutcome {
        let transport = self.factory.create(&creds.username);
        let bot = Bot::new(
            creds,
            transport,
            self.login_ctx.clone(),
            self.bot_settings.clone(),
            self.bot_events_tx.clone(),
        );

        for attempt in 1..=self.max_retries {
            match bot.initialize().await {
                Ok(()) => {
                    bot.spawn_event_watcher();
                    return InitOutcome::Ready(bot);
                }
                Err(TransportError::AccountDisabled) => return InitOutcome::Disabled,
                Err(TransportError::LoginThrottled) => return InitOutcome::Throttled,
                Err(err) if err.is_permanent() => return InitOutcome::Failed(bot),
                Err(_) if attempt < self.max_retries => {
                    tokio::time::sleep(LOGIN_RETRY_DELAY).await;
                }
                Err(_) => {}
            }
        }
        InitOutcome::Exhausted
    }

    fn apply_init_outcome(&mut self, username: String, outcome: InitOutcome) {
        match outcome {
            InitOutcome::Ready(bot) => {
                self.bots.insert(username.clone(), bot);
                let _ = self.events.send(ShardEvent::BotInitialized {
                    shard_id: self.id,
                    username,
                });
            }
            InitOutcome::Failed(bot) => {
                self.bots.insert(username, bot);
            }
            InitOutcome::Disabled => {
                warn!(shard_id = self.id, %username, "Account disabled; dropping from partition");
                self.disabled.insert(username);
            }
            InitOutcome::Throttled => {
                info!(shard_id = self.id, %username, "Login throttled; parking account");
                self.throttled
                    .insert(username, Instant::now() + self.account_cooldown);
            }
            InitOutcome::Exhausted => {
                warn!(shard_id = self.id, %username, "Login retries exhausted");
                self.failed.insert(username, Instant::now());
            }
        }
    }

    // =========================================================================
    // Command handling
    // =========================================================================

    async fn handle_command(&mut self, cmd: ShardCommand) {
        match cmd {
            ShardCommand::Inspect {
                request_id,
                asset_id,
                owner,
                proof,
            } => self.dispatch_inspect(request_id, asset_id, owner, proof),
            ShardCommand::ReconnectBot { username } => {
                if let Some(bot) = self.bots.get(&username) {
                    bot.force_reconnect();
                }
            }
            ShardCommand::ReconnectAll => {
                for bot in self.bots.values() {
                    if !bot.is_permanently_failed() {
                        bot.force_reconnect();
                    }
                }
            }
            ShardCommand::HealthCheck => self.health_check().await,
            ShardCommand::GetStats => self.emit_stats(),
            // Handled in the run loop.
            ShardCommand::Shutdown => {}
        }
    }

    /// Picks a uniformly random ready bot and runs the inspect as a task.
    ///
    /// Random choice over the ready set spreads load without a fair-queue
    /// structure and stays correct as bots enter and leave the set
    /// mid-batch.
    fn dispatch_inspect(&mut self, request_id: u64, asset_id: u64, owner: u64, proof: u64) {
        let ready: Vec<Arc<Bot>> = self
            .bots
            .values()
            .filter(|bot| bot.is_ready())
            .cloned()
            .collect();

        let Some(bot) = ready.choose(&mut rand::thread_rng()).cloned() else {
            let _ = self.events.send(ShardEvent::InspectOutcome {
                shard_id: self.id,
                request_id,
                asset_id,
                username: None,
                result: Err(InspectError::NoBotsReady),
            });
            return;
        };

        let events = self.events.clone();
        let shard_id = self.id;
        let username = bot.username().to_string();
        tokio::spawn(async move {
            let result = bot.inspect(owner, asset_id, proof).await;
            let _ = events.send(ShardEvent::InspectOutcome {
                shard_id,
                request_id,
                asset_id,
                username: Some(username),
                result,
            });
        });
    }

    fn handle_bot_event(&mut self, event: BotEvent) {
        match event {
            BotEvent::StateChanged { username, kind } => {
                let _ = self.events.send(ShardEvent::BotStatusChange {
                    shard_id: self.id,
                    username,
                    kind,
                });
            }
            BotEvent::PermanentlyFailed { username, reason } => {
                warn!(shard_id = self.id, %username, %reason, "Bot permanently failed");
            }
            other => {
                debug!(shard_id = self.id, event = ?other, "Bot event");
            }
        }
    }

    // =========================================================================
    // Health and stats
    // =========================================================================

    /// Walks all bots and accounts:
    /// 1. Stranded bots (errored or disconnected, no reconnect pending)
    ///    get a reconnect scheduled.
    /// 2. Accounts without a bot whose cooldown elapsed get a fresh login.
    /// Ends with a stats snapshot.
    async fn health_check(&mut self) {
        let now = Instant::now();

        for bot in self.bots.values() {
            if (bot.is_error() || bot.is_disconnected())
                && !bot.is_permanently_failed()
                && !bot.reconnect_status().scheduled
                && !self.throttled.contains_key(bot.username())
            {
                debug!(shard_id = self.id, username = bot.username(), "Health: scheduling reconnect");
                bot.schedule_reconnect();
            }
        }

        let mut revivals: Vec<String> = Vec::new();
        self.failed.retain(|username, last_attempt| {
            if now.duration_since(*last_attempt) >= self.account_cooldown {
                revivals.push(username.clone());
                false
            } else {
                true
            }
        });
        self.throttled.retain(|username, until| {
            if now >= *until {
                revivals.push(username.clone());
                false
            } else {
                true
            }
        });

        for username in revivals {
            let Some(creds) = self
                .accounts
                .iter()
                .find(|c| c.username == username)
                .cloned()
            else {
                continue;
            };
            info!(shard_id = self.id, %username, "Health: retrying login");
            let outcome = self.init_account(creds).await;
            self.apply_init_outcome(username, outcome);
        }

        self.emit_stats();
    }

    fn emit_stats(&self) {
        let stats = ShardStats::collect(
            self.id,
            &self.bots,
            self.throttled.len(),
            self.failed.len(),
        );
        let _ = self.events.send(ShardEvent::Stats(stats));
    }

    /// Destroys every bot, best-effort: all destroy futures are joined and
    /// individual failures ignored.
    async fn shutdown_bots(&mut self) {
        info!(shard_id = self.id, bots = self.bots.len(), "Shard shutting down");
        let bots: Vec<Arc<Bot>> = self.bots.values().cloned().collect();
        futures::future::join_all(bots.iter().map(|bot| bot.destroy())).await;
        self.bots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::BotStateKind;
    use crate::transport::{GameTransport, SimulatedFactory, SimulatedTransport};
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn bot_settings() -> BotSettings {
        BotSettings {
            inspect_timeout: Duration::from_millis(500),
            cooldown: Duration::from_millis(30),
            max_reconnect_attempts: 3,
            base_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(40),
        }
    }

    fn shard_settings() -> ShardSettings {
        ShardSettings {
            health_check_interval: Duration::from_millis(200),
            stats_update_interval: Duration::from_millis(50),
        }
    }

    fn login_ctx() -> LoginContext {
        LoginContext {
            session_dir: PathBuf::from("./sessions"),
            proxy_url: None,
        }
    }

    fn accounts(n: usize) -> Vec<Credentials> {
        (0..n)
            .map(|i| Credentials::new(format!("bot_{:02}", i), "pw"))
            .collect()
    }

    struct Harness {
        commands: mpsc::UnboundedSender<ShardCommand>,
        events: mpsc::UnboundedReceiver<ShardEvent>,
        shutdown: CancellationToken,
    }

    fn spawn_shard(accounts: Vec<Credentials>, factory: Arc<dyn TransportFactory>) -> Harness {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let shard = WorkerShard::new(
            0,
            accounts,
            factory,
            login_ctx(),
            bot_settings(),
            shard_settings(),
            3,
            events_tx,
        )
        .with_account_cooldown(Duration::from_millis(100));
        tokio::spawn(shard.run(cmd_rx, shutdown.clone()));
        Harness {
            commands: cmd_tx,
            events: events_rx,
            shutdown,
        }
    }

    async fn wait_for<F>(events: &mut mpsc::UnboundedReceiver<ShardEvent>, mut pred: F) -> ShardEvent
    where
        F: FnMut(&ShardEvent) -> bool,
    {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for shard event")
                .expect("shard event channel closed");
            if pred(&event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_initializes_all_bots() {
        let mut harness = spawn_shard(accounts(3), Arc::new(SimulatedFactory::new()));
        let mut initialized = 0;
        while initialized < 3 {
            if let ShardEvent::BotInitialized { .. } =
                wait_for(&mut harness.events, |e| {
                    matches!(e, ShardEvent::BotInitialized { .. } | ShardEvent::Stats(_))
                })
                .await
            {
                initialized += 1;
            }
        }
        harness.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_inspect_dispatches_to_ready_bot() {
        let mut harness = spawn_shard(accounts(2), Arc::new(SimulatedFactory::new()));
        wait_for(&mut harness.events, |e| {
            matches!(e, ShardEvent::BotInitialized { .. })
        })
        .await;

        harness
            .commands
            .send(ShardCommand::Inspect {
                request_id: 7,
                asset_id: 6000,
                owner: 1,
                proof: 2,
            })
            .unwrap();

        let event = wait_for(&mut harness.events, |e| {
            matches!(e, ShardEvent::InspectOutcome { .. })
        })
        .await;
        match event {
            ShardEvent::InspectOutcome {
                request_id,
                asset_id,
                username,
                result,
                ..
            } => {
                assert_eq!(request_id, 7);
                assert_eq!(asset_id, 6000);
                assert!(username.is_some());
                assert_eq!(result.unwrap().asset_id, 6000);
            }
            _ => unreachable!(),
        }
        harness.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_inspect_with_no_bots_fails_fast() {
        let mut harness = spawn_shard(Vec::new(), Arc::new(SimulatedFactory::new()));
        harness
            .commands
            .send(ShardCommand::Inspect {
                request_id: 1,
                asset_id: 5,
                owner: 1,
                proof: 2,
            })
            .unwrap();

        let event = wait_for(&mut harness.events, |e| {
            matches!(e, ShardEvent::InspectOutcome { .. })
        })
        .await;
        match event {
            ShardEvent::InspectOutcome { username, result, .. } => {
                assert!(username.is_none());
                assert_eq!(result.unwrap_err(), InspectError::NoBotsReady);
            }
            _ => unreachable!(),
        }
        harness.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_disabled_account_dropped_throttled_parked() {
        // bot_00 is disabled, bot_01 throttled, bot_02 healthy.
        let factory = move |username: &str| -> Arc<dyn GameTransport> {
            let transport = SimulatedTransport::new();
            match username {
                "bot_00" => transport.set_login_default(Err(TransportError::AccountDisabled)),
                "bot_01" => transport.set_login_default(Err(TransportError::LoginThrottled)),
                _ => {}
            }
            Arc::new(transport)
        };
        let mut harness = spawn_shard(accounts(3), Arc::new(factory));

        let event = wait_for(&mut harness.events, |e| matches!(e, ShardEvent::Stats(_))).await;
        match event {
            ShardEvent::Stats(stats) => {
                assert_eq!(stats.counts.ready, 1);
                assert_eq!(stats.throttled_accounts, 1);
                assert_eq!(stats.counts.total(), 1);
            }
            _ => unreachable!(),
        }
        harness.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_health_check_revives_throttled_account() {
        let attempts = Arc::new(Mutex::new(0u32));
        let attempts_clone = Arc::clone(&attempts);
        // Throttled on the first login, fine afterwards.
        let factory = move |_username: &str| -> Arc<dyn GameTransport> {
            let transport = SimulatedTransport::new();
            let mut n = attempts_clone.lock().unwrap();
            if *n == 0 {
                transport.script_login(Err(TransportError::LoginThrottled));
            }
            *n += 1;
            Arc::new(transport)
        };
        let mut harness = spawn_shard(accounts(1), Arc::new(factory));

        wait_for(&mut harness.events, |e| {
            matches!(e, ShardEvent::BotInitialized { .. })
        })
        .await;
        harness.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_command_completes() {
        let mut harness = spawn_shard(accounts(2), Arc::new(SimulatedFactory::new()));
        wait_for(&mut harness.events, |e| {
            matches!(e, ShardEvent::BotInitialized { .. })
        })
        .await;

        harness.commands.send(ShardCommand::Shutdown).unwrap();
        wait_for(&mut harness.events, |e| {
            matches!(e, ShardEvent::ShutdownComplete { .. })
        })
        .await;
    }

    #[tokio::test]
    async fn test_stats_stream_reports_cooldown_after_inspect() {
        let mut harness = spawn_shard(accounts(1), Arc::new(SimulatedFactory::new()));
        wait_for(&mut harness.events, |e| {
            matches!(e, ShardEvent::BotInitialized { .. })
        })
        .await;

        harness
            .commands
            .send(ShardCommand::Inspect {
                request_id: 1,
                asset_id: 99,
                owner: 1,
                proof: 2,
            })
            .unwrap();
        wait_for(&mut harness.events, |e| {
            matches!(e, ShardEvent::InspectOutcome { .. })
        })
        .await;

        let event = wait_for(&mut harness.events, |e| {
            matches!(e, ShardEvent::Stats(s) if s.counts.cooldown == 1 || s.counts.ready == 1)
        })
        .await;
        match event {
            ShardEvent::Stats(stats) => {
                assert_eq!(stats.counts.total(), 1);
                assert_eq!(stats.bots.len(), 1);
                assert_eq!(stats.bots[0].counters.inspect_count, 1);
            }
            _ => unreachable!(),
        }
        harness.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_bot_status_changes_forwarded() {
        let mut harness = spawn_shard(accounts(1), Arc::new(SimulatedFactory::new()));
        let event = wait_for(&mut harness.events, |e| {
            matches!(
                e,
                ShardEvent::BotStatusChange {
                    kind: BotStateKind::Ready,
                    ..
                }
            )
        })
        .await;
        match event {
            ShardEvent::BotStatusChange { username, .. } => assert_eq!(username, "bot_00"),
            _ => unreachable!(),
        }
        harness.shutdown.cancel();
    }
}
