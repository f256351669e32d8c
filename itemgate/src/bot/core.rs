//! The bot: one logged-in account driving the game transport.
//!
//! A bot serializes its own work: it is never handed a second inspect while
//! `Busy`, and after every result it rests in `Cooldown` to stay below
//! game-side rate limits. Unexpected drops enter the reconnect loop with
//! exponential backoff; permanent account errors park the bot forever.
//!
//! All transitions are made under the state lock and mirrored to the owning
//! shard as [`BotEvent`]s on an unbounded channel, so emitting never blocks
//! a transition.

use super::events::BotEvent;
use super::reconnect::reconnect_delay;
use super::state::{BotCounters, BotState, BotStateKind, ReconnectStatus};
use crate::config::BotSettings;
use crate::error::InspectError;
use crate::transport::{
    Credentials, GameTransport, ItemRecord, LoginContext, TransportError, TransportEvent,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Inner {
    state: BotState,
    reconnect_attempts: u32,
    reconnect_scheduled: bool,
    permanently_failed: bool,
    last_error: Option<String>,
}

/// One logged-in game account.
pub struct Bot {
    username: String,
    credentials: Credentials,
    login_ctx: LoginContext,
    settings: BotSettings,
    transport: Arc<dyn GameTransport>,
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<BotEvent>,
    shutdown: CancellationToken,
    inspect_count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    last_inspect: Mutex<Option<Instant>>,
}

impl Bot {
    /// Creates a bot around a transport. The bot starts `Initializing`;
    /// call [`initialize`](Self::initialize) to log it in.
    pub fn new(
        credentials: Credentials,
        transport: Arc<dyn GameTransport>,
        login_ctx: LoginContext,
        settings: BotSettings,
        events: mpsc::UnboundedSender<BotEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            username: credentials.username.clone(),
            credentials,
            login_ctx,
            settings,
            transport,
            inner: Mutex::new(Inner {
                state: BotState::Initializing,
                reconnect_attempts: 0,
                reconnect_scheduled: false,
                permanently_failed: false,
                last_error: None,
            }),
            events,
            shutdown: CancellationToken::new(),
            inspect_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            last_inspect: Mutex::new(None),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    // =========================================================================
    // State queries
    // =========================================================================

    /// Current state discriminant. Promotes an elapsed cooldown first, so a
    /// rested bot reads as `Ready` without waiting for a timer tick.
    pub fn state_kind(&self) -> BotStateKind {
        let mut inner = self.inner.lock().unwrap();
        self.promote_cooldown_locked(&mut inner);
        inner.state.kind()
    }

    pub fn is_ready(&self) -> bool {
        self.state_kind() == BotStateKind::Ready
    }

    pub fn is_busy(&self) -> bool {
        self.state_kind() == BotStateKind::Busy
    }

    pub fn is_cooldown(&self) -> bool {
        self.state_kind() == BotStateKind::Cooldown
    }

    pub fn is_disconnected(&self) -> bool {
        self.state_kind() == BotStateKind::Disconnected
    }

    pub fn is_error(&self) -> bool {
        self.state_kind() == BotStateKind::Error
    }

    pub fn is_permanently_failed(&self) -> bool {
        self.inner.lock().unwrap().permanently_failed
    }

    /// How long the current inspect has been running, if any.
    pub fn busy_duration(&self) -> Option<Duration> {
        match self.inner.lock().unwrap().state {
            BotState::Busy { started_at, .. } => Some(started_at.elapsed()),
            _ => None,
        }
    }

    pub fn counters(&self) -> BotCounters {
        BotCounters {
            inspect_count: self.inspect_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            last_inspect_ms_ago: self
                .last_inspect
                .lock()
                .unwrap()
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    pub fn reconnect_status(&self) -> ReconnectStatus {
        let inner = self.inner.lock().unwrap();
        ReconnectStatus {
            attempts: inner.reconnect_attempts,
            scheduled: inner.reconnect_scheduled,
            can_reconnect: !inner.permanently_failed
                && inner.reconnect_attempts < self.settings.max_reconnect_attempts,
            permanently_failed: inner.permanently_failed,
            last_error: inner.last_error.clone(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Performs one login attempt.
    ///
    /// Retrying throttled or transient failures is the shard's decision;
    /// this method attempts exactly once. A permanent reason code moves the
    /// bot straight to `PermanentlyFailed`.
    pub async fn initialize(&self) -> Result<(), TransportError> {
        self.set_state(BotState::Initializing);
        match self.transport.login(&self.credentials, &self.login_ctx).await {
            Ok(()) => {
                {
                    let mut inner = self.inner.lock().unwrap();
                    inner.reconnect_attempts = 0;
                    inner.last_error = None;
                }
                self.set_state(BotState::Ready);
                info!(username = %self.username, "Bot logged in");
                Ok(())
            }
            Err(err) if err.is_permanent() => {
                self.fail_permanently(err.to_string());
                Err(err)
            }
            Err(err) => {
                {
                    let mut inner = self.inner.lock().unwrap();
                    inner.last_error = Some(err.to_string());
                }
                self.set_state(BotState::Error(err.clone()));
                warn!(username = %self.username, error = %err, "Bot login failed");
                Err(err)
            }
        }
    }

    /// Drives one inspect through the transport.
    ///
    /// The per-call deadline is `INSPECT_TIMEOUT`; on expiry the bot moves
    /// to cooldown and the caller receives [`InspectError::InspectTimeout`].
    /// A transport drop mid-call enters the reconnect loop.
    pub async fn inspect(
        self: &Arc<Self>,
        owner: u64,
        asset_id: u64,
        proof: u64,
    ) -> Result<ItemRecord, InspectError> {
        {
            let mut inner = self.inner.lock().unwrap();
            self.promote_cooldown_locked(&mut inner);
            if !matches!(inner.state, BotState::Ready) {
                return Err(InspectError::NoBotsReady);
            }
            inner.state = BotState::Busy {
                asset_id,
                started_at: Instant::now(),
            };
        }
        self.emit(BotEvent::StateChanged {
            username: self.username.clone(),
            kind: BotStateKind::Busy,
        });

        self.inspect_count.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        *self.last_inspect.lock().unwrap() = Some(started);

        let outcome = tokio::time::timeout(
            self.settings.inspect_timeout,
            self.transport.inspect(owner, asset_id, proof),
        )
        .await;

        let duration = started.elapsed();
        match outcome {
            Ok(Ok(record)) => {
                self.success_count.fetch_add(1, Ordering::Relaxed);
                self.enter_cooldown();
                self.emit(BotEvent::Inspected {
                    username: self.username.clone(),
                    asset_id,
                    success: true,
                    duration,
                });
                debug!(username = %self.username, asset_id, ?duration, "Inspect completed");
                Ok(record)
            }
            Ok(Err(err)) => {
                self.failure_count.fetch_add(1, Ordering::Relaxed);
                self.emit(BotEvent::Inspected {
                    username: self.username.clone(),
                    asset_id,
                    success: false,
                    duration,
                });
                match err {
                    TransportError::Disconnected => {
                        self.handle_transport_drop();
                        Err(InspectError::TransportDrop)
                    }
                    TransportError::Timeout => {
                        self.enter_cooldown();
                        Err(InspectError::InspectTimeout)
                    }
                    err if err.is_permanent() => {
                        self.fail_permanently(err.to_string());
                        Err(InspectError::Transport(err.to_string()))
                    }
                    err => {
                        self.enter_cooldown();
                        Err(InspectError::Transport(err.to_string()))
                    }
                }
            }
            Err(_elapsed) => {
                self.failure_count.fetch_add(1, Ordering::Relaxed);
                self.enter_cooldown();
                self.emit(BotEvent::Inspected {
                    username: self.username.clone(),
                    asset_id,
                    success: false,
                    duration,
                });
                warn!(username = %self.username, asset_id, "Inspect timed out");
                Err(InspectError::InspectTimeout)
            }
        }
    }

    /// Schedules a reconnect with backoff, if one is not already pending.
    ///
    /// Returns false when the bot is permanently failed, already
    /// reconnecting, or out of attempts.
    pub fn schedule_reconnect(self: &Arc<Self>) -> bool {
        self.spawn_reconnect(false)
    }

    /// Drops the session and reconnects immediately, resetting the attempt
    /// counter. Used by admin commands.
    pub fn force_reconnect(self: &Arc<Self>) {
        let bot = Arc::clone(self);
        tokio::spawn(async move {
            bot.transport.disconnect().await;
            {
                let mut inner = bot.inner.lock().unwrap();
                if inner.permanently_failed {
                    return;
                }
                inner.reconnect_attempts = 0;
            }
            bot.set_state(BotState::Disconnected);
            bot.emit(BotEvent::Disconnected {
                username: bot.username.clone(),
            });
            bot.spawn_reconnect(true);
        });
    }

    /// Tears the bot down: cancels background tasks and drops the session.
    /// Best-effort; a terminal state is preserved.
    pub async fn destroy(&self) {
        self.shutdown.cancel();
        self.transport.disconnect().await;
        let terminal = self.inner.lock().unwrap().permanently_failed;
        if !terminal {
            self.set_state(BotState::Disconnected);
        }
    }

    /// Watches the transport's out-of-band lifecycle events.
    pub fn spawn_event_watcher(self: &Arc<Self>) {
        let bot = Arc::clone(self);
        let mut rx = bot.transport.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = bot.shutdown.cancelled() => return,
                    event = rx.recv() => match event {
                        Ok(TransportEvent::Disconnected) => bot.handle_transport_drop(),
                        Ok(TransportEvent::Error(err)) if err.is_permanent() => {
                            bot.fail_permanently(err.to_string());
                        }
                        Ok(TransportEvent::Error(err)) => bot.handle_transport_error(err),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        });
    }

    // =========================================================================
    // Internal transitions
    // =========================================================================

    fn promote_cooldown_locked(&self, inner: &mut Inner) {
        if let BotState::Cooldown { until } = inner.state {
            if Instant::now() >= until {
                inner.state = BotState::Ready;
                self.emit(BotEvent::StateChanged {
                    username: self.username.clone(),
                    kind: BotStateKind::Ready,
                });
            }
        }
    }

    fn enter_cooldown(&self) {
        self.set_state(BotState::Cooldown {
            until: Instant::now() + self.settings.cooldown,
        });
    }

    fn set_state(&self, state: BotState) {
        let kind = state.kind();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.permanently_failed {
                return;
            }
            inner.state = state;
        }
        self.emit(BotEvent::StateChanged {
            username: self.username.clone(),
            kind,
        });
    }

    fn fail_permanently(&self, reason: String) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.permanently_failed {
                return;
            }
            inner.permanently_failed = true;
            inner.reconnect_scheduled = false;
            inner.last_error = Some(reason.clone());
            inner.state = BotState::PermanentlyFailed(reason.clone());
        }
        warn!(username = %self.username, %reason, "Bot permanently failed");
        self.emit(BotEvent::StateChanged {
            username: self.username.clone(),
            kind: BotStateKind::PermanentlyFailed,
        });
        self.emit(BotEvent::PermanentlyFailed {
            username: self.username.clone(),
            reason,
        });
    }

    fn handle_transport_drop(self: &Arc<Self>) {
        {
            let inner = self.inner.lock().unwrap();
            if inner.permanently_failed {
                return;
            }
        }
        self.set_state(BotState::Disconnected);
        self.emit(BotEvent::Disconnected {
            username: self.username.clone(),
        });
        self.spawn_reconnect(false);
    }

    fn handle_transport_error(self: &Arc<Self>, err: TransportError) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.permanently_failed {
                return;
            }
            inner.last_error = Some(err.to_string());
            // Only degrade an idle bot; an in-flight inspect observes its
            // own error through the call result.
            if !matches!(inner.state, BotState::Ready) {
                return;
            }
            inner.state = BotState::Error(err);
        }
        self.emit(BotEvent::StateChanged {
            username: self.username.clone(),
            kind: BotStateKind::Error,
        });
        self.spawn_reconnect(false);
    }

    fn spawn_reconnect(self: &Arc<Self>, immediate: bool) -> bool {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.permanently_failed || inner.reconnect_scheduled {
                return false;
            }
            if inner.reconnect_attempts >= self.settings.max_reconnect_attempts {
                drop(inner);
                self.emit(BotEvent::MaxReconnectAttemptsReached {
                    username: self.username.clone(),
                });
                self.fail_permanently("reconnect attempts exhausted".into());
                return false;
            }
            inner.reconnect_scheduled = true;
        }
        let bot = Arc::clone(self);
        tokio::spawn(async move { bot.run_reconnect(immediate).await });
        true
    }

    async fn run_reconnect(self: Arc<Self>, mut immediate: bool) {
        loop {
            let (attempt_idx, max_attempts) = {
                let inner = self.inner.lock().unwrap();
                (inner.reconnect_attempts, self.settings.max_reconnect_attempts)
            };
            if attempt_idx >= max_attempts {
                self.emit(BotEvent::MaxReconnectAttemptsReached {
                    username: self.username.clone(),
                });
                self.fail_permanently("reconnect attempts exhausted".into());
                return;
            }

            let delay = if immediate {
                Duration::ZERO
            } else {
                reconnect_delay(
                    attempt_idx,
                    self.settings.base_reconnect_delay,
                    self.settings.max_reconnect_delay,
                )
            };
            immediate = false;

            self.emit(BotEvent::ReconnectScheduled {
                username: self.username.clone(),
                attempt: attempt_idx + 1,
                max_attempts,
                delay,
            });
            info!(
                username = %self.username,
                attempt = attempt_idx + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnect scheduled"
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.inner.lock().unwrap().reconnect_scheduled = false;
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            self.emit(BotEvent::Reconnecting {
                username: self.username.clone(),
                attempt: attempt_idx + 1,
            });

            match self.transport.login(&self.credentials, &self.login_ctx).await {
                Ok(()) => {
                    {
                        let mut inner = self.inner.lock().unwrap();
                        inner.reconnect_attempts = 0;
                        inner.reconnect_scheduled = false;
                        inner.last_error = None;
                        inner.state = BotState::Ready;
                    }
                    self.emit(BotEvent::StateChanged {
                        username: self.username.clone(),
                        kind: BotStateKind::Ready,
                    });
                    self.emit(BotEvent::Reconnected {
                        username: self.username.clone(),
                    });
                    info!(username = %self.username, "Reconnected");
                    return;
                }
                Err(err) if err.is_permanent() => {
                    self.inner.lock().unwrap().reconnect_scheduled = false;
                    self.fail_permanently(err.to_string());
                    return;
                }
                Err(err) => {
                    let mut inner = self.inner.lock().unwrap();
                    inner.reconnect_attempts += 1;
                    inner.last_error = Some(err.to_string());
                }
            }
        }
    }

    fn emit(&self, event: BotEvent) {
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("username", &self.username)
            .field("state", &self.inner.lock().unwrap().state.kind())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimulatedTransport;
    use std::path::PathBuf;

    fn settings() -> BotSettings {
        BotSettings {
            inspect_timeout: Duration::from_millis(200),
            cooldown: Duration::from_millis(50),
            max_reconnect_attempts: 3,
            base_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(40),
        }
    }

    fn login_ctx() -> LoginContext {
        LoginContext {
            session_dir: PathBuf::from("./sessions"),
            proxy_url: None,
        }
    }

    fn make_bot(
        transport: Arc<SimulatedTransport>,
    ) -> (Arc<Bot>, mpsc::UnboundedReceiver<BotEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bot = Bot::new(
            Credentials::new("tester", "pw"),
            transport,
            login_ctx(),
            settings(),
            tx,
        );
        (bot, rx)
    }

    #[tokio::test]
    async fn test_initialize_reaches_ready() {
        let transport = Arc::new(SimulatedTransport::new());
        let (bot, _rx) = make_bot(transport);

        bot.initialize().await.unwrap();
        assert!(bot.is_ready());
    }

    #[tokio::test]
    async fn test_initialize_permanent_error_is_terminal() {
        let transport = Arc::new(SimulatedTransport::new());
        transport.set_login_default(Err(TransportError::AccountDisabled));
        let (bot, _rx) = make_bot(transport);

        assert!(bot.initialize().await.is_err());
        assert!(bot.is_permanently_failed());
        assert!(!bot.reconnect_status().can_reconnect);
    }

    #[tokio::test]
    async fn test_inspect_success_enters_cooldown_then_ready() {
        let transport = Arc::new(SimulatedTransport::new());
        let (bot, _rx) = make_bot(transport);
        bot.initialize().await.unwrap();

        let record = bot.inspect(1, 6000, 2).await.unwrap();
        assert_eq!(record.asset_id, 6000);
        assert!(bot.is_cooldown());

        let counters = bot.counters();
        assert_eq!(counters.inspect_count, 1);
        assert_eq!(counters.success_count, 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(bot.is_ready());
    }

    #[tokio::test]
    async fn test_inspect_while_cooling_is_rejected() {
        let transport = Arc::new(SimulatedTransport::new());
        let (bot, _rx) = make_bot(transport);
        bot.initialize().await.unwrap();

        bot.inspect(1, 1, 2).await.unwrap();
        let err = bot.inspect(1, 2, 2).await.unwrap_err();
        assert_eq!(err, InspectError::NoBotsReady);
    }

    #[tokio::test]
    async fn test_inspect_timeout_surfaces_and_cools() {
        let transport = Arc::new(SimulatedTransport::new());
        transport.set_inspect_delay(Duration::from_secs(5));
        let (bot, _rx) = make_bot(transport);
        bot.initialize().await.unwrap();

        let err = bot.inspect(1, 6000, 2).await.unwrap_err();
        assert_eq!(err, InspectError::InspectTimeout);
        assert!(bot.is_cooldown());
        assert_eq!(bot.counters().failure_count, 1);
    }

    #[tokio::test]
    async fn test_inspect_disconnect_schedules_reconnect() {
        let transport = Arc::new(SimulatedTransport::new());
        let (bot, mut rx) = make_bot(Arc::clone(&transport));
        bot.initialize().await.unwrap();

        transport.script_inspect(42, Err(TransportError::Disconnected));
        let err = bot.inspect(1, 42, 2).await.unwrap_err();
        assert_eq!(err, InspectError::TransportDrop);

        // Reconnect loop runs: scheduled -> reconnecting -> reconnected.
        let mut saw_scheduled = false;
        let mut saw_reconnected = false;
        while let Ok(event) =
            tokio::time::timeout(Duration::from_millis(500), rx.recv()).await
        {
            match event.unwrap() {
                BotEvent::ReconnectScheduled { .. } => saw_scheduled = true,
                BotEvent::Reconnected { .. } => {
                    saw_reconnected = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_scheduled);
        assert!(saw_reconnected);
        assert!(bot.is_ready());
        assert_eq!(bot.reconnect_status().attempts, 0);
    }

    #[tokio::test]
    async fn test_reconnect_exhaustion_fails_permanently() {
        let transport = Arc::new(SimulatedTransport::new());
        let (bot, mut rx) = make_bot(Arc::clone(&transport));
        bot.initialize().await.unwrap();

        // Every future login fails with a recoverable error.
        transport.set_login_default(Err(TransportError::Disconnected));
        bot.spawn_event_watcher();
        tokio::task::yield_now().await;
        transport.emit_disconnected();

        let mut saw_max_reached = false;
        while let Ok(event) =
            tokio::time::timeout(Duration::from_secs(2), rx.recv()).await
        {
            if let Some(BotEvent::MaxReconnectAttemptsReached { .. }) = event {
                saw_max_reached = true;
                break;
            }
        }
        assert!(saw_max_reached);
        assert!(bot.is_permanently_failed());
    }

    #[tokio::test]
    async fn test_destroy_is_best_effort() {
        let transport = Arc::new(SimulatedTransport::new());
        let (bot, _rx) = make_bot(transport);
        bot.initialize().await.unwrap();

        bot.destroy().await;
        assert!(bot.is_disconnected());
    }

    #[tokio::test]
    async fn test_destroy_preserves_terminal_state() {
        let transport = Arc::new(SimulatedTransport::new());
        transport.set_login_default(Err(TransportError::InvalidPassword));
        let (bot, _rx) = make_bot(transport);
        let _ = bot.initialize().await;

        bot.destroy().await;
        assert!(bot.is_permanently_failed());
    }

    #[tokio::test]
    async fn test_exactly_one_state_holds() {
        let transport = Arc::new(SimulatedTransport::new());
        let (bot, _rx) = make_bot(transport);
        bot.initialize().await.unwrap();

        let predicates = [
            bot.is_ready(),
            bot.is_busy(),
            bot.is_cooldown(),
            bot.is_disconnected(),
            bot.is_error(),
            bot.is_permanently_failed(),
        ];
        assert_eq!(predicates.iter().filter(|p| **p).count(), 1);
    }
}
