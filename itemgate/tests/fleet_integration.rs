//! Fleet-level integration tests: admission, dedup, dispatch boundaries.

use itemgate::config::Config;
use itemgate::error::InspectError;
use itemgate::fleet::WorkerManager;
use itemgate::queue::Priority;
use itemgate::transport::{GameTransport, SimulatedFactory, SimulatedTransport};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn test_config() -> Config {
    let mut config = Config::from_env().expect("default config");
    config.queue.max_size = 5;
    config.queue.timeout = Duration::from_millis(800);
    config.bot.inspect_timeout = Duration::from_millis(500);
    config.bot.cooldown = Duration::from_millis(25);
    config.bot.base_reconnect_delay = Duration::from_millis(10);
    config.bot.max_reconnect_delay = Duration::from_millis(40);
    config.shard.stats_update_interval = Duration::from_millis(25);
    config.shard.health_check_interval = Duration::from_millis(500);
    config
}

fn accounts(n: usize) -> Vec<itemgate::transport::Credentials> {
    (0..n)
        .map(|i| itemgate::transport::Credentials::new(format!("bot_{:02}", i), "pw"))
        .collect()
}

async fn wait_for_ready(fleet: &Arc<WorkerManager>, min_ready: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if fleet.stats().fleet.ready >= min_ready {
            return;
        }
        assert!(Instant::now() < deadline, "fleet never became ready");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_inspect_round_trip() {
    let config = test_config();
    let fleet = WorkerManager::spawn(accounts(2), Arc::new(SimulatedFactory::new()), &config);
    wait_for_ready(&fleet, 1).await;

    let record = fleet
        .inspect(76561198084749846, 6000, 7, 0, Priority::Normal)
        .await
        .unwrap();
    assert_eq!(record.asset_id, 6000);

    let stats = fleet.stats();
    assert_eq!(stats.counters.success, 1);
    assert_eq!(stats.counters.failed, 0);
    assert!(stats.response_times.all_time.count >= 1);
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_same_asset_coalesces_to_one_inspect() {
    let config = test_config();
    let transport = Arc::new(SimulatedTransport::new());
    transport.set_inspect_delay(Duration::from_millis(100));
    let shared = Arc::clone(&transport);
    let factory = move |_: &str| -> Arc<dyn GameTransport> { shared.clone() };

    let fleet = WorkerManager::spawn(accounts(1), Arc::new(factory), &config);
    wait_for_ready(&fleet, 1).await;

    let f1 = fleet.inspect(1, 4242, 2, 0, Priority::Normal);
    let f2 = fleet.inspect(1, 4242, 2, 0, Priority::Normal);
    let (r1, r2) = tokio::join!(f1, f2);

    assert_eq!(r1.unwrap().asset_id, 4242);
    assert_eq!(r2.unwrap().asset_id, 4242);
    assert_eq!(transport.inspect_calls(), 1, "second caller must coalesce");
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_queue_capacity_boundary() {
    let config = test_config();
    // One bot with slow inspects keeps entries resident.
    let factory = SimulatedFactory::new().with_inspect_delay(Duration::from_millis(400));
    let fleet = WorkerManager::spawn(accounts(1), Arc::new(factory), &config);
    wait_for_ready(&fleet, 1).await;

    // Fill to capacity with distinct assets; every admission succeeds.
    let mut waiters = Vec::new();
    for asset_id in 1..=5u64 {
        let fleet = Arc::clone(&fleet);
        waiters.push(tokio::spawn(async move {
            fleet.inspect(1, asset_id, 2, 0, Priority::Normal).await
        }));
    }
    let deadline = Instant::now() + Duration::from_secs(2);
    while !fleet.queue_is_full() {
        assert!(Instant::now() < deadline, "queue never filled");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Capacity + 1 is rejected, not blocked.
    let err = fleet
        .inspect(1, 999, 2, 0, Priority::Normal)
        .await
        .unwrap_err();
    assert_eq!(err, InspectError::QueueFull);

    for waiter in waiters {
        let _ = waiter.await;
    }
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_zero_usable_bots_fails_fast() {
    let config = test_config();
    // Every login permanently fails: the fleet has nothing usable.
    let factory = move |_: &str| -> Arc<dyn GameTransport> {
        let transport = SimulatedTransport::new();
        transport.set_login_default(Err(
            itemgate::transport::TransportError::AccountDisabled,
        ));
        Arc::new(transport)
    };
    let fleet = WorkerManager::spawn(accounts(2), Arc::new(factory), &config);
    // Let the shard finish (failing) initialization and report stats.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = Instant::now();
    let err = fleet
        .inspect(1, 6000, 7, 0, Priority::Normal)
        .await
        .unwrap_err();
    assert_eq!(err, InspectError::NoBotsReady);
    assert!(
        started.elapsed() < Duration::from_millis(700),
        "NoBotsReady must fail fast, not ride the deadline"
    );
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_all_bots_cooling_times_out_at_deadline() {
    let mut config = test_config();
    config.bot.cooldown = Duration::from_secs(30);
    config.queue.timeout = Duration::from_millis(400);
    let fleet = WorkerManager::spawn(accounts(1), Arc::new(SimulatedFactory::new()), &config);
    wait_for_ready(&fleet, 1).await;

    // First request succeeds and puts the only bot into a long cooldown.
    fleet
        .inspect(1, 1, 2, 0, Priority::Normal)
        .await
        .unwrap();

    // Second request has no ready bot, but the bot is cooling (usable):
    // the entry waits out its deadline and times out.
    let started = Instant::now();
    let err = fleet
        .inspect(1, 2, 2, 0, Priority::Normal)
        .await
        .unwrap_err();
    assert_eq!(err, InspectError::InspectTimeout);
    assert!(started.elapsed() >= Duration::from_millis(300));

    let stats = fleet.stats();
    assert_eq!(stats.counters.timeouts, 1);
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_transient_failure_retries_then_succeeds() {
    let config = test_config();
    let transport = Arc::new(SimulatedTransport::new());
    let shared = Arc::clone(&transport);
    let factory = move |_: &str| -> Arc<dyn GameTransport> { shared.clone() };
    let fleet = WorkerManager::spawn(accounts(1), Arc::new(factory), &config);
    wait_for_ready(&fleet, 1).await;

    // First attempt drops the transport; the bot reconnects (short backoff)
    // and the retry succeeds within the deadline.
    transport.script_inspect(
        5555,
        Err(itemgate::transport::TransportError::Timeout),
    );
    let handle = {
        let fleet = Arc::clone(&fleet);
        tokio::spawn(async move { fleet.inspect(1, 5555, 2, 0, Priority::Normal).await })
    };
    // Allow the first dispatch to consume the scripted failure, then
    // restore normal behavior for the retry.
    tokio::time::sleep(Duration::from_millis(50)).await;
    transport.script_inspect(5555, Ok(SimulatedTransport::derive_record(5555)));

    let result = handle.await.unwrap();
    assert_eq!(result.unwrap().asset_id, 5555);

    let stats = fleet.stats();
    assert!(stats.counters.retried >= 1);
    assert_eq!(stats.counters.success_after_retry, 1);
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_stats_surface_shape() {
    let config = test_config();
    let fleet = WorkerManager::spawn(accounts(2), Arc::new(SimulatedFactory::new()), &config);
    wait_for_ready(&fleet, 2).await;

    fleet.increment_cached();
    let stats = fleet.stats();
    assert_eq!(stats.counters.cached, 1);
    assert_eq!(stats.fleet.total(), 2);
    assert_eq!(stats.shards.len(), 1);
    assert_eq!(stats.queue.capacity, 5);

    // The snapshot serializes for the /stats endpoint.
    let json = serde_json::to_value(&stats).unwrap();
    assert!(json.get("counters").is_some());
    assert!(json.get("response_times").is_some());
    fleet.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_releases_pending_requests() {
    let config = test_config();
    let factory = SimulatedFactory::new().with_inspect_delay(Duration::from_secs(10));
    let fleet = WorkerManager::spawn(accounts(1), Arc::new(factory), &config);
    wait_for_ready(&fleet, 1).await;

    let pending = {
        let fleet = Arc::clone(&fleet);
        tokio::spawn(async move { fleet.inspect(1, 7, 2, 0, Priority::Normal).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    fleet.shutdown().await;
    let outcome = pending.await.unwrap();
    assert!(matches!(
        outcome.unwrap_err(),
        InspectError::ShuttingDown | InspectError::InspectTimeout
    ));
}
