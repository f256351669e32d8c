//! Admission queue: bounded, per-asset, coalescing.
//!
//! Every in-flight inspect request lives here from admission to resolution.
//! The queue is keyed by asset id; a second submission for an asset already
//! resident does not create a duplicate - the new caller subscribes to the
//! existing entry's result broadcast and exactly one physical inspect runs.
//!
//! ```text
//! Caller A ─┐
//!           ├──► add(asset) ──► one entry ──► one dispatch ──► one bot
//! Caller B ─┘                      │
//!                                  ▼
//!                   [A and B both receive the broadcast result]
//! ```
//!
//! Capacity is the gateway's only admission control: at `MAX_QUEUE_SIZE`
//! the next add is rejected rather than blocked. Entries carry a deadline;
//! the manager's sweep expires them, releasing every attached caller with
//! a timeout. A result arriving for an expired entry is dropped.

use crate::error::InspectError;
use crate::transport::ItemRecord;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Result delivered to every caller attached to an entry.
pub type InspectOutcome = Result<Arc<ItemRecord>, InspectError>;

/// Broadcast capacity per entry; one outcome is ever sent.
const RESULT_CHANNEL_CAPACITY: usize = 4;

/// Request priority. `High > Normal > Low`; ties break by admission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Outcome of an admission attempt.
pub enum Admission {
    /// New entry created; a dispatch is owed.
    Admitted(broadcast::Receiver<InspectOutcome>),
    /// Attached to an existing in-flight entry.
    Coalesced(broadcast::Receiver<InspectOutcome>),
    /// The queue is at capacity.
    Full,
}

impl Admission {
    /// The receiver, unless the queue was full.
    pub fn into_receiver(self) -> Option<broadcast::Receiver<InspectOutcome>> {
        match self {
            Self::Admitted(rx) | Self::Coalesced(rx) => Some(rx),
            Self::Full => None,
        }
    }

    pub fn is_coalesced(&self) -> bool {
        matches!(self, Self::Coalesced(_))
    }
}

/// Dispatch payload for one queued request.
///
/// `dispatch_id` identifies this dispatch generation: a late result from a
/// dispatch that was since expired or requeued no longer matches and is
/// dropped.
#[derive(Debug, Clone, Copy)]
pub struct InspectJob {
    pub asset_id: u64,
    pub owner: u64,
    pub proof: u64,
    pub market_id: u64,
    pub priority: Priority,
    pub retry_count: u32,
    pub dispatch_id: u64,
}

#[derive(Debug)]
struct Entry {
    owner: u64,
    proof: u64,
    market_id: u64,
    priority: Priority,
    enqueued_at: Instant,
    deadline: Instant,
    retry_count: u32,
    dispatch: Option<u64>,
    tx: broadcast::Sender<InspectOutcome>,
}

/// One row of [`QueueMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntryInfo {
    pub asset_id: u64,
    pub priority: Priority,
    pub age_ms: u64,
    pub retry_count: u32,
    pub dispatched: bool,
}

/// Point-in-time queue contents for the stats surface.
#[derive(Debug, Clone, Serialize)]
pub struct QueueMetrics {
    pub size: usize,
    pub capacity: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub entries: Vec<QueueEntryInfo>,
}

/// The bounded, coalescing admission queue.
pub struct AdmissionQueue {
    entries: Mutex<HashMap<u64, Entry>>,
    max_size: usize,
    timeout: Duration,
    dispatch_seq: std::sync::atomic::AtomicU64,
}

impl AdmissionQueue {
    pub fn new(max_size: usize, timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size,
            timeout,
            dispatch_seq: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Admits a request, coalescing onto an existing entry for the same
    /// asset when one is resident.
    pub fn add(
        &self,
        asset_id: u64,
        owner: u64,
        proof: u64,
        market_id: u64,
        priority: Priority,
    ) -> Admission {
        let mut entries = self.entries.lock().unwrap();

        if let Some(entry) = entries.get(&asset_id) {
            return Admission::Coalesced(entry.tx.subscribe());
        }
        if entries.len() >= self.max_size {
            return Admission::Full;
        }

        let (tx, rx) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        let now = Instant::now();
        entries.insert(
            asset_id,
            Entry {
                owner,
                proof,
                market_id,
                priority,
                enqueued_at: now,
                deadline: now + self.timeout,
                retry_count: 0,
                dispatch: None,
                tx,
            },
        );
        Admission::Admitted(rx)
    }

    /// Picks the next entry owed a dispatch: highest priority first, then
    /// oldest. Marks it dispatched; it stays resident for coalescing and
    /// deadline tracking until completed or expired.
    pub fn next_dispatchable(&self) -> Option<InspectJob> {
        let mut entries = self.entries.lock().unwrap();
        let asset_id = entries
            .iter()
            .filter(|(_, e)| e.dispatch.is_none())
            .max_by_key(|(_, e)| (e.priority, std::cmp::Reverse(e.enqueued_at)))
            .map(|(id, _)| *id)?;

        let dispatch_id = self
            .dispatch_seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let entry = entries.get_mut(&asset_id).expect("entry just selected");
        entry.dispatch = Some(dispatch_id);
        Some(InspectJob {
            asset_id,
            owner: entry.owner,
            proof: entry.proof,
            market_id: entry.market_id,
            priority: entry.priority,
            retry_count: entry.retry_count,
            dispatch_id,
        })
    }

    /// Resolves an entry, broadcasting to every attached caller.
    ///
    /// The result is only accepted when `dispatch_id` matches the entry's
    /// current dispatch generation; a late result from an expired or
    /// requeued dispatch returns `None` and is dropped.
    pub fn complete(
        &self,
        asset_id: u64,
        dispatch_id: u64,
        outcome: InspectOutcome,
    ) -> Option<CompletedEntry> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&asset_id) {
            Some(entry) if entry.dispatch == Some(dispatch_id) => {}
            _ => return None,
        }
        let entry = entries.remove(&asset_id).expect("entry just matched");
        let _ = entry.tx.send(outcome);
        Some(CompletedEntry {
            enqueued_at: entry.enqueued_at,
            retry_count: entry.retry_count,
        })
    }

    /// Returns an entry to the dispatchable pool after a transient failure,
    /// incrementing its retry counter. Fails when the dispatch generation
    /// is stale, the entry expired, or its deadline has passed.
    pub fn requeue(&self, asset_id: u64, dispatch_id: u64) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&asset_id) {
            Some(entry)
                if entry.dispatch == Some(dispatch_id) && Instant::now() < entry.deadline =>
            {
                entry.dispatch = None;
                entry.retry_count += 1;
                true
            }
            _ => false,
        }
    }

    /// Returns an entry to the dispatchable pool without charging a retry;
    /// used when a dispatch was popped but never reached a bot.
    pub fn release(&self, asset_id: u64, dispatch_id: u64) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&asset_id) {
            Some(entry) if entry.dispatch == Some(dispatch_id) => {
                entry.dispatch = None;
                true
            }
            _ => false,
        }
    }

    /// Retry count for a resident entry.
    pub fn retry_count(&self, asset_id: u64) -> Option<u32> {
        self.entries
            .lock()
            .unwrap()
            .get(&asset_id)
            .map(|e| e.retry_count)
    }

    /// Removes an entry outright. Attached callers observe the closed
    /// result channel. Returns false when no entry was resident.
    pub fn remove(&self, asset_id: u64) -> bool {
        self.entries.lock().unwrap().remove(&asset_id).is_some()
    }

    /// Expires every entry past its deadline, releasing attached callers
    /// with [`InspectError::InspectTimeout`]. Returns the expired asset ids.
    pub fn expire_due(&self) -> Vec<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let expired: Vec<u64> = entries
            .iter()
            .filter(|(_, e)| now >= e.deadline)
            .map(|(id, _)| *id)
            .collect();
        for asset_id in &expired {
            if let Some(entry) = entries.remove(asset_id) {
                let _ = entry.tx.send(Err(InspectError::InspectTimeout));
            }
        }
        expired
    }

    /// Fails every resident entry; used at shutdown.
    pub fn fail_all(&self, err: InspectError) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let count = entries.len();
        for (_, entry) in entries.drain() {
            let _ = entry.tx.send(Err(err.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_size
    }

    pub fn metrics(&self) -> QueueMetrics {
        let entries = self.entries.lock().unwrap();
        let mut rows: Vec<QueueEntryInfo> = entries
            .iter()
            .map(|(id, e)| QueueEntryInfo {
                asset_id: *id,
                priority: e.priority,
                age_ms: e.enqueued_at.elapsed().as_millis() as u64,
                retry_count: e.retry_count,
                dispatched: e.dispatch.is_some(),
            })
            .collect();
        rows.sort_by_key(|r| (std::cmp::Reverse(r.priority), std::cmp::Reverse(r.age_ms)));
        QueueMetrics {
            size: rows.len(),
            capacity: self.max_size,
            high: rows.iter().filter(|r| r.priority == Priority::High).count(),
            normal: rows
                .iter()
                .filter(|r| r.priority == Priority::Normal)
                .count(),
            low: rows.iter().filter(|r| r.priority == Priority::Low).count(),
            entries: rows,
        }
    }
}

/// Timing details of a completed entry, for response-time metrics.
#[derive(Debug, Clone, Copy)]
pub struct CompletedEntry {
    pub enqueued_at: Instant,
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(max: usize) -> AdmissionQueue {
        AdmissionQueue::new(max, Duration::from_secs(10))
    }

    #[test]
    fn test_add_then_coalesce() {
        let q = queue(10);
        assert!(matches!(
            q.add(1, 10, 20, 0, Priority::Normal),
            Admission::Admitted(_)
        ));
        let second = q.add(1, 10, 20, 0, Priority::Normal);
        assert!(second.is_coalesced());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_capacity_boundary() {
        let q = queue(3);
        for asset_id in 1..=3 {
            assert!(matches!(
                q.add(asset_id, 1, 1, 0, Priority::Normal),
                Admission::Admitted(_)
            ));
        }
        assert!(q.is_full());
        assert!(matches!(q.add(4, 1, 1, 0, Priority::Normal), Admission::Full));
        // Coalescing is still possible at capacity.
        assert!(q.add(2, 1, 1, 0, Priority::Normal).is_coalesced());
    }

    #[test]
    fn test_priority_ordering_with_fifo_ties() {
        let q = queue(10);
        q.add(1, 1, 1, 0, Priority::Low);
        q.add(2, 1, 1, 0, Priority::Normal);
        q.add(3, 1, 1, 0, Priority::High);
        q.add(4, 1, 1, 0, Priority::Normal);

        let order: Vec<u64> = std::iter::from_fn(|| q.next_dispatchable())
            .map(|job| job.asset_id)
            .collect();
        assert_eq!(order, vec![3, 2, 4, 1]);
    }

    #[test]
    fn test_dispatched_entry_not_picked_again() {
        let q = queue(10);
        q.add(1, 1, 1, 0, Priority::Normal);
        assert!(q.next_dispatchable().is_some());
        assert!(q.next_dispatchable().is_none());
        // Still resident for coalescing.
        assert!(q.add(1, 1, 1, 0, Priority::Normal).is_coalesced());
    }

    #[tokio::test]
    async fn test_complete_broadcasts_to_all_waiters() {
        let q = queue(10);
        let mut rx1 = q
            .add(1, 1, 1, 0, Priority::Normal)
            .into_receiver()
            .unwrap();
        let mut rx2 = q
            .add(1, 1, 1, 0, Priority::Normal)
            .into_receiver()
            .unwrap();
        let job = q.next_dispatchable().unwrap();

        let record = Arc::new(ItemRecord::new(1));
        assert!(q
            .complete(1, job.dispatch_id, Ok(Arc::clone(&record)))
            .is_some());

        assert_eq!(rx1.recv().await.unwrap().unwrap().asset_id, 1);
        assert_eq!(rx2.recv().await.unwrap().unwrap().asset_id, 1);
        assert!(q.is_empty());
    }

    #[test]
    fn test_complete_after_expiry_is_dropped() {
        let q = AdmissionQueue::new(10, Duration::ZERO);
        q.add(1, 1, 1, 0, Priority::Normal);
        let job = q.next_dispatchable().unwrap();
        assert_eq!(q.expire_due(), vec![1]);
        assert!(q
            .complete(1, job.dispatch_id, Err(InspectError::NoBotsReady))
            .is_none());
    }

    #[test]
    fn test_stale_dispatch_generation_is_dropped() {
        let q = queue(10);
        q.add(1, 1, 1, 0, Priority::Normal);
        let first = q.next_dispatchable().unwrap();
        assert!(q.requeue(1, first.dispatch_id));
        let second = q.next_dispatchable().unwrap();

        // The first dispatch's late result no longer matches.
        assert!(q
            .complete(1, first.dispatch_id, Ok(Arc::new(ItemRecord::new(1))))
            .is_none());
        // The current generation does.
        assert!(q
            .complete(1, second.dispatch_id, Ok(Arc::new(ItemRecord::new(1))))
            .is_some());
    }

    #[tokio::test]
    async fn test_expiry_releases_waiters_with_timeout() {
        let q = AdmissionQueue::new(10, Duration::from_millis(10));
        let mut rx = q
            .add(1, 1, 1, 0, Priority::Normal)
            .into_receiver()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(q.expire_due().len(), 1);
        assert_eq!(
            rx.recv().await.unwrap().unwrap_err(),
            InspectError::InspectTimeout
        );
    }

    #[test]
    fn test_requeue_increments_retry_count() {
        let q = queue(10);
        q.add(1, 1, 1, 0, Priority::Normal);
        let job = q.next_dispatchable().unwrap();
        assert_eq!(job.retry_count, 0);

        assert!(q.requeue(1, job.dispatch_id));
        let job = q.next_dispatchable().unwrap();
        assert_eq!(job.retry_count, 1);
    }

    #[test]
    fn test_requeue_after_deadline_fails() {
        let q = AdmissionQueue::new(10, Duration::ZERO);
        q.add(1, 1, 1, 0, Priority::Normal);
        let job = q.next_dispatchable().unwrap();
        assert!(!q.requeue(1, job.dispatch_id));
    }

    #[tokio::test]
    async fn test_remove_closes_result_channel() {
        let q = queue(10);
        let mut rx = q
            .add(1, 1, 1, 0, Priority::Normal)
            .into_receiver()
            .unwrap();
        assert!(q.remove(1));
        assert!(!q.remove(1));
        assert!(rx.recv().await.is_err());
    }

    #[test]
    fn test_metrics_counts_priorities() {
        let q = queue(10);
        q.add(1, 1, 1, 0, Priority::High);
        q.add(2, 1, 1, 0, Priority::Normal);
        q.add(3, 1, 1, 0, Priority::Low);
        q.add(4, 1, 1, 0, Priority::Low);

        let metrics = q.metrics();
        assert_eq!(metrics.size, 4);
        assert_eq!(metrics.high, 1);
        assert_eq!(metrics.normal, 1);
        assert_eq!(metrics.low, 2);
        assert_eq!(metrics.entries.len(), 4);
    }

    #[tokio::test]
    async fn test_fail_all_releases_everything() {
        let q = queue(10);
        let mut rx = q
            .add(1, 1, 1, 0, Priority::Normal)
            .into_receiver()
            .unwrap();
        q.add(2, 1, 1, 0, Priority::Normal);

        assert_eq!(q.fail_all(InspectError::ShuttingDown), 2);
        assert_eq!(
            rx.recv().await.unwrap().unwrap_err(),
            InspectError::ShuttingDown
        );
        assert!(q.is_empty());
    }
}
