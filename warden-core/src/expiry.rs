//! Expiry scheduler
//!
//! Deadlines are kept in a min-heap keyed on the absolute expiry time
//! computed when the record was created. Each sweep pops every entry whose
//! deadline has passed, evicts the record's occupants under the template
//! lock and releases it. Eviction notices are delivered to the
//! [`EvictionHandler`] only after every due record has been released, and
//! each delivery is bounded by the notify timeout.
//!
//! A popped entry is gone from the heap, so two overlapping sweeps never see
//! the same entry. If a sweep is dropped part way, the entries it had not
//! reclaimed yet go back on the heap. Entries whose record was already
//! released, or whose key now holds a newer record, are counted as stale and
//! skipped.
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_core::expiry::{ExpiryScheduler, eviction_channel, ChannelEvictionHandler};
//!
//! let (tx, mut rx) = eviction_channel(128);
//! let scheduler = Arc::new(ExpiryScheduler::new(registry, Arc::new(ChannelEvictionHandler::new(tx))));
//! let handle = scheduler.spawn(Duration::from_secs(5));
//!
//! while let Some(notice) = rx.recv().await {
//!     world.warp(notice.player, notice.origin_area);
//! }
//! ```

use crate::error::{Result, WardenError};
use crate::registry::InstanceRegistry;
use crate::template::{AllocationKey, AreaId, PlayerId, TemplateId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A record's pending teardown
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScheduledExpiry {
    /// Absolute deadline
    pub deadline: DateTime<Utc>,
    /// Template of the record
    pub template: TemplateId,
    /// Key of the record
    pub key: AllocationKey,
    /// Incarnation the entry was scheduled for
    pub instance_id: Uuid,
}

/// Min-heap of pending expiries, shared between the registry and the scheduler
#[derive(Debug, Clone, Default)]
pub struct ExpiryQueue {
    heap: Arc<Mutex<BinaryHeap<Reverse<ScheduledExpiry>>>>,
}

impl ExpiryQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a teardown
    pub fn schedule(&self, entry: ScheduledExpiry) {
        debug!(
            template = %entry.template,
            key = %entry.key,
            deadline = %entry.deadline,
            "Scheduling instance expiry"
        );
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Reverse(entry));
    }

    /// Remove and return every entry due at `now`, earliest first
    pub fn pop_due(&self, now: DateTime<Utc>) -> Vec<ScheduledExpiry> {
        let mut heap = self.heap.lock().unwrap_or_else(PoisonError::into_inner);
        let mut due = Vec::new();
        while heap.peek().is_some_and(|Reverse(e)| e.deadline <= now) {
            if let Some(Reverse(entry)) = heap.pop() {
                due.push(entry);
            }
        }
        due
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peek()
            .map(|Reverse(e)| e.deadline)
    }

    /// Number of pending entries, stale ones included
    pub fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Signal that an occupant must be relocated back to `origin_area`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionNotice {
    /// Record the player was evicted from
    pub instance_id: Uuid,
    /// Template of the record
    pub template: TemplateId,
    /// Evicted player
    pub player: PlayerId,
    /// Where to send them
    pub origin_area: AreaId,
}

/// Receives eviction notices; implemented by the relocation layer
#[async_trait]
pub trait EvictionHandler: Send + Sync {
    /// Relocate (or queue relocation of) an evicted player
    async fn evict(&self, notice: EvictionNotice) -> Result<()>;
}

/// Sender half of an eviction channel
pub type EvictionSender = mpsc::Sender<EvictionNotice>;

/// Receiver half of an eviction channel
pub type EvictionReceiver = mpsc::Receiver<EvictionNotice>;

/// Creates a bounded channel for eviction notices.
pub fn eviction_channel(buffer_size: usize) -> (EvictionSender, EvictionReceiver) {
    mpsc::channel(buffer_size.max(1))
}

/// Forwards notices into an mpsc channel.
///
/// Never waits for room: a full channel fails the notice, so size the buffer
/// for the largest burst of evictions one sweep can produce.
#[derive(Debug, Clone)]
pub struct ChannelEvictionHandler {
    sender: EvictionSender,
}

impl ChannelEvictionHandler {
    /// Wrap a sender
    pub fn new(sender: EvictionSender) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl EvictionHandler for ChannelEvictionHandler {
    async fn evict(&self, notice: EvictionNotice) -> Result<()> {
        self.sender.try_send(notice).map_err(|e| match e {
            TrySendError::Full(n) => {
                WardenError::Eviction(format!("eviction channel full: {}", n.player))
            }
            TrySendError::Closed(n) => {
                WardenError::Eviction(format!("receiver dropped: {}", n.player))
            }
        })
    }
}

/// Only logs notices; used when no relocation layer is attached
pub struct LoggingEvictionHandler;

#[async_trait]
impl EvictionHandler for LoggingEvictionHandler {
    async fn evict(&self, notice: EvictionNotice) -> Result<()> {
        info!(
            instance_id = %notice.instance_id,
            template = %notice.template,
            player = notice.player,
            origin_area = notice.origin_area,
            "Occupant evicted with no relocation handler attached"
        );
        Ok(())
    }
}

/// Outcome of one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Records released
    pub released: Vec<(TemplateId, AllocationKey)>,
    /// Occupants evicted
    pub evicted: usize,
    /// Entries skipped because their record was already gone or replaced
    pub stale: usize,
    /// Notices the handler failed to accept
    pub notify_failures: usize,
}

impl SweepReport {
    /// Whether the sweep did anything
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.stale == 0 && self.notify_failures == 0
    }
}

/// Due entries popped by a sweep but not reclaimed yet.
///
/// Whatever is left when this is dropped goes back on the queue.
struct PendingExpiries {
    queue: ExpiryQueue,
    entries: VecDeque<ScheduledExpiry>,
}

impl PendingExpiries {
    fn pop_due(queue: &ExpiryQueue, now: DateTime<Utc>) -> Self {
        Self {
            queue: queue.clone(),
            entries: queue.pop_due(now).into(),
        }
    }

    fn front(&self) -> Option<ScheduledExpiry> {
        self.entries.front().cloned()
    }

    fn done(&mut self) {
        self.entries.pop_front();
    }
}

impl Drop for PendingExpiries {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            warn!(entries = self.entries.len(), "Sweep interrupted; requeueing expiries");
        }
        for entry in self.entries.drain(..) {
            self.queue.schedule(entry);
        }
    }
}

enum Reclaim {
    Expired(Vec<EvictionNotice>),
    Deferred,
    Stale,
}

/// Default bound on a single eviction notice delivery
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Periodically reclaims expired records
pub struct ExpiryScheduler {
    registry: Arc<InstanceRegistry>,
    handler: Arc<dyn EvictionHandler>,
    notify_timeout: Duration,
}

impl ExpiryScheduler {
    /// Create a scheduler sweeping `registry`
    pub fn new(registry: Arc<InstanceRegistry>, handler: Arc<dyn EvictionHandler>) -> Self {
        Self {
            registry,
            handler,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }

    /// Bound how long one notice may take to deliver
    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Reclaim every record whose deadline has passed
    pub async fn sweep(&self) -> SweepReport {
        let now = self.registry.clock().now();
        let mut pending = PendingExpiries::pop_due(self.registry.expiry_queue(), now);
        let mut report = SweepReport::default();
        let mut notices = Vec::new();

        while let Some(entry) = pending.front() {
            let outcome = self.reclaim(&entry, now).await;
            pending.done();

            match outcome {
                Reclaim::Expired(evicted) => {
                    info!(
                        template = %entry.template,
                        key = %entry.key,
                        instance_id = %entry.instance_id,
                        evicted = evicted.len(),
                        "Instance expired"
                    );
                    report.evicted += evicted.len();
                    report.released.push((entry.template, entry.key));
                    notices.extend(evicted);
                }
                Reclaim::Deferred => {}
                Reclaim::Stale => report.stale += 1,
            }
        }

        for notice in notices {
            let player = notice.player;
            match tokio::time::timeout(self.notify_timeout, self.handler.evict(notice)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(player, error = %e, "Failed to notify evicted occupant");
                    report.notify_failures += 1;
                }
                Err(_) => {
                    warn!(player, timeout = ?self.notify_timeout, "Eviction notice timed out");
                    report.notify_failures += 1;
                }
            }
        }

        report
    }

    async fn reclaim(&self, entry: &ScheduledExpiry, now: DateTime<Utc>) -> Reclaim {
        let mut guard = match self.registry.lock(&entry.template).await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(template = %entry.template, error = %e, "Dropping expiry for unknown template");
                return Reclaim::Stale;
            }
        };

        let live = guard
            .find(&entry.key)
            .filter(|r| r.id == entry.instance_id)
            .map(|r| r.expires_at);

        match live {
            None => return Reclaim::Stale,
            Some(expires_at) if expires_at > now => {
                // Not due yet; keep it queued under its real deadline
                self.registry.expiry_queue().schedule(ScheduledExpiry {
                    deadline: expires_at,
                    ..entry.clone()
                });
                return Reclaim::Deferred;
            }
            Some(_) => {}
        }

        match guard.expire(&entry.key) {
            Ok(notices) => Reclaim::Expired(notices),
            Err(e) => {
                warn!(template = %entry.template, key = %entry.key, error = %e, "Expiry failed");
                Reclaim::Stale
            }
        }
    }

    /// Sweep on a fixed tick until the returned handle is shut down
    pub fn spawn(self: Arc<Self>, tick: Duration) -> ExpiryHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        let report = tokio::select! {
                            _ = cancelled.cancelled() => break,
                            report = self.sweep() => report,
                        };
                        if !report.is_empty() {
                            debug!(
                                released = report.released.len(),
                                evicted = report.evicted,
                                stale = report.stale,
                                notify_failures = report.notify_failures,
                                "Expiry sweep"
                            );
                        }
                    }
                }
            }
            debug!("Expiry loop stopped");
        });

        ExpiryHandle { token, task }
    }
}

/// Handle to a running expiry loop
pub struct ExpiryHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ExpiryHandle {
    /// Stop the loop and wait for it to finish
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Expiry loop panicked");
        }
    }

    /// Whether the loop is still running
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::events::{EventBus, LifecycleEvent, ReleaseReason};
    use crate::template::InstanceTemplate;

    const LIFETIME: Duration = Duration::from_secs(7200);

    fn setup() -> (ManualClock, Arc<InstanceRegistry>) {
        let clock = ManualClock::default();
        let registry = InstanceRegistry::new(
            [
                InstanceTemplate::party_exclusive("drake_cave", 105020500, "out00", LIFETIME),
                InstanceTemplate::pooled("ferry", 200090030, "sp", 4, Duration::from_secs(120)),
            ],
            Arc::new(clock.clone()),
            EventBus::new(64),
        )
        .unwrap();
        (clock, Arc::new(registry))
    }

    struct FailingHandler;

    #[async_trait]
    impl EvictionHandler for FailingHandler {
        async fn evict(&self, notice: EvictionNotice) -> Result<()> {
            Err(WardenError::Eviction(format!("player {} offline", notice.player)))
        }
    }

    #[test]
    fn test_queue_pops_in_deadline_order() {
        let queue = ExpiryQueue::new();
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        for (secs, slot) in [(30, 0), (10, 1), (20, 2)] {
            queue.schedule(ScheduledExpiry {
                deadline: base + chrono::TimeDelta::seconds(secs),
                template: TemplateId::new("t"),
                key: AllocationKey::Slot(slot),
                instance_id: Uuid::new_v4(),
            });
        }

        assert!(queue.pop_due(base).is_empty());
        let due = queue.pop_due(base + chrono::TimeDelta::seconds(20));
        let slots: Vec<_> = due.iter().map(|e| e.key.clone()).collect();
        assert_eq!(slots, vec![AllocationKey::Slot(1), AllocationKey::Slot(2)]);
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.next_deadline(),
            Some(base + chrono::TimeDelta::seconds(30))
        );
    }

    #[tokio::test]
    async fn test_sweep_never_expires_early() {
        let (clock, registry) = setup();
        let drake = TemplateId::new("drake_cave");
        let key = AllocationKey::Party(1);

        registry.create(&drake, key.clone(), LIFETIME, 105020400).await.unwrap();
        registry.add_occupant(&drake, &key, 11).await.unwrap();

        let (tx, mut rx) = eviction_channel(8);
        let scheduler = ExpiryScheduler::new(
            registry.clone(),
            Arc::new(ChannelEvictionHandler::new(tx)),
        );

        clock.advance(LIFETIME - Duration::from_secs(1));
        assert!(scheduler.sweep().await.is_empty());
        assert!(registry.find(&drake, &key).await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        let report = scheduler.sweep().await;
        assert_eq!(report.released, vec![(drake.clone(), key.clone())]);
        assert_eq!(report.evicted, 1);
        assert!(registry.find(&drake, &key).await.unwrap().is_none());

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.player, 11);
        assert_eq!(notice.origin_area, 105020400);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let (clock, registry) = setup();
        let ferry = TemplateId::new("ferry");
        registry
            .create(&ferry, AllocationKey::Slot(0), Duration::from_secs(120), 130000210)
            .await
            .unwrap();

        let scheduler = ExpiryScheduler::new(registry.clone(), Arc::new(LoggingEvictionHandler));
        clock.advance(Duration::from_secs(121));

        let first = scheduler.sweep().await;
        let second = scheduler.sweep().await;
        assert_eq!(first.released.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_manually_released_entry_is_stale() {
        let (clock, registry) = setup();
        let ferry = TemplateId::new("ferry");
        let slot = AllocationKey::Slot(2);

        registry
            .create(&ferry, slot.clone(), Duration::from_secs(120), 1)
            .await
            .unwrap();
        registry.release(&ferry, &slot).await.unwrap();
        // Same key reused by a newer record with a later deadline
        clock.advance(Duration::from_secs(60));
        let newer = registry
            .create(&ferry, slot.clone(), Duration::from_secs(120), 1)
            .await
            .unwrap();

        let scheduler = ExpiryScheduler::new(registry.clone(), Arc::new(LoggingEvictionHandler));
        clock.advance(Duration::from_secs(60));
        let report = scheduler.sweep().await;
        assert_eq!(report.stale, 1);
        assert!(report.released.is_empty());
        assert_eq!(registry.find(&ferry, &slot).await.unwrap(), Some(newer));
    }

    #[tokio::test]
    async fn test_notify_failure_does_not_halt_sweep() {
        let (clock, registry) = setup();
        let drake = TemplateId::new("drake_cave");
        let ferry = TemplateId::new("ferry");

        registry.create(&drake, AllocationKey::Party(1), LIFETIME, 1).await.unwrap();
        registry.add_occupant(&drake, &AllocationKey::Party(1), 1).await.unwrap();
        registry.add_occupant(&drake, &AllocationKey::Party(1), 2).await.unwrap();
        registry
            .create(&ferry, AllocationKey::Slot(0), Duration::from_secs(120), 1)
            .await
            .unwrap();

        let scheduler = ExpiryScheduler::new(registry.clone(), Arc::new(FailingHandler));
        clock.advance(LIFETIME);
        let report = scheduler.sweep().await;

        assert_eq!(report.released.len(), 2);
        assert_eq!(report.notify_failures, 2);
        assert_eq!(registry.record_count(&drake).await.unwrap(), 0);
        assert_eq!(registry.record_count(&ferry).await.unwrap(), 0);
    }

    struct StuckHandler;

    #[async_trait]
    impl EvictionHandler for StuckHandler {
        async fn evict(&self, _notice: EvictionNotice) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_full_eviction_channel_does_not_stall_sweep() {
        let (clock, registry) = setup();
        let drake = TemplateId::new("drake_cave");
        for party in 1..=3u64 {
            let key = AllocationKey::Party(party);
            registry.create(&drake, key.clone(), LIFETIME, 1).await.unwrap();
            registry.add_occupant(&drake, &key, party * 10).await.unwrap();
            registry.add_occupant(&drake, &key, party * 10 + 1).await.unwrap();
        }

        // Receiver kept alive but never drained
        let (tx, mut rx) = eviction_channel(1);
        let scheduler = ExpiryScheduler::new(
            registry.clone(),
            Arc::new(ChannelEvictionHandler::new(tx)),
        );
        clock.advance(LIFETIME);

        let report = tokio::time::timeout(Duration::from_secs(2), scheduler.sweep())
            .await
            .expect("sweep finished");
        assert_eq!(report.released.len(), 3);
        assert_eq!(report.evicted, 6);
        assert_eq!(report.notify_failures, 5);
        assert_eq!(registry.record_count(&drake).await.unwrap(), 0);
        assert!(registry.expiry_queue().is_empty());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_handler_times_out() {
        let (clock, registry) = setup();
        let drake = TemplateId::new("drake_cave");
        let ferry = TemplateId::new("ferry");
        registry.create(&drake, AllocationKey::Party(1), LIFETIME, 1).await.unwrap();
        registry.add_occupant(&drake, &AllocationKey::Party(1), 1).await.unwrap();
        registry
            .create(&ferry, AllocationKey::Slot(0), Duration::from_secs(120), 1)
            .await
            .unwrap();
        registry.add_occupant(&ferry, &AllocationKey::Slot(0), 2).await.unwrap();

        let scheduler = ExpiryScheduler::new(registry.clone(), Arc::new(StuckHandler))
            .with_notify_timeout(Duration::from_millis(100));
        clock.advance(LIFETIME);

        let report = scheduler.sweep().await;
        assert_eq!(report.released.len(), 2);
        assert_eq!(report.notify_failures, 2);
        assert_eq!(registry.record_count(&drake).await.unwrap(), 0);
        assert_eq!(registry.record_count(&ferry).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_sweep_requeues_entries() {
        let (clock, registry) = setup();
        let drake = TemplateId::new("drake_cave");
        registry.create(&drake, AllocationKey::Party(1), LIFETIME, 1).await.unwrap();
        registry.create(&drake, AllocationKey::Party(2), LIFETIME, 1).await.unwrap();

        let scheduler = ExpiryScheduler::new(registry.clone(), Arc::new(LoggingEvictionHandler));
        clock.advance(LIFETIME);

        {
            let _held = registry.lock(&drake).await.unwrap();
            let interrupted =
                tokio::time::timeout(Duration::from_millis(50), scheduler.sweep()).await;
            assert!(interrupted.is_err());
        }
        assert_eq!(registry.expiry_queue().len(), 2);
        assert_eq!(registry.record_count(&drake).await.unwrap(), 2);

        let report = scheduler.sweep().await;
        assert_eq!(report.released.len(), 2);
        assert_eq!(registry.record_count(&drake).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_blocked_sweep() {
        let (clock, registry) = setup();
        let ferry = TemplateId::new("ferry");
        registry
            .create(&ferry, AllocationKey::Slot(0), Duration::from_secs(120), 1)
            .await
            .unwrap();
        registry.add_occupant(&ferry, &AllocationKey::Slot(0), 5).await.unwrap();
        clock.advance(Duration::from_secs(120));

        let scheduler = Arc::new(
            ExpiryScheduler::new(registry.clone(), Arc::new(StuckHandler))
                .with_notify_timeout(Duration::from_secs(3600)),
        );
        let handle = scheduler.spawn(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(registry.record_count(&ferry).await.unwrap(), 0);

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("loop stopped while a notice was pending");
    }

    #[tokio::test]
    async fn test_expiry_emits_eviction_then_release() {
        let (clock, registry) = setup();
        let mut events = registry.events().subscribe();
        let drake = TemplateId::new("drake_cave");
        let key = AllocationKey::Solo(8);

        registry.create(&drake, key.clone(), LIFETIME, 1).await.unwrap();
        registry.add_occupant(&drake, &key, 8).await.unwrap();
        clock.advance(LIFETIME);
        ExpiryScheduler::new(registry.clone(), Arc::new(LoggingEvictionHandler))
            .sweep()
            .await;

        let mut types = Vec::new();
        while let Ok(event) = events.try_recv() {
            types.push(event.event_type());
            if let LifecycleEvent::InstanceReleased { reason, .. } = event {
                assert_eq!(reason, ReleaseReason::Expired);
            }
        }
        assert_eq!(
            types,
            vec![
                "instance_created",
                "occupants_admitted",
                "occupant_evicted",
                "instance_released"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_sweeps_and_shuts_down() {
        let (clock, registry) = setup();
        let ferry = TemplateId::new("ferry");
        registry
            .create(&ferry, AllocationKey::Slot(0), Duration::from_secs(120), 1)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(120));
        assert!(clock.now() >= registry.snapshot(&ferry).await.unwrap()[0].expires_at);

        let scheduler = Arc::new(ExpiryScheduler::new(
            registry.clone(),
            Arc::new(LoggingEvictionHandler),
        ));
        let handle = scheduler.spawn(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(registry.record_count(&ferry).await.unwrap(), 0);
        assert!(handle.is_running());

        handle.shutdown().await;
    }
}
