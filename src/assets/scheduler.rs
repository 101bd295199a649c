//! Priority asset scheduler
//!
//! `enqueue` admits a descriptor against its category budget and returns a
//! ticket; `drain` issues queued loads in priority order, in batches no
//! larger than the current strategy allows, retrying transient failures.
//! `issue_batch` and `pump` expose the same loop one step at a time, so
//! requests can be admitted while a batch is loading.
//!
//! Each cache key has one slot. A loaded slot answers new requests
//! synchronously; a pending slot hands out receivers on the same watch
//! channel, so concurrent requests share one fetch.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use super::budget::AssetBudget;
use super::loader::{AssetFetcher, FetchError};
use super::{AssetCacheEntry, AssetDescriptor, AssetPayload, AssetPriority, CacheKey, LoadState, LoadTask};
use crate::config::AssetConfig;
use crate::error::{AssetError, AssetResult};
use crate::events::{EventBus, ResourceEvent};
use crate::monitor::NetworkQuality;

/// Final result handed to every ticket of a load
pub type TaskOutcome = AssetResult<Arc<AssetPayload>>;

/// Batch sizing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStrategy {
    Aggressive,
    Balanced,
    Conservative,
}

impl LoadStrategy {
    /// Largest batch issued at once
    pub fn max_concurrent(self) -> usize {
        match self {
            LoadStrategy::Aggressive => 8,
            LoadStrategy::Balanced => 4,
            LoadStrategy::Conservative => 2,
        }
    }

    /// Preload-priority items issued per drain
    pub fn preload_count(self) -> usize {
        match self {
            LoadStrategy::Aggressive => 10,
            LoadStrategy::Balanced => 5,
            LoadStrategy::Conservative => 0,
        }
    }

    pub fn for_network(quality: NetworkQuality) -> Self {
        match quality {
            NetworkQuality::Fast => LoadStrategy::Aggressive,
            NetworkQuality::Moderate => LoadStrategy::Balanced,
            NetworkQuality::Slow | NetworkQuality::Offline => LoadStrategy::Conservative,
        }
    }

    /// One step more cautious
    pub fn demoted(self) -> Self {
        match self {
            LoadStrategy::Aggressive => LoadStrategy::Balanced,
            LoadStrategy::Balanced | LoadStrategy::Conservative => LoadStrategy::Conservative,
        }
    }
}

/// Shared, cloneable control over a scheduler's strategy
///
/// Changes only affect batches formed after the change.
#[derive(Debug, Clone)]
pub struct StrategyHandle {
    sender: Arc<watch::Sender<LoadStrategy>>,
    baseline: LoadStrategy,
}

impl StrategyHandle {
    pub fn new(baseline: LoadStrategy) -> Self {
        let (sender, _) = watch::channel(baseline);
        Self {
            sender: Arc::new(sender),
            baseline,
        }
    }

    pub fn current(&self) -> LoadStrategy {
        *self.sender.borrow()
    }

    /// Strategy restored by `restore`
    pub fn baseline(&self) -> LoadStrategy {
        self.baseline
    }

    /// Switch strategy; returns the previous one if it changed
    pub fn set(&self, strategy: LoadStrategy) -> Option<LoadStrategy> {
        let previous = self.sender.send_replace(strategy);
        if previous == strategy {
            return None;
        }
        info!("🚦 Load strategy {:?} -> {:?}", previous, strategy);
        Some(previous)
    }

    pub fn demote(&self) -> Option<LoadStrategy> {
        self.set(self.current().demoted())
    }

    pub fn restore(&self) -> Option<LoadStrategy> {
        self.set(self.baseline)
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadStrategy> {
        self.sender.subscribe()
    }
}

enum TicketState {
    Ready(TaskOutcome),
    Waiting(watch::Receiver<Option<TaskOutcome>>),
}

/// Claim on the result of a load
///
/// Dropping a ticket does not cancel the load.
pub struct LoadTicket {
    key: CacheKey,
    state: TicketState,
}

impl LoadTicket {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Result if the load has already settled
    pub fn try_result(&self) -> Option<TaskOutcome> {
        match &self.state {
            TicketState::Ready(outcome) => Some(outcome.clone()),
            TicketState::Waiting(receiver) => receiver.borrow().clone(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.try_result().is_some()
    }

    /// Wait until the load settles
    pub async fn wait(self) -> TaskOutcome {
        let mut receiver = match self.state {
            TicketState::Ready(outcome) => return outcome,
            TicketState::Waiting(receiver) => receiver,
        };

        let settled = match receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| Err(AssetError::Abandoned(self.key.to_string())))
    }
}

impl std::fmt::Debug for LoadTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadTicket")
            .field("key", &self.key)
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub enqueued: u64,
    /// Requests attached to an existing pending load
    pub coalesced: u64,
    /// Requests answered from the cache
    pub cache_hits: u64,
    pub priority_bumps: u64,
    pub loaded: u64,
    pub failed: u64,
    pub retries: u64,
    pub budget_rejections: u64,
}

/// What one `drain` call did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub batches: usize,
    /// Keys in the order their loads were issued
    pub issued: Vec<CacheKey>,
    pub loaded: usize,
    pub failed: usize,
    pub budget_rejected: usize,
    /// Preload items left queued by the strategy
    pub deferred: usize,
    pub retries: u32,
    pub largest_batch: usize,
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueEntry {
    priority: AssetPriority,
    seq: u64,
    key: CacheKey,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence (FIFO)
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct PendingLoad {
    task: LoadTask,
    notify: watch::Sender<Option<TaskOutcome>>,
    seq: u64,
}

enum Slot {
    Pending(PendingLoad),
    Settled(AssetCacheEntry),
}

/// A load handed to the fetcher
struct Issued {
    key: CacheKey,
    descriptor: AssetDescriptor,
    footprint: u64,
}

struct FetchOutcome {
    attempts: u32,
    result: Result<Vec<u8>, FetchError>,
}

/// Progress of one attempt, sent from the load task back to the scheduler
#[derive(Debug)]
struct AttemptUpdate {
    key: CacheKey,
    attempt: u32,
    /// Set when the attempt failed
    error: Option<String>,
}

/// Bookkeeping of the drain round in progress
#[derive(Default)]
struct Round {
    report: DrainReport,
    deferred: Vec<QueueEntry>,
    preloads_issued: usize,
}

/// Budgeted priority scheduler over an `AssetFetcher`
///
/// Loads run as tokio tasks owned by the scheduler. `drain` runs them to
/// completion; callers that need to admit requests while loads are in
/// flight step through `issue_batch` and `pump` instead.
pub struct AssetScheduler<F: AssetFetcher> {
    fetcher: Arc<F>,
    budget: AssetBudget,
    retry: RetryPolicy,
    strategy: StrategyHandle,
    queue: BinaryHeap<QueueEntry>,
    slots: HashMap<CacheKey, Slot>,
    in_flight: JoinSet<(Issued, FetchOutcome)>,
    progress_tx: mpsc::UnboundedSender<AttemptUpdate>,
    progress_rx: mpsc::UnboundedReceiver<AttemptUpdate>,
    round: Round,
    next_seq: u64,
    stats: SchedulerStats,
    events: Option<EventBus>,
}

impl<F: AssetFetcher> AssetScheduler<F> {
    pub fn new(fetcher: F, config: &AssetConfig) -> Self {
        info!(
            "📦 Asset scheduler: {} MB budget, {} attempts, {:?} strategy",
            config.total_budget_mb, config.retry_attempts, config.strategy
        );
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        Self {
            fetcher: Arc::new(fetcher),
            budget: AssetBudget::new(config.total_budget_bytes(), &config.partition),
            retry: RetryPolicy {
                attempts: config.retry_attempts.max(1),
                delay: config.retry_delay(),
            },
            strategy: StrategyHandle::new(config.strategy),
            queue: BinaryHeap::new(),
            slots: HashMap::new(),
            in_flight: JoinSet::new(),
            progress_tx,
            progress_rx,
            round: Round::default(),
            next_seq: 0,
            stats: SchedulerStats::default(),
            events: None,
        }
    }

    /// Replace the budget derived from the config
    pub fn with_budget(mut self, budget: AssetBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Handle for adjusting the strategy from elsewhere
    pub fn strategy_handle(&self) -> StrategyHandle {
        self.strategy.clone()
    }

    /// Admit a load request
    ///
    /// Loaded keys resolve immediately; queued and loading keys share the
    /// existing load. New keys must fit the remaining category budget or the
    /// request is rejected and nothing is queued.
    pub fn enqueue(&mut self, descriptor: AssetDescriptor) -> AssetResult<LoadTicket> {
        let key = descriptor.key();
        self.stats.enqueued += 1;

        match self.slots.get_mut(&key) {
            Some(Slot::Settled(AssetCacheEntry {
                state: LoadState::Loaded,
                payload: Some(payload),
                ..
            })) => {
                self.stats.cache_hits += 1;
                debug!("💾 Cache hit for {}", key);
                return Ok(LoadTicket {
                    state: TicketState::Ready(Ok(Arc::clone(payload))),
                    key,
                });
            }
            Some(Slot::Pending(pending)) => {
                self.stats.coalesced += 1;
                if pending.task.state == LoadState::Queued && descriptor.priority > pending.task.descriptor.priority {
                    debug!(
                        "⬆️ {} bumped from {:?} to {:?}",
                        key, pending.task.descriptor.priority, descriptor.priority
                    );
                    pending.task.descriptor.priority = descriptor.priority;
                    self.queue.push(QueueEntry {
                        priority: descriptor.priority,
                        seq: pending.seq,
                        key: key.clone(),
                    });
                    self.stats.priority_bumps += 1;
                } else if pending.task.state == LoadState::Loading {
                    debug!("🔗 {} attached to in-flight load (attempt {})", key, pending.task.attempt);
                }
                return Ok(LoadTicket {
                    state: TicketState::Waiting(pending.notify.subscribe()),
                    key,
                });
            }
            _ => {}
        }

        let category = descriptor.asset_type.category();
        if let Err(e) = self.budget.check(category, descriptor.estimated_footprint()) {
            self.stats.budget_rejections += 1;
            warn!("🚫 Rejected {}: {}", key, e);
            return Err(e);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let (notify, receiver) = watch::channel(None);

        self.queue.push(QueueEntry {
            priority: descriptor.priority,
            seq,
            key: key.clone(),
        });
        // Replaces a failed slot, if any, so the key is attempted afresh
        self.slots.insert(
            key.clone(),
            Slot::Pending(PendingLoad {
                task: LoadTask::new(descriptor),
                notify,
                seq,
            }),
        );
        self.publish(ResourceEvent::LoadProgress {
            key: key.clone(),
            state: LoadState::Queued,
            attempt: 0,
        });

        Ok(LoadTicket {
            state: TicketState::Waiting(receiver),
            key,
        })
    }

    /// Process the queue until it is empty or only deferred preloads remain
    pub async fn drain(&mut self) -> DrainReport {
        loop {
            if self.in_flight.is_empty() && self.issue_batch() == 0 {
                break;
            }
            self.pump().await;
        }
        self.finish_round()
    }

    /// Start the next batch if no load is in flight; returns its size
    ///
    /// Must be called from within a tokio runtime.
    pub fn issue_batch(&mut self) -> usize {
        if !self.in_flight.is_empty() {
            return 0;
        }

        let batch = self.next_batch(self.strategy.current());
        if batch.is_empty() {
            return 0;
        }

        let size = batch.len();
        self.round.report.batches += 1;
        self.round.report.largest_batch = self.round.report.largest_batch.max(size);

        for issued in batch {
            let fetcher = Arc::clone(&self.fetcher);
            let retry = self.retry;
            let events = self.events.clone();
            let progress = self.progress_tx.clone();
            self.in_flight.spawn(async move {
                let outcome =
                    fetch_with_retry(fetcher.as_ref(), &issued.descriptor, retry, &progress, events.as_ref()).await;
                (issued, outcome)
            });
        }
        size
    }

    /// Wait for one in-flight load and settle it
    ///
    /// Returns the settled key, or `None` when nothing was in flight.
    /// Attempt progress reported meanwhile is applied to the loading tasks.
    pub async fn pump(&mut self) -> Option<CacheKey> {
        if self.in_flight.is_empty() {
            self.apply_progress();
            return None;
        }

        loop {
            tokio::select! {
                biased;
                Some(update) = self.progress_rx.recv() => self.apply_update(update),
                joined = self.in_flight.join_next() => {
                    self.apply_progress();
                    let settled = match joined {
                        Some(Ok((issued, outcome))) => {
                            let key = issued.key.clone();
                            self.settle(issued, outcome);
                            Some(key)
                        }
                        Some(Err(e)) => {
                            error!("❌ Asset load task failed: {}", e);
                            None
                        }
                        None => None,
                    };
                    if self.in_flight.is_empty() {
                        self.abandon_orphans();
                    }
                    return settled;
                }
            }
        }
    }

    /// Apply attempt progress reported so far without waiting
    pub fn refresh(&mut self) {
        self.apply_progress();
    }

    /// Close the current drain round and return what it did
    ///
    /// Preloads deferred by the strategy go back into the queue.
    pub fn finish_round(&mut self) -> DrainReport {
        let round = std::mem::take(&mut self.round);
        let mut report = round.report;
        report.deferred = round.deferred.len();
        if !round.deferred.is_empty() {
            debug!("⏸️ {} preload items deferred", round.deferred.len());
        }
        self.queue.extend(round.deferred);
        report
    }

    /// Loads currently running
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Pop up to `max_concurrent` issuable entries and reserve their budget
    fn next_batch(&mut self, strategy: LoadStrategy) -> Vec<Issued> {
        let mut batch = Vec::new();

        while batch.len() < strategy.max_concurrent() {
            let Some(entry) = self.queue.pop() else {
                break;
            };

            let descriptor = match self.slots.get(&entry.key) {
                Some(Slot::Pending(pending))
                    if pending.task.state == LoadState::Queued
                        && pending.task.descriptor.priority == entry.priority =>
                {
                    pending.task.descriptor.clone()
                }
                // Superseded by a priority bump or already settled
                _ => continue,
            };

            if entry.priority == AssetPriority::Preload {
                if self.round.preloads_issued >= strategy.preload_count() {
                    self.round.deferred.push(entry);
                    continue;
                }
                self.round.preloads_issued += 1;
            }

            let footprint = descriptor.estimated_footprint();
            if let Err(e) = self.budget.try_reserve(descriptor.asset_type.category(), footprint) {
                warn!("🚫 {} no longer fits its budget: {}", entry.key, e);
                self.stats.budget_rejections += 1;
                self.round.report.budget_rejected += 1;
                self.round.report.failed += 1;
                self.settle_failed(&entry.key, e);
                continue;
            }

            if let Some(Slot::Pending(pending)) = self.slots.get_mut(&entry.key) {
                pending.task.state = LoadState::Loading;
            }
            self.round.report.issued.push(entry.key.clone());
            batch.push(Issued {
                key: entry.key,
                descriptor,
                footprint,
            });
        }

        batch
    }

    fn apply_progress(&mut self) {
        while let Ok(update) = self.progress_rx.try_recv() {
            self.apply_update(update);
        }
    }

    fn apply_update(&mut self, update: AttemptUpdate) {
        if let Some(Slot::Pending(pending)) = self.slots.get_mut(&update.key) {
            pending.task.attempt = update.attempt;
            if update.error.is_some() {
                pending.task.last_error = update.error;
            }
        }
    }

    /// Settle loads whose task died without reporting back
    fn abandon_orphans(&mut self) {
        let orphans: Vec<CacheKey> = self
            .slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Pending(pending) if pending.task.state == LoadState::Loading => Some(key.clone()),
                _ => None,
            })
            .collect();

        for key in orphans {
            if let Some(Slot::Pending(pending)) = self.slots.get(&key) {
                let footprint = pending.task.descriptor.estimated_footprint();
                self.budget.release(key.asset_type.category(), footprint);
            }
            self.round.report.failed += 1;
            self.settle_failed(&key, AssetError::Abandoned(key.to_string()));
        }
    }

    fn settle(&mut self, issued: Issued, outcome: FetchOutcome) {
        let retries = outcome.attempts.saturating_sub(1);
        self.round.report.retries += retries;
        self.stats.retries += u64::from(retries);

        // The slot is gone if the key was purged while loading
        let Some(Slot::Pending(mut pending)) = self.slots.remove(&issued.key) else {
            self.budget
                .release(issued.descriptor.asset_type.category(), issued.footprint);
            return;
        };
        pending.task.attempt = outcome.attempts;

        match outcome.result {
            Ok(bytes) => {
                let payload = Arc::new(AssetPayload {
                    key: issued.key.clone(),
                    bytes,
                    charged_bytes: issued.footprint,
                });
                debug!("✅ Loaded {} ({} bytes)", issued.key, payload.bytes.len());
                pending.notify.send_replace(Some(Ok(Arc::clone(&payload))));

                self.slots.insert(
                    issued.key.clone(),
                    Slot::Settled(AssetCacheEntry {
                        key: issued.key.clone(),
                        state: LoadState::Loaded,
                        payload: Some(payload),
                        attempts: outcome.attempts,
                        error: None,
                        last_error: pending.task.last_error,
                        persistent: issued.descriptor.persistent,
                    }),
                );
                self.stats.loaded += 1;
                self.round.report.loaded += 1;
                self.publish(ResourceEvent::LoadProgress {
                    key: issued.key,
                    state: LoadState::Loaded,
                    attempt: outcome.attempts,
                });
            }
            Err(fetch_error) => {
                self.budget
                    .release(issued.descriptor.asset_type.category(), issued.footprint);
                pending.task.last_error = Some(fetch_error.message().to_string());
                let error = if fetch_error.is_transient() {
                    AssetError::Exhausted {
                        key: issued.key.to_string(),
                        attempts: outcome.attempts,
                        last_error: fetch_error.message().to_string(),
                    }
                } else {
                    AssetError::Permanent {
                        key: issued.key.to_string(),
                        reason: fetch_error.message().to_string(),
                    }
                };
                self.slots.insert(issued.key.clone(), Slot::Pending(pending));
                self.round.report.failed += 1;
                self.settle_failed(&issued.key, error);
            }
        }
    }

    fn settle_failed(&mut self, key: &CacheKey, error: AssetError) {
        warn!("❌ {}", error);
        let (persistent, attempts, last_error) = match self.slots.remove(key) {
            Some(Slot::Pending(pending)) => {
                pending.notify.send_replace(Some(Err(error.clone())));
                (
                    pending.task.descriptor.persistent,
                    pending.task.attempt,
                    pending.task.last_error,
                )
            }
            Some(Slot::Settled(entry)) => (entry.persistent, entry.attempts, entry.last_error),
            None => (false, 0, None),
        };

        self.slots.insert(
            key.clone(),
            Slot::Settled(AssetCacheEntry {
                key: key.clone(),
                state: LoadState::Failed,
                payload: None,
                attempts,
                error: Some(error.to_string()),
                last_error,
                persistent,
            }),
        );
        self.stats.failed += 1;
        self.publish(ResourceEvent::LoadProgress {
            key: key.clone(),
            state: LoadState::Failed,
            attempt: attempts,
        });
    }

    /// Drop settled entries except persistent ones; returns how many went
    pub fn clear_cache(&mut self) -> usize {
        self.evict_settled(|entry| !entry.persistent)
    }

    /// Drop every settled entry and every queued or loading request
    ///
    /// Tickets of dropped requests resolve to `Abandoned`. Loads already
    /// running finish, but their results are discarded.
    pub fn purge(&mut self) -> usize {
        let removed = self.evict_settled(|_| true);
        let pending = self.slots.len();
        self.slots.clear();
        self.queue.clear();
        info!("🧺 Purged {} cached and {} pending assets", removed, pending);
        removed + pending
    }

    fn evict_settled(&mut self, mut should_evict: impl FnMut(&AssetCacheEntry) -> bool) -> usize {
        let keys: Vec<CacheKey> = self
            .slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Settled(entry) if should_evict(entry) => Some(key.clone()),
                _ => None,
            })
            .collect();

        for key in &keys {
            if let Some(Slot::Settled(entry)) = self.slots.remove(key) {
                if let Some(payload) = entry.payload {
                    self.budget.release(key.asset_type.category(), payload.charged_bytes);
                }
            }
        }
        debug!("🧹 Evicted {} cache entries", keys.len());
        keys.len()
    }

    /// Current state of a key
    pub fn state(&self, key: &CacheKey) -> Option<LoadState> {
        match self.slots.get(key)? {
            Slot::Pending(pending) => Some(pending.task.state),
            Slot::Settled(entry) => Some(entry.state),
        }
    }

    /// Queued or loading task of a key
    ///
    /// Attempt progress is applied by `pump` and `refresh`.
    pub fn task(&self, key: &CacheKey) -> Option<&LoadTask> {
        match self.slots.get(key)? {
            Slot::Pending(pending) => Some(&pending.task),
            Slot::Settled(_) => None,
        }
    }

    /// Settled cache entry of a key
    pub fn entry(&self, key: &CacheKey) -> Option<&AssetCacheEntry> {
        match self.slots.get(key)? {
            Slot::Settled(entry) => Some(entry),
            Slot::Pending(_) => None,
        }
    }

    /// Cached payload of a loaded key
    pub fn get(&self, key: &CacheKey) -> Option<Arc<AssetPayload>> {
        self.entry(key)?.payload.clone()
    }

    /// Recorded error of a failed key
    pub fn error(&self, key: &CacheKey) -> Option<&str> {
        self.entry(key)?.error.as_deref()
    }

    /// Loads admitted but not yet issued
    pub fn queued_len(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Pending(pending) if pending.task.state == LoadState::Queued))
            .count()
    }

    pub fn budget(&self) -> &AssetBudget {
        &self.budget
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    fn publish(&self, event: ResourceEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

/// Fetch with linear back-off; only transient errors are retried
async fn fetch_with_retry<F: AssetFetcher>(
    fetcher: &F,
    descriptor: &AssetDescriptor,
    retry: RetryPolicy,
    progress: &mpsc::UnboundedSender<AttemptUpdate>,
    events: Option<&EventBus>,
) -> FetchOutcome {
    let key = descriptor.key();
    let mut attempt = 0;

    loop {
        attempt += 1;
        // The receiver is gone only when the scheduler was dropped
        let _ = progress.send(AttemptUpdate {
            key: key.clone(),
            attempt,
            error: None,
        });
        if let Some(bus) = events {
            bus.publish(ResourceEvent::LoadProgress {
                key: key.clone(),
                state: LoadState::Loading,
                attempt,
            });
        }

        match fetcher.fetch(descriptor).await {
            Ok(bytes) => {
                return FetchOutcome {
                    attempts: attempt,
                    result: Ok(bytes),
                }
            }
            Err(e) if e.is_transient() && attempt < retry.attempts => {
                let delay = retry.delay * attempt;
                warn!(
                    "🔁 {} attempt {}/{} failed: {}; retrying in {:?}",
                    key, attempt, retry.attempts, e, delay
                );
                let _ = progress.send(AttemptUpdate {
                    key: key.clone(),
                    attempt,
                    error: Some(e.message().to_string()),
                });
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return FetchOutcome {
                    attempts: attempt,
                    result: Err(e),
                }
            }
        }
    }
}
