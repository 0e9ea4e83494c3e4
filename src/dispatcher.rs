//! # Event Dispatcher
//!
//! The dispatcher is the hub of the crate: it accepts submissions, orders
//! pending work by priority then arrival, drives attempts through the
//! execution strategies, applies the retry policy, records exactly one
//! terminal [`DispatchResult`] per event, and lets callers await batches of
//! results.
//!
//! ## Architecture
//!
//! - A max-heap of [`QueuedEvent`]s orders pending work: higher `priority`
//!   first, earlier submission first within a priority.
//! - A single dispatch loop pops events and spawns one tokio task per
//!   attempt, gated by a semaphore per strategy pool (POOLED shares the
//!   worker pool, ISOLATED shares the process pool, EXTERNAL is ungated).
//! - INLINE events never touch the queue: their whole attempt sequence runs
//!   in the submitting task before `submit` returns.
//! - Retryable failures re-enter the queue under the same event id, so a
//!   retrying event competes fairly with new work.
//! - Terminal results are recorded exactly once; concurrent shutdown,
//!   cancellation, and attempt completion all funnel through the same
//!   deduplicating sink.
//!
//! ## Usage
//!
//! ```no_run
//! use eventbus_core::{Dispatcher, HandlerRegistry};
//!
//! # async fn demo() -> eventbus_core::BusResult<()> {
//! let registry = HandlerRegistry::new();
//! // ... register handlers ...
//! let dispatcher = Dispatcher::with_defaults(registry)?;
//! let event = dispatcher.event_builder("order.created").build()?;
//! let id = dispatcher.submit(event).await?;
//! let (results, meta) = dispatcher.await_results(&[id]).await;
//! assert_eq!(meta.total_requested, 1);
//! # let _ = results;
//! dispatcher.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::config::DispatcherConfig;
use crate::error::{BusResult, DispatchError};
use crate::event::{Event, EventBuilder, EventState, ExecutionStrategy};
use crate::execution::isolated::IsolatedPool;
use crate::handler::{DispatcherHandle, ExecutionContext};
use crate::logging::{log_retry, log_submit, log_terminal};
use crate::registry::HandlerRegistry;
use crate::result::{BatchMetadata, DispatchResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle notifications, broadcast to any number of subscribers.
///
/// Publishing never blocks dispatch; an empty subscriber set is normal.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Submitted {
        event_id: Uuid,
        event_type: String,
        strategy: ExecutionStrategy,
    },
    Retrying {
        event_id: Uuid,
        attempt: u32,
    },
    Succeeded {
        event_id: Uuid,
        attempts: u32,
    },
    Failed {
        event_id: Uuid,
        error_kind: String,
        attempts: u32,
    },
    Cancelled {
        event_id: Uuid,
    },
    ShutdownBegan,
}

/// Point-in-time dispatcher counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub queued: usize,
    pub in_flight: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

/// Heap entry: priority descending, then submission order ascending.
struct QueuedEvent {
    event: Event,
    seq: u64,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}
impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap: higher priority wins, then lower seq
        // (earlier submission) wins.
        self.event
            .priority
            .cmp(&other.event.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Per-event bookkeeping from submission until the terminal result.
struct EventRecord {
    state: EventState,
    attempts_started: u32,
    first_started_at: Option<Instant>,
    token: CancellationToken,
    correlation: HashMap<String, Value>,
    event_type: String,
    strategy: ExecutionStrategy,
}

enum AttemptOutcome {
    Terminal(DispatchResult),
    Retry { next_attempt: u32 },
}

pub(crate) struct DispatcherCore {
    config: DispatcherConfig,
    registry: Arc<HandlerRegistry>,
    queue: Mutex<BinaryHeap<QueuedEvent>>,
    next_seq: AtomicU64,
    records: DashMap<Uuid, EventRecord>,
    results: DashMap<Uuid, DispatchResult>,
    queue_notify: Notify,
    completion_notify: Notify,
    shutdown_token: CancellationToken,
    accepting: AtomicBool,
    pool_permits: Arc<Semaphore>,
    isolated_pool: IsolatedPool,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    counters: Counters,
}

impl DispatcherCore {
    fn publish(&self, event: LifecycleEvent) {
        // No subscribers is fine.
        let _ = self.lifecycle.send(event);
    }

    /// Validate and admit one event. INLINE events run their whole attempt
    /// sequence here; every other strategy is enqueued for the dispatch
    /// loop.
    pub(crate) async fn submit_internal(
        core: &Arc<Self>,
        event: Event,
        correlation: HashMap<String, Value>,
    ) -> BusResult<Uuid> {
        if !core.accepting.load(Ordering::SeqCst) {
            return Err(DispatchError::ShuttingDown);
        }
        if !core.registry.contains(&event.event_type).await {
            return Err(DispatchError::UnknownType {
                event_type: event.event_type.clone(),
            });
        }

        let id = event.id;
        core.records.insert(
            id,
            EventRecord {
                state: EventState::Pending,
                attempts_started: 0,
                first_started_at: None,
                token: core.shutdown_token.child_token(),
                correlation,
                event_type: event.event_type.clone(),
                strategy: event.strategy,
            },
        );
        core.counters.submitted.fetch_add(1, Ordering::Relaxed);
        log_submit(id, &event.event_type, event.strategy, event.priority);
        core.publish(LifecycleEvent::Submitted {
            event_id: id,
            event_type: event.event_type.clone(),
            strategy: event.strategy,
        });

        if event.strategy == ExecutionStrategy::Inline {
            Self::run_inline_sequence(core, event).await;
        } else {
            core.enqueue(event);
        }
        Ok(id)
    }

    fn enqueue(&self, event: Event) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.queue.lock().push(QueuedEvent { event, seq });
        self.queue_notify.notify_one();
    }

    /// Drive an INLINE event to its terminal result in the caller's task.
    async fn run_inline_sequence(core: &Arc<Self>, event: Event) {
        loop {
            let Some(outcome) = Self::run_one_attempt(core, &event).await else {
                return;
            };
            match outcome {
                AttemptOutcome::Terminal(result) => {
                    Self::record_terminal(core, result);
                    return;
                }
                AttemptOutcome::Retry { next_attempt } => {
                    if let Some(delay) = core.config.backoff.delay_before_attempt(next_attempt) {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    /// Run one attempt end to end: bookkeeping, guarded execution,
    /// retry-or-terminal classification. Returns `None` when the event's
    /// record is already gone (cancelled or force-failed).
    async fn run_one_attempt(core: &Arc<Self>, event: &Event) -> Option<AttemptOutcome> {
        let (attempt, token, correlation) = {
            let mut record = core.records.get_mut(&event.id)?;
            record.state = EventState::Running;
            record.attempts_started += 1;
            record.first_started_at.get_or_insert_with(Instant::now);
            (
                record.attempts_started,
                record.token.clone(),
                record.correlation.clone(),
            )
        };

        let ctx = ExecutionContext {
            event_id: event.id,
            attempt,
            cancellation: token.child_token(),
            dispatcher: DispatcherHandle::new(Arc::downgrade(core)),
            correlation,
        };

        let outcome = tokio::select! {
            res = crate::execution::execute_attempt(&core.registry, &core.isolated_pool, &ctx, event) => res,
            _ = token.cancelled() => {
                if core.shutdown_token.is_cancelled() {
                    Err(DispatchError::ShuttingDown)
                } else {
                    Err(DispatchError::Cancelled { event_id: event.id })
                }
            }
        };

        match outcome {
            Ok(data) => Some(AttemptOutcome::Terminal(DispatchResult::success(
                event.id, data, attempt,
            ))),
            Err(err) if err.is_retryable() && attempt <= event.retry_budget => {
                core.counters.retried.fetch_add(1, Ordering::Relaxed);
                log_retry(
                    event.id,
                    &event.event_type,
                    event.strategy,
                    attempt,
                    &err.to_string(),
                );
                core.publish(LifecycleEvent::Retrying {
                    event_id: event.id,
                    attempt,
                });
                if let Some(mut record) = core.records.get_mut(&event.id) {
                    record.state = EventState::Pending;
                }
                Some(AttemptOutcome::Retry {
                    next_attempt: attempt + 1,
                })
            }
            Err(err) => Some(AttemptOutcome::Terminal(DispatchResult::failure(
                event.id, &err, attempt,
            ))),
        }
    }

    /// Record the terminal result for an event, exactly once. Later calls
    /// for the same id are no-ops, which makes shutdown force-failure and
    /// in-flight completion safe to race.
    fn record_terminal(core: &Arc<Self>, result: DispatchResult) {
        let id = result.event_id;
        match core.results.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => return,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(result.clone());
            }
        }

        let (event_type, strategy, duration_ms) = match core.records.remove(&id) {
            Some((_, record)) => {
                record.token.cancel();
                (
                    record.event_type,
                    record.strategy,
                    record
                        .first_started_at
                        .map(|t| t.elapsed().as_millis() as u64),
                )
            }
            None => (String::new(), ExecutionStrategy::Pooled, None),
        };

        if result.success {
            core.counters.succeeded.fetch_add(1, Ordering::Relaxed);
            core.publish(LifecycleEvent::Succeeded {
                event_id: id,
                attempts: result.attempts,
            });
        } else {
            core.counters.failed.fetch_add(1, Ordering::Relaxed);
            core.publish(LifecycleEvent::Failed {
                event_id: id,
                error_kind: result.error_kind.clone().unwrap_or_default(),
                attempts: result.attempts,
            });
        }
        log_terminal(
            id,
            &event_type,
            strategy,
            result.success,
            result.attempts,
            duration_ms,
            result.error_kind.as_deref(),
        );
        core.completion_notify.notify_waiters();
    }

    /// Strategy of the next live queue entry, discarding entries whose
    /// records are already gone (cancelled or force-failed).
    fn peek_strategy(&self) -> Option<ExecutionStrategy> {
        let mut queue = self.queue.lock();
        while let Some(top) = queue.peek() {
            if self.records.contains_key(&top.event.id) {
                return Some(top.event.strategy);
            }
            queue.pop();
        }
        None
    }

    fn pop_next(&self) -> Option<QueuedEvent> {
        let mut queue = self.queue.lock();
        while let Some(queued) = queue.pop() {
            if self.records.contains_key(&queued.event.id) {
                return Some(queued);
            }
        }
        None
    }

    /// Main loop: wait for work, gate on the strategy's pool capacity, and
    /// spawn one task per attempt. Capacity is acquired *before* popping so
    /// a saturated pool never lets a lower-priority event overtake.
    async fn dispatch_loop(core: Arc<Self>) {
        loop {
            let notified = core.queue_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let Some(strategy) = core.peek_strategy() else {
                tokio::select! {
                    _ = notified => continue,
                    _ = core.shutdown_token.cancelled() => break,
                }
            };

            let permit = match Self::acquire_capacity(&core, strategy).await {
                Ok(permit) => permit,
                Err(()) => break, // shutdown
            };

            let Some(queued) = core.pop_next() else {
                continue;
            };
            if queued.event.strategy != strategy {
                // The head changed while we waited for capacity; put it
                // back and re-evaluate which pool to draw from.
                core.queue.lock().push(queued);
                core.queue_notify.notify_one();
                continue;
            }

            let core_clone = core.clone();
            tokio::spawn(async move {
                Self::run_queued_attempt(core_clone, queued.event, permit).await;
            });
        }
        debug!("Dispatch loop stopped");
    }

    async fn acquire_capacity(
        core: &Arc<Self>,
        strategy: ExecutionStrategy,
    ) -> Result<Option<OwnedSemaphorePermit>, ()> {
        let semaphore = match strategy {
            ExecutionStrategy::Pooled => core.pool_permits.clone(),
            ExecutionStrategy::Isolated => core.isolated_pool.permits(),
            // EXTERNAL work spends its time blocked on the child process;
            // it is not gated by an in-process pool. INLINE never queues.
            ExecutionStrategy::External | ExecutionStrategy::Inline => return Ok(None),
        };
        tokio::select! {
            permit = semaphore.acquire_owned() => match permit {
                Ok(permit) => Ok(Some(permit)),
                Err(_) => Err(()),
            },
            _ = core.shutdown_token.cancelled() => Err(()),
        }
    }

    /// One queued attempt. Capacity is released before any backoff sleep so
    /// a waiting retry never starves the pool.
    async fn run_queued_attempt(
        core: Arc<Self>,
        event: Event,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let outcome = Self::run_one_attempt(&core, &event).await;
        drop(permit);
        match outcome {
            None => {}
            Some(AttemptOutcome::Terminal(result)) => Self::record_terminal(&core, result),
            Some(AttemptOutcome::Retry { next_attempt }) => {
                if let Some(delay) = core.config.backoff.delay_before_attempt(next_attempt) {
                    tokio::time::sleep(delay).await;
                }
                core.enqueue(event);
            }
        }
    }

    async fn await_results(
        core: &Arc<Self>,
        ids: &[Uuid],
        blocking: bool,
    ) -> (HashMap<Uuid, DispatchResult>, BatchMetadata) {
        let unique: HashSet<Uuid> = ids.iter().copied().collect();
        loop {
            let notified = core.completion_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut gathered = HashMap::with_capacity(unique.len());
            for id in &unique {
                if let Some(result) = core.results.get(id) {
                    gathered.insert(*id, result.clone());
                }
            }
            if !blocking || gathered.len() == unique.len() {
                let meta = BatchMetadata::from_results(ids, &gathered);
                return (gathered, meta);
            }
            if core.shutdown_token.is_cancelled() {
                for id in &unique {
                    gathered.entry(*id).or_insert_with(|| {
                        DispatchResult::failure(*id, &DispatchError::ShuttingDown, 0)
                    });
                }
                let meta = BatchMetadata::from_results(ids, &gathered);
                return (gathered, meta);
            }
            notified.await;
        }
    }

    /// Cancel a pending or running event. Returns `false` when the id was
    /// never submitted or already has a terminal result.
    fn cancel(core: &Arc<Self>, id: Uuid) -> bool {
        let Some(record) = core.records.get(&id) else {
            return false;
        };
        let was_pending = record.state == EventState::Pending;
        let attempts = record.attempts_started;
        record.token.cancel();
        drop(record);

        core.publish(LifecycleEvent::Cancelled { event_id: id });
        if was_pending {
            // Never started (or waiting between retries): record the
            // terminal outcome now. A running attempt records its own when
            // its cancellation resolves.
            Self::record_terminal(
                core,
                DispatchResult::failure(id, &DispatchError::Cancelled { event_id: id }, attempts),
            );
        }
        true
    }

    /// Stop intake, grant in-flight work a grace window, then force-fail
    /// whatever remains.
    async fn shutdown(core: &Arc<Self>) {
        if !core.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("🛑 Dispatcher shutdown requested");
        core.publish(LifecycleEvent::ShutdownBegan);

        let drained = tokio::time::timeout(core.config.shutdown_grace(), async {
            loop {
                let notified = core.completion_notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if core.records.is_empty() {
                    return;
                }
                notified.await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = core.records.len(),
                "Shutdown grace elapsed with work still in flight"
            );
        }

        core.shutdown_token.cancel();
        core.queue_notify.notify_waiters();

        let leftover: Vec<Uuid> = core.records.iter().map(|entry| *entry.key()).collect();
        for id in leftover {
            let attempts = core
                .records
                .get(&id)
                .map(|record| record.attempts_started)
                .unwrap_or(0);
            Self::record_terminal(
                core,
                DispatchResult::failure(id, &DispatchError::ShuttingDown, attempts),
            );
        }
        core.queue.lock().clear();
        core.isolated_pool.shutdown().await;
        core.completion_notify.notify_waiters();
        info!("🛑 Dispatcher shutdown complete");
    }
}

/// Public, cloneable face of the dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    core: Arc<DispatcherCore>,
}

impl Dispatcher {
    /// Build a dispatcher over `registry` and start its dispatch loop.
    pub fn new(config: DispatcherConfig, registry: HandlerRegistry) -> BusResult<Self> {
        config.validate()?;
        let (lifecycle, _) = broadcast::channel(config.lifecycle_channel_capacity);
        let core = Arc::new(DispatcherCore {
            pool_permits: Arc::new(Semaphore::new(config.pool.size)),
            isolated_pool: IsolatedPool::new(&config.isolated),
            config,
            registry: Arc::new(registry),
            queue: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
            records: DashMap::new(),
            results: DashMap::new(),
            queue_notify: Notify::new(),
            completion_notify: Notify::new(),
            shutdown_token: CancellationToken::new(),
            accepting: AtomicBool::new(true),
            lifecycle,
            counters: Counters::default(),
        });
        tokio::spawn(DispatcherCore::dispatch_loop(core.clone()));
        Ok(Self { core })
    }

    pub fn with_defaults(registry: HandlerRegistry) -> BusResult<Self> {
        Self::new(DispatcherConfig::default(), registry)
    }

    /// Weak handle suitable for storing inside handlers.
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle::new(Arc::downgrade(&self.core))
    }

    /// Builder pre-seeded with this dispatcher's configured defaults.
    pub fn event_builder(&self, event_type: impl Into<String>) -> EventBuilder {
        Event::builder(event_type)
            .timeout(self.core.config.default_timeout())
            .retry_budget(self.core.config.default_retry_budget)
    }

    /// Submit one event. Returns its id once admitted (INLINE events are
    /// fully executed first). Unknown types are rejected here, never
    /// discovered later.
    pub async fn submit(&self, event: Event) -> BusResult<Uuid> {
        DispatcherCore::submit_internal(&self.core, event, HashMap::new()).await
    }

    /// Submit with caller correlation data, passed through to the handler's
    /// execution context unmodified.
    pub async fn submit_with_correlation(
        &self,
        event: Event,
        correlation: HashMap<String, Value>,
    ) -> BusResult<Uuid> {
        DispatcherCore::submit_internal(&self.core, event, correlation).await
    }

    /// Block until every id has a terminal result (or shutdown interrupts,
    /// in which case missing ids are reported as shutdown failures).
    pub async fn await_results(
        &self,
        ids: &[Uuid],
    ) -> (HashMap<Uuid, DispatchResult>, BatchMetadata) {
        DispatcherCore::await_results(&self.core, ids, true).await
    }

    /// Return whatever results are already terminal, without waiting.
    pub async fn poll_results(
        &self,
        ids: &[Uuid],
    ) -> (HashMap<Uuid, DispatchResult>, BatchMetadata) {
        DispatcherCore::await_results(&self.core, ids, false).await
    }

    /// Terminal result for one id, if any.
    pub fn result(&self, id: Uuid) -> Option<DispatchResult> {
        self.core.results.get(&id).map(|r| r.clone())
    }

    /// Remove and return the terminal result for one id.
    pub fn take_result(&self, id: Uuid) -> Option<DispatchResult> {
        self.core.results.remove(&id).map(|(_, r)| r)
    }

    /// Current lifecycle state of an event, if known.
    pub fn status(&self, id: Uuid) -> Option<EventState> {
        if let Some(result) = self.core.results.get(&id) {
            return Some(if result.success {
                EventState::Succeeded
            } else {
                EventState::FailedTerminal
            });
        }
        self.core.records.get(&id).map(|record| record.state)
    }

    /// Cancel a pending or running event.
    pub fn cancel(&self, id: Uuid) -> bool {
        DispatcherCore::cancel(&self.core, id)
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.core.lifecycle.subscribe()
    }

    pub fn stats(&self) -> DispatcherStats {
        let core = &self.core;
        DispatcherStats {
            submitted: core.counters.submitted.load(Ordering::Relaxed),
            succeeded: core.counters.succeeded.load(Ordering::Relaxed),
            failed: core.counters.failed.load(Ordering::Relaxed),
            retried: core.counters.retried.load(Ordering::Relaxed),
            queued: core.queue.lock().len(),
            in_flight: core
                .records
                .iter()
                .filter(|entry| entry.state == EventState::Running)
                .count(),
        }
    }

    /// Stop intake, wait up to the configured grace period for in-flight
    /// work, then force-fail the remainder with a shutdown error.
    pub async fn shutdown(&self) {
        DispatcherCore::shutdown(&self.core).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::handler::{factory, Handler};
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    struct Echo;

    #[async_trait::async_trait]
    impl Handler for Echo {
        async fn call(&self, _ctx: &ExecutionContext, event: &Event) -> BusResult<Value> {
            Ok(event.payload.clone())
        }
    }

    struct AlwaysFails {
        calls: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl Handler for AlwaysFails {
        async fn call(&self, ctx: &ExecutionContext, _event: &Event) -> BusResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DispatchError::HandlerFailed {
                event_id: ctx.event_id,
                reason: "boom".to_string(),
            })
        }
    }

    async fn dispatcher_with_echo() -> Dispatcher {
        let registry = HandlerRegistry::new();
        registry.register("echo", factory(|| Echo)).await.unwrap();
        Dispatcher::with_defaults(registry).unwrap()
    }

    #[tokio::test]
    async fn pooled_event_round_trips_its_payload() {
        let dispatcher = dispatcher_with_echo().await;
        let event = Event::builder("echo")
            .payload(json!({"n": 7}))
            .build()
            .unwrap();
        let id = dispatcher.submit(event).await.unwrap();

        let (results, meta) = dispatcher.await_results(&[id]).await;
        assert_eq!(meta.successful, 1);
        let result = &results[&id];
        assert!(result.success);
        assert_eq!(result.data.as_ref().unwrap()["n"], 7);
        assert_eq!(result.attempts, 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_type_is_rejected_synchronously() {
        let dispatcher = dispatcher_with_echo().await;
        let event = Event::builder("ghost").build().unwrap();
        let err = dispatcher.submit(event).await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::UnknownType {
                event_type: "ghost".to_string()
            }
        );
        assert_eq!(dispatcher.stats().queued, 0);
        assert_eq!(dispatcher.stats().submitted, 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn retry_budget_bounds_the_attempt_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = HandlerRegistry::new();
        let counter = calls.clone();
        registry
            .register(
                "flaky",
                factory(move || AlwaysFails {
                    calls: counter.clone(),
                }),
            )
            .await
            .unwrap();
        let dispatcher = Dispatcher::with_defaults(registry).unwrap();

        let event = Event::builder("flaky").retry_budget(2).build().unwrap();
        let id = dispatcher.submit(event).await.unwrap();
        let (results, _) = dispatcher.await_results(&[id]).await;

        let result = &results[&id];
        assert!(!result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.error_kind.as_deref(), Some("HandlerError"));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn inline_event_is_terminal_when_submit_returns() {
        let dispatcher = dispatcher_with_echo().await;
        let event = Event::builder("echo")
            .strategy(ExecutionStrategy::Inline)
            .payload(json!({"inline": true}))
            .build()
            .unwrap();
        let id = dispatcher.submit(event).await.unwrap();
        let result = dispatcher.result(id).unwrap();
        assert!(result.success);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn submit_after_shutdown_fails_fast() {
        let dispatcher = dispatcher_with_echo().await;
        dispatcher.shutdown().await;
        let event = Event::builder("echo").build().unwrap();
        assert_eq!(
            dispatcher.submit(event).await.unwrap_err(),
            DispatchError::ShuttingDown
        );
    }

    #[tokio::test]
    async fn cancel_of_unknown_id_is_a_no_op() {
        let dispatcher = dispatcher_with_echo().await;
        assert!(!dispatcher.cancel(Uuid::new_v4()));
        dispatcher.shutdown().await;
    }

    #[test]
    fn queue_orders_by_priority_then_arrival() {
        let mut heap = BinaryHeap::new();
        let make = |priority: i32, seq: u64| QueuedEvent {
            event: Event::builder("t").priority(priority).build().unwrap(),
            seq,
        };
        heap.push(make(0, 0));
        heap.push(make(5, 1));
        heap.push(make(5, 2));
        heap.push(make(-3, 3));

        let order: Vec<(i32, u64)> = std::iter::from_fn(|| heap.pop())
            .map(|q| (q.event.priority, q.seq))
            .collect();
        assert_eq!(order, vec![(5, 1), (5, 2), (0, 0), (-3, 3)]);
    }

    #[tokio::test]
    async fn lifecycle_events_are_broadcast() {
        let dispatcher = dispatcher_with_echo().await;
        let mut rx = dispatcher.subscribe();
        let event = Event::builder("echo").build().unwrap();
        let id = dispatcher.submit(event).await.unwrap();
        dispatcher.await_results(&[id]).await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, LifecycleEvent::Submitted { event_id, .. } if event_id == id));
        dispatcher.shutdown().await;
    }
}
