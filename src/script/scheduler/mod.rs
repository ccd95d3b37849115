//! Execution scheduler.
//!
//! Every script environment has a slot: an `active` flag plus a FIFO of
//! waiting units. At most one unit per environment is running or handed to
//! the pool; the rest queue behind it. Different environments run in
//! parallel on the evaluation pool.
//!
//! ```text
//! submit/resume ─► enqueue ─┬─ slot idle ──► dispatch ─► run ─┬─ complete/fail ─► settle ─► release
//!                           └─ slot busy ──► queue            └─ suspend ─► store ─► release ─► processor
//! ```
//!
//! `release` hands the slot to the next queued unit, so a suspended
//! execution never holds its environment or a worker thread while it waits.

mod outcome;
mod timers;

#[cfg(test)]
mod tests;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

use super::continuation::{Claim, ContinuationTable};
use super::processor::{Completion, ContinuationProcessor, ProcessorRegistry, TriggerRequest};
use super::{
    Activation, ContinuationState, ContinuationToken, Entry, EnvironmentId, ResumeError,
    ResumeOutcome, Resumption, Scope, ScriptContext, ScriptEnvironment, ScriptError, Step, Trigger,
    TriggerError,
};
use crate::config::ExecutionConfig;
use crate::resource::{CacheEntry, InvalidationListener, ResourceCache, ResourceKey};
use crate::{debug, log};
use timers::TimerService;

/// Counter snapshot for inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub suspended: u64,
    pub resumed: u64,
    pub discarded: u64,
    pub pending: usize,
    /// Continuations of invalidated environments whose result has not
    /// arrived yet.
    pub stale: usize,
    pub busy_environments: usize,
}

#[derive(Default)]
struct Counters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    suspended: AtomicU64,
    resumed: AtomicU64,
    discarded: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

enum Work {
    Start,
    Resume {
        activation: Box<dyn Activation>,
        input: Resumption,
    },
}

/// One runnable piece of work for an environment.
struct Unit {
    environment: Arc<ScriptEnvironment>,
    context: Arc<ScriptContext>,
    entry: Entry,
    work: Work,
    queued_at: Instant,
}

#[derive(Default)]
struct Slot {
    active: bool,
    queue: VecDeque<Unit>,
}

pub(crate) struct Inner {
    pool: rayon::ThreadPool,
    slots: DashMap<EnvironmentId, Slot>,
    continuations: ContinuationTable,
    processors: RwLock<ProcessorRegistry>,
    timers: TimerService,
    counters: Counters,
    max_queued: Duration,
}

/// Handle to the scheduler; clones share one instance.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Non-owning handle held by processors and timers.
#[derive(Clone, Default)]
pub struct WeakScheduler(Weak<Inner>);

impl WeakScheduler {
    pub fn upgrade(&self) -> Option<Scheduler> {
        self.0.upgrade().map(|inner| Scheduler { inner })
    }
}

impl Scheduler {
    /// Build the evaluation pool; processors run on `io`.
    pub fn new(
        config: &ExecutionConfig,
        io: Handle,
        processors: ProcessorRegistry,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_count())
            .thread_name(|index| format!("weaver-eval-{index}"))
            .build()?;

        let inner = Arc::new_cyclic(|weak| Inner {
            pool,
            slots: DashMap::new(),
            continuations: ContinuationTable::default(),
            processors: RwLock::new(processors),
            timers: TimerService::new(WeakScheduler(weak.clone()), io),
            counters: Counters::default(),
            max_queued: config.max_queued(),
        });

        Ok(Self { inner })
    }

    pub fn downgrade(&self) -> WeakScheduler {
        WeakScheduler(Arc::downgrade(&self.inner))
    }

    /// Register or replace the processor for its trigger kind.
    pub fn register_processor(&self, processor: Arc<dyn ContinuationProcessor>) {
        self.inner.processors.write().register(processor);
    }

    /// Retire continuations and timers of environments the cache drops.
    pub fn listen_to(&self, cache: &ResourceCache) {
        let listener: Weak<Inner> = Arc::downgrade(&self.inner);
        cache.subscribe(listener);
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Queue a fresh execution of `entry`, as is.
    pub fn submit(
        &self,
        environment: Arc<ScriptEnvironment>,
        context: Arc<ScriptContext>,
        entry: Entry,
    ) {
        self.enqueue(Unit {
            environment,
            context,
            entry,
            work: Work::Start,
            queued_at: Instant::now(),
        });
    }

    /// Run a handler once the environment is initialized, starting the
    /// initialization if nobody has yet.
    ///
    /// Handlers arriving while initialization is suspended wait for it and
    /// are queued when it settles. If it fails, each waiting context gets
    /// the failure.
    pub fn start(
        &self,
        environment: Arc<ScriptEnvironment>,
        context: Arc<ScriptContext>,
        entry: Entry,
    ) {
        if entry.is_init() || environment.is_initialized() {
            self.submit(environment, context, entry);
            return;
        }

        let scheduler = self.downgrade();
        let waiter_env = Arc::clone(&environment);
        let waiter_ctx = Arc::clone(&context);
        let must_init = environment.on_initialized(Box::new(move |result| {
            let Some(scheduler) = scheduler.upgrade() else {
                return;
            };
            match result {
                Ok(_) => scheduler.submit(waiter_env, waiter_ctx, entry),
                Err(err) => {
                    let err = ScriptError::new(format!("initialization failed: {err}"));
                    scheduler.fail_context(waiter_env.key(), &waiter_ctx, &err);
                }
            }
        }));

        if must_init {
            self.submit(environment, context, Entry::Init);
        }
    }

    // =========================================================================
    // Resumption
    // =========================================================================

    /// Deliver the result for `token` and queue the suspended execution.
    ///
    /// A token whose environment was invalidated, or that outlived
    /// `shutdown`, is discarded (logged, not an error). A token already
    /// resumed is an error for the caller only.
    pub fn resume(
        &self,
        token: ContinuationToken,
        result: Result<Value, TriggerError>,
    ) -> Result<ResumeOutcome, ResumeError> {
        match self.inner.continuations.claim(token) {
            Claim::Pending(state) => {
                if !state.environment.is_alive() {
                    self.discard(token, state.environment.key());
                    return Ok(ResumeOutcome::Discarded);
                }

                let ContinuationState {
                    environment,
                    trigger,
                    context,
                    entry,
                    activation,
                    suspended_at,
                } = state;
                debug!(
                    "continuation";
                    "{} resuming {} after {} ({}ms)",
                    token, context, trigger, suspended_at.elapsed().as_millis()
                );

                let input = match result {
                    Ok(value) => Resumption::Value(value),
                    Err(err) => Resumption::Failure(err),
                };
                self.enqueue(Unit {
                    environment,
                    context,
                    entry,
                    work: Work::Resume { activation, input },
                    queued_at: Instant::now(),
                });
                Ok(ResumeOutcome::Resumed)
            }
            Claim::Discarded(key) => {
                self.discard(token, &key);
                Ok(ResumeOutcome::Discarded)
            }
            Claim::Closed => {
                debug!("continuation"; "discarded result for {}: scheduler was shut down", token);
                Ok(ResumeOutcome::Discarded)
            }
            Claim::Consumed => {
                log!("continuation"; "{} was resumed twice", token);
                Err(ResumeError::AlreadyConsumed(token))
            }
            Claim::Unknown => Err(ResumeError::Unknown(token)),
        }
    }

    fn discard(&self, token: ContinuationToken, owner: &ResourceKey) {
        Counters::bump(&self.inner.counters.discarded);
        log!("continuation"; "discarded result for {}: {} was invalidated", token, owner);
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Tear down what a dead environment left behind: initialization
    /// waiters, armed timers and outstanding continuations.
    pub fn environment_invalidated(&self, environment: &ScriptEnvironment) {
        self.inner.environment_invalidated(environment);
    }

    // =========================================================================
    // Inspection & lifecycle
    // =========================================================================

    pub fn stats(&self) -> SchedulerStats {
        let counters = &self.inner.counters;
        SchedulerStats {
            started: counters.started.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            suspended: counters.suspended.load(Ordering::Relaxed),
            resumed: counters.resumed.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
            pending: self.inner.continuations.pending_count(),
            stale: self.inner.continuations.discarded_count(),
            busy_environments: self.inner.slots.len(),
        }
    }

    /// Continuations waiting on a trigger.
    pub fn outstanding(&self) -> usize {
        self.inner.continuations.pending_count()
    }

    /// Timers armed for `environment`.
    pub fn armed_timers(&self, environment: EnvironmentId) -> usize {
        self.inner.timers.armed(environment)
    }

    /// Cancel every timer and drop pending continuations.
    pub fn shutdown(&self) {
        let timers = self.inner.timers.cancel_all();
        let dropped = self.inner.continuations.clear();
        debug!("schedule"; "shutdown: dropped {} continuations, {} timers", dropped, timers);
    }

    // =========================================================================
    // Slots
    // =========================================================================

    fn enqueue(&self, unit: Unit) {
        let ready = {
            let mut slot = self.inner.slots.entry(unit.environment.id()).or_default();
            if slot.active {
                slot.queue.push_back(unit);
                None
            } else {
                slot.active = true;
                Some(unit)
            }
        };

        if let Some(unit) = ready {
            self.dispatch(unit);
        }
    }

    fn dispatch(&self, unit: Unit) {
        let scheduler = self.clone();
        self.inner.pool.spawn(move || scheduler.run(unit));
    }

    /// Pass the slot to the next queued unit, or mark it idle.
    fn release(&self, id: EnvironmentId) {
        let next = match self.inner.slots.get_mut(&id) {
            Some(mut slot) => {
                let next = slot.queue.pop_front();
                if next.is_none() {
                    slot.active = false;
                }
                next
            }
            None => None,
        };

        match next {
            Some(unit) => self.dispatch(unit),
            None => {
                self.inner
                    .slots
                    .remove_if(&id, |_, slot| !slot.active && slot.queue.is_empty());
            }
        }
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    fn run(&self, unit: Unit) {
        let waited = unit.queued_at.elapsed();
        if waited > self.inner.max_queued {
            log!(
                "schedule";
                "{} ({}) waited {}ms before running",
                unit.context, unit.entry.name(), waited.as_millis()
            );
        }

        let id = unit.environment.id();
        if !unit.environment.is_alive() {
            self.drop_dead(unit);
            self.release(id);
            return;
        }

        let Unit {
            environment,
            context,
            entry,
            work,
            ..
        } = unit;

        let (mut activation, input) = match work {
            Work::Start => match environment.program().activate(&entry) {
                Some(activation) => {
                    Counters::bump(&self.inner.counters.started);
                    (activation, Resumption::Start)
                }
                None => {
                    debug!("schedule"; "{} has no `{}` handler", environment.key(), entry.name());
                    self.settle(&environment, &context, &entry, Ok(Value::Null));
                    self.release(id);
                    return;
                }
            },
            Work::Resume { activation, input } => {
                Counters::bump(&self.inner.counters.resumed);
                (activation, input)
            }
        };

        let mut timers = Vec::new();
        let step = {
            let mut state = environment.lock_state();
            let mut scope = Scope::new(&environment, &mut state.bindings, &context, &mut timers);
            panic::catch_unwind(AssertUnwindSafe(|| activation.step(&mut scope, input)))
                .unwrap_or_else(|_| Step::Failed(ScriptError::new(format!("`{}` panicked", entry.name()))))
        };

        for request in timers {
            self.inner.timers.schedule(&environment, request);
        }

        let result = match step {
            Step::Suspend(trigger) => {
                self.suspend(environment, context, entry, activation, trigger);
                return;
            }
            Step::Complete(value) => Ok(value),
            Step::Failed(err) => Err(err),
        };
        self.settle(&environment, &context, &entry, result);
        self.release(id);
    }

    /// Record the continuation, free the slot, then hand off the trigger.
    fn suspend(
        &self,
        environment: Arc<ScriptEnvironment>,
        context: Arc<ScriptContext>,
        entry: Entry,
        activation: Box<dyn Activation>,
        trigger: Trigger,
    ) {
        let kind = trigger.kind();
        let token = self.inner.continuations.issue();
        self.inner.continuations.store(
            token,
            ContinuationState {
                environment: Arc::clone(&environment),
                trigger: kind,
                context: Arc::clone(&context),
                entry,
                activation,
                suspended_at: Instant::now(),
            },
        );
        Counters::bump(&self.inner.counters.suspended);
        debug!("continuation"; "{} suspended on {} as {}", context, kind, token);

        self.release(environment.id());

        let completion = Completion::new(token, self.downgrade());
        let processor = self.inner.processors.read().get(kind).cloned();
        match processor {
            Some(processor) => processor.perform(
                TriggerRequest {
                    trigger,
                    environment,
                    context,
                },
                completion,
            ),
            None => super::processor::deliver(completion, Err(TriggerError::NoProcessor(kind))),
        }
    }

    /// A unit of an invalidated environment reached the front of its queue.
    fn drop_dead(&self, unit: Unit) {
        match unit.work {
            Work::Resume { .. } => {
                Counters::bump(&self.inner.counters.discarded);
                log!("continuation"; "dropped resumed {} of invalidated {}", unit.entry.name(), unit.environment.key());
            }
            Work::Start if unit.entry.is_init() => {
                unit.environment.abandon_initialization();
            }
            Work::Start => {
                let err = ScriptError::new(format!("{} was invalidated", unit.environment.key()));
                self.fail_context(unit.environment.key(), &unit.context, &err);
            }
        }
    }
}

impl Inner {
    fn environment_invalidated(&self, environment: &ScriptEnvironment) {
        environment.retire();
        let waiters = environment.abandon_initialization();
        let timers = self.timers.cancel(environment.id());
        if waiters > 0 || timers > 0 {
            debug!(
                "schedule";
                "{}: failed {} init waiters, cancelled {} timers",
                environment.key(), waiters, timers
            );
        }

        let retired = self
            .continuations
            .retire(|state| state.environment.id() == environment.id());
        for (token, key) in retired {
            log!("continuation"; "{} of {} marked discarded", token, key);
        }
    }
}

impl InvalidationListener for Inner {
    fn invalidated(&self, removed: &[Arc<CacheEntry>]) {
        for entry in removed {
            if let Some(environment) = entry.artifact().as_environment() {
                self.environment_invalidated(environment);
            }
        }
    }
}
