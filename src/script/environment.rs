//! Script environments: compiled code plus its mutable bindings.

use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::{Bindings, Program, ScriptError};
use crate::resource::ResourceKey;

/// Process-unique identity of one environment instance.
///
/// A reloaded script gets a new id under the same [`ResourceKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvironmentId(u64);

impl EnvironmentId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env#{}", self.0)
    }
}

/// Called once initialization settles, with the exports or the failure.
pub type InitWaiter = Box<dyn FnOnce(Result<Value, ScriptError>) + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    Pending,
    Running,
    Ready,
    Failed(ScriptError),
}

pub struct EnvironmentState {
    pub(crate) bindings: Bindings,
    init: InitState,
    waiters: Vec<InitWaiter>,
}

/// Owns one compiled script's executable state.
pub struct ScriptEnvironment {
    id: EnvironmentId,
    key: ResourceKey,
    program: Arc<dyn Program>,
    source_hash: String,
    alive: AtomicBool,
    state: Mutex<EnvironmentState>,
}

impl ScriptEnvironment {
    pub fn new(key: ResourceKey, program: Arc<dyn Program>, source_hash: impl Into<String>) -> Self {
        Self {
            id: EnvironmentId::next(),
            key,
            program,
            source_hash: source_hash.into(),
            alive: AtomicBool::new(true),
            state: Mutex::new(EnvironmentState {
                bindings: Bindings::default(),
                init: InitState::Pending,
                waiters: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> EnvironmentId {
        self.id
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn program(&self) -> &Arc<dyn Program> {
        &self.program
    }

    /// Hash of the source this environment was compiled from.
    pub fn source_hash(&self) -> &str {
        &self.source_hash
    }

    /// `false` once the cache entry owning this environment was invalidated.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn retire(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, EnvironmentState> {
        self.state.lock()
    }

    pub fn init_state(&self) -> InitState {
        self.state.lock().init.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().init == InitState::Ready
    }

    pub fn exports(&self) -> Value {
        Value::Object(self.state.lock().bindings.exports.clone())
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.state.lock().bindings.globals.get(name).cloned()
    }

    /// Run `waiter` once initialization settles.
    ///
    /// Returns `true` if the caller must start initialization: the first
    /// waiter on a pending environment moves it to running.
    pub fn on_initialized(&self, waiter: InitWaiter) -> bool {
        let mut state = self.state.lock();
        // Checked under the lock: `abandon_initialization` takes the same
        // lock after `retire`, so a waiter queued here is always seen by it.
        if !self.is_alive() {
            drop(state);
            waiter(Err(self.retired_error()));
            return false;
        }

        match &state.init {
            InitState::Ready => {
                let exports = Value::Object(state.bindings.exports.clone());
                drop(state);
                waiter(Ok(exports));
                false
            }
            InitState::Failed(err) => {
                let err = err.clone();
                drop(state);
                waiter(Err(err));
                false
            }
            InitState::Running => {
                state.waiters.push(waiter);
                false
            }
            InitState::Pending => {
                state.init = InitState::Running;
                state.waiters.push(waiter);
                true
            }
        }
    }

    /// Settle initialization and wake every waiter outside the lock.
    pub fn finish_initialization(&self, result: Result<(), ScriptError>) {
        let (waiters, outcome) = {
            let mut state = self.state.lock();
            state.init = match &result {
                Ok(()) => InitState::Ready,
                Err(err) => InitState::Failed(err.clone()),
            };
            let outcome = result.map(|()| Value::Object(state.bindings.exports.clone()));
            (std::mem::take(&mut state.waiters), outcome)
        };

        for waiter in waiters {
            waiter(outcome.clone());
        }
    }

    /// Fail every waiter of a retired environment, and every later one.
    pub(crate) fn abandon_initialization(&self) -> usize {
        let error = self.retired_error();
        let waiters = {
            let mut state = self.state.lock();
            if state.init != InitState::Ready {
                state.init = InitState::Failed(error.clone());
            }
            std::mem::take(&mut state.waiters)
        };
        let count = waiters.len();
        for waiter in waiters {
            waiter(Err(error.clone()));
        }
        count
    }

    fn retired_error(&self) -> ScriptError {
        ScriptError::new(format!("{} was invalidated", self.key))
    }
}

impl fmt::Debug for ScriptEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEnvironment")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::testing::NoopProgram;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    fn environment() -> ScriptEnvironment {
        ScriptEnvironment::new(ResourceKey::script("env.js"), Arc::new(NoopProgram), "hash")
    }

    #[test]
    fn test_first_waiter_starts_initialization() {
        let env = environment();
        let seen = Arc::new(PlMutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        assert!(env.on_initialized(Box::new(move |r| first.lock().push(r.is_ok()))));
        let second = Arc::clone(&seen);
        assert!(!env.on_initialized(Box::new(move |r| second.lock().push(r.is_ok()))));
        assert_eq!(env.init_state(), InitState::Running);
        assert!(seen.lock().is_empty());

        env.finish_initialization(Ok(()));
        assert_eq!(*seen.lock(), vec![true, true]);
        assert!(env.is_initialized());
    }

    #[test]
    fn test_waiter_after_ready_runs_immediately() {
        let env = environment();
        env.lock_state()
            .bindings
            .exports
            .insert("answer".into(), Value::from(42));
        assert!(env.on_initialized(Box::new(|_| {})));
        env.finish_initialization(Ok(()));

        let got = Arc::new(PlMutex::new(None));
        let sink = Arc::clone(&got);
        assert!(!env.on_initialized(Box::new(move |r| *sink.lock() = Some(r))));
        let exports = got.lock().take().unwrap().unwrap();
        assert_eq!(exports["answer"], 42);
    }

    #[test]
    fn test_failed_initialization_is_sticky() {
        let env = environment();
        assert!(env.on_initialized(Box::new(|r| assert!(r.is_err()))));
        env.finish_initialization(Err(ScriptError::new("boom")));

        let failed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&failed);
        env.on_initialized(Box::new(move |r| flag.store(r.is_err(), Ordering::SeqCst)));
        assert!(failed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_retired_environment_rejects_waiters() {
        let env = environment();
        let rejected = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&rejected);
        env.on_initialized(Box::new(move |r| flag.store(r.is_err(), Ordering::SeqCst)));
        assert!(!rejected.load(Ordering::SeqCst));

        env.retire();
        assert_eq!(env.abandon_initialization(), 1);
        assert!(rejected.load(Ordering::SeqCst));
        assert!(!env.on_initialized(Box::new(|r| assert!(r.is_err()))));
        assert!(matches!(
            env.init_state(),
            InitState::Failed(err) if err.message().contains("invalidated")
        ));
    }

    #[test]
    fn test_waiters_racing_invalidation_all_settle() {
        const WAITERS: usize = 64;

        for _ in 0..20 {
            let env = Arc::new(environment());
            let settled = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(WAITERS + 1));

            let threads: Vec<_> = (0..WAITERS)
                .map(|_| {
                    let (env, settled, barrier) =
                        (Arc::clone(&env), Arc::clone(&settled), Arc::clone(&barrier));
                    thread::spawn(move || {
                        barrier.wait();
                        env.on_initialized(Box::new(move |r| {
                            assert!(r.is_err());
                            settled.fetch_add(1, Ordering::SeqCst);
                        }));
                    })
                })
                .collect();

            barrier.wait();
            env.retire();
            env.abandon_initialization();
            for handle in threads {
                handle.join().unwrap();
            }

            // nobody finishes the init: every waiter was failed by abandon
            // or rejected on arrival
            assert_eq!(settled.load(Ordering::SeqCst), WAITERS);
        }
    }
}
