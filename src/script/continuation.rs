//! Suspended executions awaiting a trigger result.
//!
//! A [`ContinuationState`] owns the suspended [`Activation`] itself, so the
//! only way to resume it is to claim its token from the table. Claiming
//! removes the entry: a token resumes at most once.
//!
//! Invalidation moves the entries of dead environments into a discarded
//! table, so a late result can be told apart from a double resume. After
//! shutdown every issued token claims as closed.

use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use super::{Activation, Entry, ScriptContext, ScriptEnvironment, TriggerKind};
use crate::resource::ResourceKey;

/// Opaque single-use resumption token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContinuationToken(u64);

impl ContinuationToken {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A captured suspension point.
pub struct ContinuationState {
    pub(crate) environment: Arc<ScriptEnvironment>,
    pub(crate) trigger: TriggerKind,
    pub(crate) context: Arc<ScriptContext>,
    pub(crate) entry: Entry,
    pub(crate) activation: Box<dyn Activation>,
    pub(crate) suspended_at: Instant,
}

impl ContinuationState {
    pub fn environment(&self) -> &Arc<ScriptEnvironment> {
        &self.environment
    }

    pub fn trigger(&self) -> TriggerKind {
        self.trigger
    }

    pub fn context(&self) -> &Arc<ScriptContext> {
        &self.context
    }
}

impl fmt::Debug for ContinuationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuationState")
            .field("environment", self.environment.key())
            .field("trigger", &self.trigger)
            .field("entry", &self.entry.name())
            .field("suspended_ms", &self.suspended_at.elapsed().as_millis())
            .finish()
    }
}

/// Result of a successful `resume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Queued to run with the injected result.
    Resumed,
    /// Owner was invalidated; the result was dropped.
    Discarded,
}

/// What the table knew about a token.
#[derive(Debug)]
pub(crate) enum Claim {
    Pending(ContinuationState),
    Discarded(ResourceKey),
    /// Issued before the table was cleared at shutdown.
    Closed,
    Consumed,
    Unknown,
}

#[derive(Default)]
pub(crate) struct ContinuationTable {
    next: AtomicU64,
    pending: DashMap<ContinuationToken, ContinuationState>,
    discarded: DashMap<ContinuationToken, ResourceKey>,
    closed: AtomicBool,
}

impl ContinuationTable {
    pub fn issue(&self) -> ContinuationToken {
        ContinuationToken(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn store(&self, token: ContinuationToken, state: ContinuationState) {
        self.pending.insert(token, state);
    }

    /// Take the state for `token`. Succeeds once per issued token.
    pub fn claim(&self, token: ContinuationToken) -> Claim {
        if let Some((_, state)) = self.pending.remove(&token) {
            self.discarded.remove(&token);
            return Claim::Pending(state);
        }
        if let Some((_, key)) = self.discarded.remove(&token) {
            return Claim::Discarded(key);
        }
        if token.0 == 0 || token.0 > self.next.load(Ordering::Relaxed) {
            Claim::Unknown
        } else if self.closed.load(Ordering::Acquire) {
            Claim::Closed
        } else {
            Claim::Consumed
        }
    }

    /// Mark every pending continuation matching `dead` as discarded.
    pub fn retire(
        &self,
        dead: impl Fn(&ContinuationState) -> bool,
    ) -> Vec<(ContinuationToken, ResourceKey)> {
        let doomed: Vec<_> = self
            .pending
            .iter()
            .filter(|entry| dead(entry.value()))
            .map(|entry| (*entry.key(), entry.environment.key().clone()))
            .collect();

        let mut retired = Vec::with_capacity(doomed.len());
        for (token, key) in doomed {
            // Recorded first: a concurrent claim must find one of the two.
            self.discarded.insert(token, key.clone());
            if self.pending.remove(&token).is_some() {
                retired.push((token, key));
            } else {
                self.discarded.remove(&token);
            }
        }
        retired
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn discarded_count(&self) -> usize {
        self.discarded.len()
    }

    /// Drop everything (shutdown). Returns how many were still pending.
    pub fn clear(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let count = self.pending.len();
        self.pending.clear();
        self.discarded.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::testing::NoopProgram;
    use crate::script::{Program, ScriptContext};

    fn state(environment: &Arc<ScriptEnvironment>) -> ContinuationState {
        let entry = Entry::Init;
        ContinuationState {
            environment: Arc::clone(environment),
            trigger: TriggerKind::Timer,
            context: ScriptContext::internal(environment.key().clone(), "test"),
            activation: NoopProgram.activate(&entry).unwrap(),
            entry,
            suspended_at: Instant::now(),
        }
    }

    fn environment(name: &str) -> Arc<ScriptEnvironment> {
        Arc::new(ScriptEnvironment::new(
            ResourceKey::script(name),
            Arc::new(NoopProgram),
            "",
        ))
    }

    #[test]
    fn test_token_claims_once() {
        let table = ContinuationTable::default();
        let env = environment("a.js");
        let token = table.issue();
        table.store(token, state(&env));

        assert!(matches!(table.claim(token), Claim::Pending(_)));
        assert!(matches!(table.claim(token), Claim::Consumed));
        assert_eq!(table.pending_count(), 0);
    }

    #[test]
    fn test_unissued_token_is_unknown() {
        let table = ContinuationTable::default();
        table.issue();
        assert!(matches!(
            table.claim(ContinuationToken(99)),
            Claim::Unknown
        ));
        assert!(matches!(table.claim(ContinuationToken(0)), Claim::Unknown));
    }

    #[test]
    fn test_retire_moves_dead_environments() {
        let table = ContinuationTable::default();
        let (live, dead) = (environment("live.js"), environment("dead.js"));
        let (kept, dropped) = (table.issue(), table.issue());
        table.store(kept, state(&live));
        table.store(dropped, state(&dead));

        dead.retire();
        let retired = table.retire(|state| !state.environment.is_alive());

        assert_eq!(retired, vec![(dropped, dead.key().clone())]);
        assert_eq!(table.pending_count(), 1);
        assert!(matches!(table.claim(dropped), Claim::Discarded(key) if key == *dead.key()));
        assert!(matches!(table.claim(dropped), Claim::Consumed));
        assert!(matches!(table.claim(kept), Claim::Pending(_)));
    }

    #[test]
    fn test_claims_after_clear_are_closed() {
        let table = ContinuationTable::default();
        let (env, gone) = (environment("a.js"), environment("gone.js"));
        let (waiting, claimed, retired) = (table.issue(), table.issue(), table.issue());
        table.store(waiting, state(&env));
        table.store(claimed, state(&env));
        table.store(retired, state(&gone));
        assert!(matches!(table.claim(claimed), Claim::Pending(_)));
        gone.retire();
        table.retire(|state| !state.environment.is_alive());
        assert_eq!(table.discarded_count(), 1);

        assert_eq!(table.clear(), 1);
        assert_eq!(table.discarded_count(), 0);
        for token in [waiting, claimed, retired] {
            assert!(matches!(table.claim(token), Claim::Closed));
        }
        assert!(matches!(table.claim(ContinuationToken(99)), Claim::Unknown));
    }
}
