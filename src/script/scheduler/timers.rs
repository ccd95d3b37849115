//! `after`/`every` timers armed by scripts.
//!
//! Each timer is a task on the I/O runtime that starts its handler through
//! the scheduler in an internal context. Timers are tracked per environment
//! and aborted when that environment is invalidated.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use super::WeakScheduler;
use crate::debug;
use crate::script::{Entry, EnvironmentId, ScriptContext, ScriptEnvironment, TimerRequest};

pub(super) struct TimerService {
    scheduler: WeakScheduler,
    io: Handle,
    armed: DashMap<EnvironmentId, Vec<AbortHandle>>,
}

impl TimerService {
    pub fn new(scheduler: WeakScheduler, io: Handle) -> Self {
        Self {
            scheduler,
            io,
            armed: DashMap::new(),
        }
    }

    pub fn schedule(&self, environment: &Arc<ScriptEnvironment>, request: TimerRequest) {
        if !environment.is_alive() {
            return;
        }

        let scheduler = self.scheduler.clone();
        let owner = Arc::clone(environment);
        debug!(
            "schedule";
            "{} armed `{}` ({}ms, {})",
            owner.key(),
            request.handler,
            request.delay.as_millis(),
            if request.repeat { "repeating" } else { "once" }
        );

        let task = self.io.spawn(async move {
            loop {
                tokio::time::sleep(request.delay).await;
                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };
                if !owner.is_alive() {
                    break;
                }

                let reason = format!("timer `{}`", request.handler);
                let context = ScriptContext::internal(owner.key().clone(), reason);
                let entry = Entry::handler(request.handler.clone(), Value::Null);
                scheduler.start(Arc::clone(&owner), context, entry);

                if !request.repeat {
                    break;
                }
            }
        });

        let mut handles = self.armed.entry(environment.id()).or_default();
        handles.retain(|handle| !handle.is_finished());
        handles.push(task.abort_handle());
    }

    /// Abort every timer of `environment`. Returns how many were live.
    pub fn cancel(&self, environment: EnvironmentId) -> usize {
        let Some((_, handles)) = self.armed.remove(&environment) else {
            return 0;
        };
        Self::abort(handles)
    }

    pub fn cancel_all(&self) -> usize {
        let ids: Vec<_> = self.armed.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().map(|id| self.cancel(id)).sum()
    }

    pub fn armed(&self, environment: EnvironmentId) -> usize {
        self.armed.get(&environment).map_or(0, |handles| {
            handles.iter().filter(|handle| !handle.is_finished()).count()
        })
    }

    fn abort(handles: Vec<AbortHandle>) -> usize {
        let mut live = 0;
        for handle in handles {
            if !handle.is_finished() {
                live += 1;
            }
            handle.abort();
        }
        live
    }
}
