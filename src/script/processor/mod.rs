//! Continuation processors: one per trigger kind.
//!
//! # Module Structure
//!
//! ```text
//! processor/
//! ├── module.rs    # RequiredModuleProcessor (cache load + initialization)
//! ├── http.rs      # HttpProcessor, HttpTransport, UreqTransport
//! ├── message.rs   # ClientMessageProcessor, ConnectionHub
//! └── timer.rs     # TimerProcessor
//! ```
//!
//! A processor receives the trigger payload and a [`Completion`]. It must not
//! block the calling (evaluation) thread: the actual work goes to the I/O
//! runtime, which calls [`Completion::complete`] when done.

mod http;
mod message;
mod module;
mod timer;

pub use http::{HttpProcessor, HttpReply, HttpTransport, UreqTransport};
pub use message::{ClientMessageProcessor, ConnectionHub};
pub use module::RequiredModuleProcessor;
pub use timer::TimerProcessor;

use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

use super::scheduler::WeakScheduler;
use super::{
    ContinuationToken, ResumeError, ResumeOutcome, ScriptContext, ScriptEnvironment, Trigger,
    TriggerError, TriggerKind,
};
use crate::debug;

/// Everything a processor knows about one suspend.
pub struct TriggerRequest {
    pub trigger: Trigger,
    /// Environment that suspended.
    pub environment: Arc<ScriptEnvironment>,
    pub context: Arc<ScriptContext>,
}

/// Performs the side effect for one trigger kind.
pub trait ContinuationProcessor: Send + Sync {
    fn kind(&self) -> TriggerKind;

    fn perform(&self, request: TriggerRequest, completion: Completion);
}

/// Dispatch table keyed by trigger kind.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: FxHashMap<TriggerKind, Arc<dyn ContinuationProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, processor: Arc<dyn ContinuationProcessor>) -> &mut Self {
        self.processors.insert(processor.kind(), processor);
        self
    }

    pub fn get(&self, kind: TriggerKind) -> Option<&Arc<dyn ContinuationProcessor>> {
        self.processors.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

/// The one-shot callback a processor delivers its result through.
///
/// `complete` takes `self`, so a result is delivered at most once. Dropping
/// an unused completion resumes the script with [`TriggerError::Abandoned`].
pub struct Completion {
    token: ContinuationToken,
    scheduler: WeakScheduler,
    done: bool,
}

impl Completion {
    pub(crate) fn new(token: ContinuationToken, scheduler: WeakScheduler) -> Self {
        Self {
            token,
            scheduler,
            done: false,
        }
    }

    pub fn token(&self) -> ContinuationToken {
        self.token
    }

    /// Scheduler the continuation belongs to.
    pub fn scheduler(&self) -> &WeakScheduler {
        &self.scheduler
    }

    pub fn complete(
        mut self,
        result: Result<Value, TriggerError>,
    ) -> Result<ResumeOutcome, ResumeError> {
        self.done = true;
        let scheduler = self.scheduler.upgrade().ok_or(ResumeError::ShutDown)?;
        scheduler.resume(self.token, result)
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(scheduler) = self.scheduler.upgrade() {
            debug!("continuation"; "{} dropped without a result", self.token);
            let _ = scheduler.resume(self.token, Err(TriggerError::Abandoned));
        }
    }
}

/// Finish `completion`, logging delivery problems.
pub(crate) fn deliver(completion: Completion, result: Result<Value, TriggerError>) {
    let token = completion.token();
    if let Err(err) = completion.complete(result) {
        debug!("continuation"; "could not deliver {}: {}", token, err);
    }
}
