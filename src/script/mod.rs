//! Script execution: contexts, environments, continuations and the
//! scheduler that drives them.
//!
//! # Module Structure
//!
//! ```text
//! script/
//! ├── program.rs       # Program/Activation seam, Scope, triggers
//! ├── context.rs       # ScriptContext chain
//! ├── environment.rs   # ScriptEnvironment (bindings, initialization)
//! ├── continuation.rs  # ContinuationToken, ContinuationState, table
//! ├── host.rs          # DocumentRequest / Connection interfaces
//! ├── processor/       # One ContinuationProcessor per trigger kind
//! ├── scheduler/       # Single-active-execution scheduler, timers
//! └── directive/       # Bundled line-oriented script language
//! ```

mod context;
mod continuation;
pub mod directive;
mod environment;
mod error;
mod host;
pub mod processor;
mod program;
mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{ContextKind, ContextPayload, InternalExecution, RequiredModule, ScriptContext};
pub use continuation::{ContinuationState, ContinuationToken, ResumeOutcome};
pub use directive::DirectiveCompiler;
pub use environment::{EnvironmentId, InitState, InitWaiter, ScriptEnvironment};
pub use error::{ResumeError, ScriptError, TriggerError};
pub use host::{Connection, ConnectionId, DocumentRequest, HostError};
pub use program::{
    Activation, Bindings, Entry, HttpCall, Program, Resumption, Scope, ScriptCompiler, Step,
    TimerRequest, Trigger, TriggerKind,
};
pub use scheduler::{Scheduler, SchedulerStats, WeakScheduler};
