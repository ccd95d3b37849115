//! The seam between the scheduler and a script evaluator.
//!
//! A compiled [`Program`] hands out [`Activation`]s. An activation is an
//! explicit state machine: each `step` runs until the script finishes, fails,
//! or needs an asynchronous result. On suspend the scheduler parks the
//! activation itself inside a continuation and re-enters it with the result.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{ScriptContext, ScriptEnvironment, ScriptError, TriggerError};
use crate::resource::ResourceKey;
use crate::{debug, log};

/// Where an activation starts.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Top-level statements, run once per environment.
    Init,
    /// A named handler with its argument.
    Handler { name: String, argument: Value },
}

impl Entry {
    pub fn handler(name: impl Into<String>, argument: Value) -> Self {
        Self::Handler {
            name: name.into(),
            argument,
        }
    }

    pub const fn is_init(&self) -> bool {
        matches!(self, Self::Init)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Init => "init",
            Self::Handler { name, .. } => name,
        }
    }
}

/// Category of asynchronous operation a script waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    RequireModule,
    HttpCall,
    ClientMessage,
    Timer,
}

impl TriggerKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::RequireModule => "require",
            Self::HttpCall => "http",
            Self::ClientMessage => "client message",
            Self::Timer => "timer",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outbound HTTP call requested by a script.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpCall {
    pub method: String,
    pub url: String,
    pub body: Option<Value>,
}

/// Payload of a suspend.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    RequireModule { identifier: String },
    HttpCall(HttpCall),
    ClientMessage,
    Timer { delay: Duration },
}

impl Trigger {
    pub const fn kind(&self) -> TriggerKind {
        match self {
            Self::RequireModule { .. } => TriggerKind::RequireModule,
            Self::HttpCall(_) => TriggerKind::HttpCall,
            Self::ClientMessage => TriggerKind::ClientMessage,
            Self::Timer { .. } => TriggerKind::Timer,
        }
    }
}

/// Input to one `step`.
#[derive(Debug, Clone)]
pub enum Resumption {
    /// First step of a fresh activation.
    Start,
    /// Result of the trigger the activation suspended on.
    Value(Value),
    /// The trigger failed; surfaced to the script at its suspend point.
    Failure(TriggerError),
}

/// How a step ended.
#[derive(Debug)]
pub enum Step {
    Complete(Value),
    Suspend(Trigger),
    Failed(ScriptError),
}

/// Compiled script, shared by every activation of one environment.
pub trait Program: Send + Sync {
    /// Fresh activation for `entry`, or `None` if the program has no such
    /// handler.
    fn activate(&self, entry: &Entry) -> Option<Box<dyn Activation>>;

    fn has_handler(&self, name: &str) -> bool;
}

/// One suspended-or-running execution of a program.
pub trait Activation: Send + Sync {
    fn step(&mut self, scope: &mut Scope<'_>, input: Resumption) -> Step;
}

/// Turns source text into a [`Program`].
pub trait ScriptCompiler: Send + Sync {
    fn compile(&self, name: &str, source: &str) -> Result<Arc<dyn Program>, String>;
}

/// Timer a step asked for; the scheduler arms it after the step returns.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerRequest {
    pub delay: Duration,
    pub handler: String,
    pub repeat: bool,
}

/// Mutable per-environment state a step may touch.
#[derive(Debug, Default)]
pub struct Bindings {
    pub globals: Map<String, Value>,
    pub exports: Map<String, Value>,
}

/// Synchronous host capabilities available during one step.
pub struct Scope<'a> {
    environment: &'a ScriptEnvironment,
    bindings: &'a mut Bindings,
    context: &'a Arc<ScriptContext>,
    timers: &'a mut Vec<TimerRequest>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(
        environment: &'a ScriptEnvironment,
        bindings: &'a mut Bindings,
        context: &'a Arc<ScriptContext>,
        timers: &'a mut Vec<TimerRequest>,
    ) -> Self {
        Self {
            environment,
            bindings,
            context,
            timers,
        }
    }

    pub fn environment_key(&self) -> &ResourceKey {
        self.environment.key()
    }

    pub fn context(&self) -> &ScriptContext {
        self.context
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.bindings.globals.get(name)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.bindings.globals.insert(name.to_string(), value);
    }

    pub fn export(&mut self, name: &str, value: Value) {
        self.bindings.exports.insert(name.to_string(), value);
    }

    /// Output for whoever caused this execution: the document being
    /// rendered, or the connection at the root of the chain.
    pub fn emit(&mut self, text: &str) {
        match self.context.root().payload() {
            super::ContextPayload::DocumentRequest(request) => request.append(text),
            super::ContextPayload::Connection(connection) => {
                if let Err(err) = connection.send(text) {
                    debug!("script"; "emit to {} failed: {}", connection.id(), err);
                }
            }
            super::ContextPayload::ModuleInitialization(_)
            | super::ContextPayload::InternalExecution(_) => {
                log!("script"; "{}: {}", self.environment.key(), text);
            }
        }
    }

    /// Message to the nearest connection in the context chain.
    pub fn send(&mut self, text: &str) -> Result<(), ScriptError> {
        let connection = self
            .context
            .nearest_connection()
            .ok_or_else(|| ScriptError::new("send needs a connection"))?;
        connection
            .send(text)
            .map_err(|err| ScriptError::new(format!("send failed: {err}")))
    }

    pub fn schedule(&mut self, delay: Duration, handler: &str, repeat: bool) {
        self.timers.push(TimerRequest {
            delay,
            handler: handler.to_string(),
            repeat,
        });
    }
}
