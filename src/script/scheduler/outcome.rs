//! Turning a finished step into an outward-visible signal.
//!
//! Each outcome reaches exactly one observer: initialization waiters, the
//! document request, the connection, or the log.

use serde_json::Value;
use std::sync::Arc;

use super::{Counters, Scheduler};
use crate::resource::ResourceKey;
use crate::script::{ContextPayload, Entry, ScriptContext, ScriptEnvironment, ScriptError};
use crate::{debug, log};

impl Scheduler {
    /// Handle an execution that completed or failed.
    pub(super) fn settle(
        &self,
        environment: &Arc<ScriptEnvironment>,
        context: &Arc<ScriptContext>,
        entry: &Entry,
        result: Result<Value, ScriptError>,
    ) {
        let counters = &self.inner.counters;
        match (entry, result) {
            (Entry::Init, Ok(_)) => {
                Counters::bump(&counters.completed);
                debug!("schedule"; "{} initialized", environment.key());
                environment.finish_initialization(Ok(()));
            }
            (Entry::Init, Err(err)) => {
                Counters::bump(&counters.failed);
                log!("script"; "{} failed to initialize: {}", environment.key(), err);
                environment.finish_initialization(Err(err));
            }
            (Entry::Handler { name, .. }, Ok(_)) => {
                Counters::bump(&counters.completed);
                match context.payload() {
                    ContextPayload::DocumentRequest(request) => request.respond(),
                    _ => debug!("schedule"; "`{}` finished for {}", name, context),
                }
            }
            (Entry::Handler { .. }, Err(err)) => {
                Counters::bump(&counters.failed);
                self.fail_context(environment.key(), context, &err);
            }
        }
    }

    /// Report an evaluation failure to the context that caused it.
    pub(super) fn fail_context(
        &self,
        environment: &ResourceKey,
        context: &ScriptContext,
        error: &ScriptError,
    ) {
        match context.root().payload() {
            ContextPayload::DocumentRequest(request) => {
                debug!("script"; "{} failed for {}: {}", environment, request.describe(), error);
                request.respond_error(error);
            }
            ContextPayload::Connection(connection) => {
                debug!("script"; "{} failed for {}: {}", environment, connection.id(), error);
                connection.report_failure(error);
            }
            ContextPayload::ModuleInitialization(module) => {
                log!("script"; "{} failed while requiring `{}`: {}", environment, module.identifier, error);
            }
            ContextPayload::InternalExecution(internal) => {
                log!("script"; "{} failed ({}): {}", environment, internal.reason, error);
            }
        }
    }
}
