//! Why a script is running.
//!
//! Every execution unit carries a [`ScriptContext`]. Contexts form a
//! singly-linked chain: a module initialization started by a document request
//! points at that request's context, so output and failures can be routed to
//! whoever ultimately caused the work.

use std::fmt;
use std::sync::Arc;

use super::host::{Connection, DocumentRequest};
use crate::resource::ResourceKey;

/// Module being initialized on behalf of a requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredModule {
    pub identifier: String,
    pub requester: ResourceKey,
}

/// Work the server started by itself (timers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalExecution {
    pub reason: String,
}

/// Exactly one payload per context; the enum makes any other count
/// unrepresentable.
#[derive(Clone)]
pub enum ContextPayload {
    DocumentRequest(Arc<dyn DocumentRequest>),
    Connection(Arc<dyn Connection>),
    ModuleInitialization(RequiredModule),
    InternalExecution(InternalExecution),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    DocumentRequest,
    Connection,
    ModuleInitialization,
    InternalExecution,
}

impl ContextPayload {
    pub const fn kind(&self) -> ContextKind {
        match self {
            Self::DocumentRequest(_) => ContextKind::DocumentRequest,
            Self::Connection(_) => ContextKind::Connection,
            Self::ModuleInitialization(_) => ContextKind::ModuleInitialization,
            Self::InternalExecution(_) => ContextKind::InternalExecution,
        }
    }
}

impl fmt::Display for ContextPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DocumentRequest(request) => write!(f, "request {}", request.describe()),
            Self::Connection(connection) => write!(f, "{}", connection.id()),
            Self::ModuleInitialization(module) => {
                write!(f, "require `{}` from {}", module.identifier, module.requester)
            }
            Self::InternalExecution(internal) => f.write_str(&internal.reason),
        }
    }
}

/// Immutable frame describing one execution's cause.
pub struct ScriptContext {
    parent: Option<Arc<ScriptContext>>,
    environment: ResourceKey,
    payload: ContextPayload,
}

impl ScriptContext {
    pub fn new(
        parent: Option<Arc<ScriptContext>>,
        environment: ResourceKey,
        payload: ContextPayload,
    ) -> Arc<Self> {
        Arc::new(Self {
            parent,
            environment,
            payload,
        })
    }

    pub fn document_request(environment: ResourceKey, request: Arc<dyn DocumentRequest>) -> Arc<Self> {
        Self::new(None, environment, ContextPayload::DocumentRequest(request))
    }

    pub fn connection(environment: ResourceKey, connection: Arc<dyn Connection>) -> Arc<Self> {
        Self::new(None, environment, ContextPayload::Connection(connection))
    }

    pub fn module_initialization(
        parent: Arc<ScriptContext>,
        environment: ResourceKey,
        module: RequiredModule,
    ) -> Arc<Self> {
        Self::new(
            Some(parent),
            environment,
            ContextPayload::ModuleInitialization(module),
        )
    }

    pub fn internal(environment: ResourceKey, reason: impl Into<String>) -> Arc<Self> {
        Self::new(
            None,
            environment,
            ContextPayload::InternalExecution(InternalExecution {
                reason: reason.into(),
            }),
        )
    }

    pub fn parent(&self) -> Option<&Arc<ScriptContext>> {
        self.parent.as_ref()
    }

    /// Environment this context runs in.
    pub fn environment(&self) -> &ResourceKey {
        &self.environment
    }

    pub fn payload(&self) -> &ContextPayload {
        &self.payload
    }

    pub fn kind(&self) -> ContextKind {
        self.payload.kind()
    }

    /// This context, then each parent up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = &ScriptContext> {
        std::iter::successors(Some(self), |context| context.parent.as_deref())
    }

    /// The triggering event at the top of the chain.
    pub fn root(&self) -> &ScriptContext {
        self.ancestors().last().unwrap_or(self)
    }

    pub fn depth(&self) -> usize {
        self.ancestors().count()
    }

    /// Nearest connection in the chain.
    pub fn nearest_connection(&self) -> Option<&Arc<dyn Connection>> {
        self.ancestors().find_map(|context| match &context.payload {
            ContextPayload::Connection(connection) => Some(connection),
            _ => None,
        })
    }
}

impl fmt::Display for ScriptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.payload, self.environment)
    }
}

impl fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptContext")
            .field("kind", &self.kind())
            .field("environment", &self.environment)
            .field("depth", &self.depth())
            .finish()
    }
}
