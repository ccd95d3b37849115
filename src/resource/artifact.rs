//! Cached artifact values.

use std::fmt;
use std::sync::Arc;

use super::file::{SpecSource, StaticFile};
use crate::script::ScriptEnvironment;

/// The value a creator produced for a key.
///
/// Cloning shares the instance; [`Artifact::ptr_eq`] tells instances apart.
#[derive(Clone)]
pub enum Artifact {
    Static(Arc<StaticFile>),
    Environment(Arc<ScriptEnvironment>),
    Spec(Arc<SpecSource>),
}

impl Artifact {
    pub fn as_static(&self) -> Option<&Arc<StaticFile>> {
        match self {
            Self::Static(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_environment(&self) -> Option<&Arc<ScriptEnvironment>> {
        match self {
            Self::Environment(env) => Some(env),
            _ => None,
        }
    }

    /// Same instance, not just equal contents.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Static(a), Self::Static(b)) => Arc::ptr_eq(a, b),
            (Self::Environment(a), Self::Environment(b)) => Arc::ptr_eq(a, b),
            (Self::Spec(a), Self::Spec(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Called once when the owning entry leaves the cache.
    pub(crate) fn retire(&self) {
        if let Self::Environment(env) = self {
            env.retire();
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Static(_) => "static file",
            Self::Environment(_) => "script environment",
            Self::Spec(_) => "spec source",
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(file) => f
                .debug_tuple("Static")
                .field(&file.path())
                .field(&file.hash())
                .finish(),
            Self::Environment(env) => f.debug_tuple("Environment").field(env).finish(),
            Self::Spec(spec) => f.debug_tuple("Spec").field(&spec.name()).finish(),
        }
    }
}
