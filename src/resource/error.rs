//! Resource creation errors.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use super::{ResourceKey, ResourceKind};

/// Why a resource could not be created.
///
/// Failures are never cached: the key stays absent and the next `load`
/// retries. Concurrent waiters share one instance through `Arc`.
#[derive(Debug, Error)]
pub enum CreateError {
    #[error("no creator registered for {0} resources")]
    NoCreator(ResourceKind),

    #[error("no creator claims {0}")]
    Unclaimed(ResourceKey),

    #[error("{0} not found")]
    NotFound(ResourceKey),

    #[error("IO error when reading `{}`", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("{key} is not valid UTF-8")]
    Encoding { key: ResourceKey },

    #[error("failed to compile {key}: {message}")]
    Compile { key: ResourceKey, message: String },

    #[error("{0} requested itself while being created")]
    SelfReference(ResourceKey),

    #[error("dependency {key} failed")]
    Dependency {
        key: ResourceKey,
        #[source]
        source: Arc<CreateError>,
    },

    #[error("creator for {0} produced a mismatched artifact")]
    Mismatch(ResourceKey),

    #[error("creation of {0} panicked")]
    Panicked(ResourceKey),

    #[error("creation of {0} ended without a result")]
    Abandoned(ResourceKey),
}

impl CreateError {
    /// The innermost failure, following dependency chains.
    pub fn root_cause(&self) -> &CreateError {
        match self {
            Self::Dependency { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether the resource simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), Self::NotFound(_))
    }
}
