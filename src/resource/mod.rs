//! Resource cache and dependency graph.
//!
//! # Module Structure
//!
//! ```text
//! resource/
//! ├── key.rs        # ResourceKey, ResourceKind, Location
//! ├── graph.rs      # DependencyGraph (forward/reverse edges, BFS closure)
//! ├── cache.rs      # ResourceCache (single-flight load, transactional invalidate)
//! ├── creator.rs    # ResourceCreator trait, registry, LoadContext
//! ├── artifact.rs   # Artifact variants
//! ├── file.rs       # Static and Spec creators
//! ├── script.rs     # Script and Module creators
//! └── watch/        # File watcher → invalidation
//! ```

mod artifact;
mod cache;
mod creator;
mod error;
mod file;
mod graph;
mod key;
mod script;
pub mod watch;

#[cfg(test)]
mod tests;

pub use artifact::Artifact;
pub use cache::{CacheEntry, EntrySummary, InvalidationListener, LoadResult, ResourceCache};
pub use creator::{CreatorRegistry, LoadContext, Locations, ResourceCreator};
pub use error::CreateError;
pub use file::{SpecCreator, SpecSource, StaticCreator, StaticFile};
pub use graph::{DependencyGraph, GraphError};
pub use key::{Location, ResourceKey, ResourceKind};
pub use script::{ModuleCreator, ScriptCreator, module_file_name, resolve_module_identifier};

use crate::script::ScriptCompiler;
use std::sync::Arc;

/// Registry with the creators for every [`ResourceKind`].
pub fn default_creators(compiler: Arc<dyn ScriptCompiler>) -> CreatorRegistry {
    let mut registry = CreatorRegistry::new();
    registry
        .register(Arc::new(StaticCreator))
        .register(Arc::new(SpecCreator))
        .register(Arc::new(ScriptCreator::new(Arc::clone(&compiler))))
        .register(Arc::new(ModuleCreator::new(compiler)));
    registry
}
