//! Creation strategies and the context they build artifacts in.

use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Artifact, CreateError, Location, ResourceCache, ResourceKey, ResourceKind};
use crate::config::ResourceConfig;
use crate::utils::path::safe_join;

/// Builds a fresh artifact for keys of one kind.
pub trait ResourceCreator: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Whether this creator can build `name` with `args`.
    fn can_load(&self, name: &str, args: &[String]) -> bool;

    /// Build the artifact. Runs on the calling thread, outside any cache lock.
    fn create(&self, key: &ResourceKey, ctx: &mut LoadContext<'_>) -> Result<Artifact, CreateError>;
}

/// One creator per kind, fixed at registration time.
#[derive(Default)]
pub struct CreatorRegistry {
    creators: FxHashMap<ResourceKind, Arc<dyn ResourceCreator>>,
}

impl CreatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `creator` for its kind, replacing any previous one.
    pub fn register(&mut self, creator: Arc<dyn ResourceCreator>) -> &mut Self {
        self.creators.insert(creator.kind(), creator);
        self
    }

    #[inline]
    pub fn get(&self, kind: ResourceKind) -> Option<&Arc<dyn ResourceCreator>> {
        self.creators.get(&kind)
    }
}

/// Filesystem roots for each [`Location`].
#[derive(Debug, Clone)]
pub struct Locations {
    pub app: PathBuf,
    pub assets: PathBuf,
    pub specs: PathBuf,
}

impl Locations {
    pub fn from_config(config: &ResourceConfig) -> Self {
        Self {
            app: config.app.clone(),
            assets: config.assets.clone(),
            specs: config.specs.clone(),
        }
    }

    pub fn base(&self, location: Location) -> Option<&Path> {
        match location {
            Location::App => Some(&self.app),
            Location::Assets => Some(&self.assets),
            Location::Specs => Some(&self.specs),
            Location::Virtual => None,
        }
    }

    /// File path for `name` under `location`, if it stays inside that root.
    pub fn resolve(&self, location: Location, name: &str) -> Option<PathBuf> {
        safe_join(self.base(location)?, name)
    }
}

/// What a creation touched, recorded while it ran.
#[derive(Debug, Default)]
pub(crate) struct Provenance {
    pub dependencies: Vec<ResourceKey>,
    pub companions: Vec<ResourceKey>,
    pub watched: Vec<PathBuf>,
}

/// Handed to a creator for the duration of one `create` call.
pub struct LoadContext<'a> {
    cache: &'a ResourceCache,
    key: &'a ResourceKey,
    provenance: Provenance,
}

impl<'a> LoadContext<'a> {
    pub(crate) fn new(cache: &'a ResourceCache, key: &'a ResourceKey) -> Self {
        Self {
            cache,
            key,
            provenance: Provenance::default(),
        }
    }

    /// Key being created.
    pub fn key(&self) -> &ResourceKey {
        self.key
    }

    pub fn locations(&self) -> &Locations {
        self.cache.locations()
    }

    /// Load another resource and record that the current key depends on it.
    pub fn load(&mut self, key: ResourceKey) -> Result<Artifact, CreateError> {
        match self.cache.load(&key) {
            Ok(artifact) => {
                self.provenance.dependencies.push(key);
                Ok(artifact)
            }
            Err(source) => Err(CreateError::Dependency { key, source }),
        }
    }

    /// Map a file change at `path` to the current key.
    pub fn watch(&mut self, path: PathBuf) {
        self.provenance.watched.push(path);
    }

    /// Declare a companion: if `key` is cached when this entry is inserted,
    /// both keys are made to depend on each other.
    pub fn companion(&mut self, key: ResourceKey) {
        self.provenance.companions.push(key);
    }

    pub(crate) fn into_provenance(self) -> Provenance {
        self.provenance
    }
}
