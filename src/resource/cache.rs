//! Concurrent resource cache with single-flight creation.
//!
//! All entries, the dependency graph and the watched-path index live behind
//! one `RwLock`, so an invalidation (entry removal plus every dependent in
//! its closure) is a single write transaction. Lookups take the read side.
//!
//! In-flight creations are tracked outside that lock:
//!
//! ```text
//! load(key) ─┬─ cached ──────────────────────────────► artifact
//!            ├─ in flight ─► wait on channel ────────► shared result
//!            └─ absent ───► claim ─► create ─► admit ─► broadcast
//! ```
//!
//! Lock order is always store → in-flight table.

use crossbeam::channel;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use super::creator::Provenance;
use super::{
    Artifact, CreateError, CreatorRegistry, DependencyGraph, GraphError, LoadContext, Locations,
    ResourceKey, ResourceKind,
};
use crate::{debug, log};

/// Outcome of [`ResourceCache::load`]; waiters share the failure instance.
pub type LoadResult = Result<Artifact, Arc<CreateError>>;

/// Told about every invalidation after its transaction committed.
///
/// Runs on the invalidating thread, outside the store lock, with the
/// entries that were removed.
pub trait InvalidationListener: Send + Sync {
    fn invalidated(&self, removed: &[Arc<CacheEntry>]);
}

/// A cached artifact and its bookkeeping.
#[derive(Debug)]
pub struct CacheEntry {
    key: ResourceKey,
    artifact: Artifact,
    version: u64,
    created: Instant,
}

impl CacheEntry {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    /// Monotonic insertion counter across the whole cache.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created(&self) -> Instant {
        self.created
    }
}

/// Inspection row for one live entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub key: ResourceKey,
    pub kind: ResourceKind,
    pub artifact: &'static str,
    pub version: u64,
    pub age_ms: u64,
    pub dependencies: usize,
    pub dependents: usize,
}

#[derive(Default)]
struct Store {
    entries: FxHashMap<ResourceKey, Arc<CacheEntry>>,
    graph: DependencyGraph,
    /// Watched file → keys built from it
    watched: FxHashMap<PathBuf, FxHashSet<ResourceKey>>,
    /// Key → files it watches (for cleanup)
    watched_by: FxHashMap<ResourceKey, Vec<PathBuf>>,
}

impl Store {
    fn contains(&self, key: &ResourceKey) -> bool {
        self.entries.contains_key(key)
    }

    fn watch(&mut self, key: &ResourceKey, path: PathBuf) {
        self.watched
            .entry(path.clone())
            .or_default()
            .insert(key.clone());
        self.watched_by.entry(key.clone()).or_default().push(path);
    }

    /// Remove the entry, its edges and its watched paths.
    fn remove(&mut self, key: &ResourceKey) -> Option<Arc<CacheEntry>> {
        self.graph.remove(key);
        for path in self.watched_by.remove(key).unwrap_or_default() {
            if let Some(keys) = self.watched.get_mut(&path) {
                keys.remove(key);
                if keys.is_empty() {
                    self.watched.remove(&path);
                }
            }
        }
        self.entries.remove(key)
    }
}

#[derive(Default)]
struct InFlight {
    waiters: Vec<channel::Sender<LoadResult>>,
    /// Invalidated while being created: hand out, don't cache.
    stale: bool,
}

thread_local! {
    /// Keys this thread is currently creating, innermost last.
    static CREATING: RefCell<Vec<ResourceKey>> = const { RefCell::new(Vec::new()) };
}

struct CreatingGuard;

impl CreatingGuard {
    fn enter(key: &ResourceKey) -> Self {
        CREATING.with(|stack| stack.borrow_mut().push(key.clone()));
        Self
    }

    fn contains(key: &ResourceKey) -> bool {
        CREATING.with(|stack| stack.borrow().contains(key))
    }
}

impl Drop for CreatingGuard {
    fn drop(&mut self) {
        CREATING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Typed cache of derived artifacts keyed by [`ResourceKey`].
pub struct ResourceCache {
    store: RwLock<Store>,
    in_flight: DashMap<ResourceKey, InFlight>,
    creators: CreatorRegistry,
    locations: Locations,
    version: AtomicU64,
    listeners: RwLock<Vec<Weak<dyn InvalidationListener>>>,
}

impl ResourceCache {
    pub fn new(creators: CreatorRegistry, locations: Locations) -> Self {
        Self {
            store: RwLock::new(Store::default()),
            in_flight: DashMap::new(),
            creators,
            locations,
            version: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn locations(&self) -> &Locations {
        &self.locations
    }

    pub fn creators(&self) -> &CreatorRegistry {
        &self.creators
    }

    /// Receive every future invalidation closure.
    pub fn subscribe(&self, listener: Weak<dyn InvalidationListener>) {
        self.listeners.write().push(listener);
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Cached artifact for `key`, without creating it.
    pub fn find(&self, key: &ResourceKey) -> Option<Artifact> {
        self.store
            .read()
            .entries
            .get(key)
            .map(|entry| entry.artifact.clone())
    }

    pub fn entry(&self, key: &ResourceKey) -> Option<Arc<CacheEntry>> {
        self.store.read().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.store.read().contains(key)
    }

    pub fn len(&self) -> usize {
        self.store.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys built from the file at `path`.
    pub fn keys_for_path(&self, path: &Path) -> Vec<ResourceKey> {
        self.store
            .read()
            .watched
            .get(path)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Watched files at or below `dir`.
    pub fn watched_under(&self, dir: &Path) -> Vec<PathBuf> {
        self.store
            .read()
            .watched
            .keys()
            .filter(|path| path.starts_with(dir))
            .cloned()
            .collect()
    }

    /// Keys that depend on `key` directly.
    pub fn dependents(&self, key: &ResourceKey) -> Vec<ResourceKey> {
        self.store
            .read()
            .graph
            .dependents(key)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the edge `dependent → dependency` is recorded.
    pub fn depends_on(&self, dependent: &ResourceKey, dependency: &ResourceKey) -> bool {
        self.store.read().graph.depends_on(dependent, dependency)
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Cached artifact for `key`, creating it on a miss.
    ///
    /// At most one creation runs per key; concurrent callers block until it
    /// finishes and receive the same artifact or the same failure.
    pub fn load(&self, key: &ResourceKey) -> LoadResult {
        if let Some(artifact) = self.find(key) {
            return Ok(artifact);
        }

        if CreatingGuard::contains(key) {
            log!("cache"; "{} requested itself while being created", key);
            return Err(Arc::new(CreateError::SelfReference(key.clone())));
        }

        let receiver = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(mut pending) => {
                let (sender, receiver) = channel::bounded(1);
                pending.get_mut().waiters.push(sender);
                receiver
            }
            Entry::Vacant(slot) => {
                slot.insert(InFlight::default());
                return self.create_claimed(key);
            }
        };

        debug!("cache"; "waiting on in-flight {}", key);
        receiver
            .recv()
            .unwrap_or_else(|_| Err(Arc::new(CreateError::Abandoned(key.clone()))))
    }

    /// Invalidate `key`, then load it again.
    pub fn reload(&self, key: &ResourceKey) -> LoadResult {
        self.invalidate(key);
        self.load(key)
    }

    /// Run the creation this thread claimed and broadcast its result.
    fn create_claimed(&self, key: &ResourceKey) -> LoadResult {
        // Another creator may have finished between `find` and the claim.
        if let Some(artifact) = self.find(key) {
            return self.finish(key, Ok(artifact));
        }

        let result = match self.create(key) {
            Ok((artifact, provenance)) => Ok(self.admit(key, artifact, provenance)),
            Err(err) => {
                log!("cache"; "failed to create {}: {}", key, err);
                Err(Arc::new(err))
            }
        };
        self.finish(key, result)
    }

    fn create(&self, key: &ResourceKey) -> Result<(Artifact, Provenance), CreateError> {
        let creator = self
            .creators
            .get(key.kind())
            .ok_or(CreateError::NoCreator(key.kind()))?;

        if !creator.can_load(key.name(), key.args()) {
            return Err(CreateError::Unclaimed(key.clone()));
        }

        let _guard = CreatingGuard::enter(key);
        let mut ctx = LoadContext::new(self, key);
        let created = panic::catch_unwind(AssertUnwindSafe(|| creator.create(key, &mut ctx)));

        match created {
            Ok(Ok(artifact)) => Ok((artifact, ctx.into_provenance())),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(CreateError::Panicked(key.clone())),
        }
    }

    /// Insert a fresh artifact with its edges, unless its inputs went stale.
    fn admit(&self, key: &ResourceKey, artifact: Artifact, provenance: Provenance) -> Artifact {
        let mut store = self.store.write();

        let invalidated = self.in_flight.get(key).is_some_and(|pending| pending.stale);
        let vanished = provenance
            .dependencies
            .iter()
            .find(|dependency| !store.contains(dependency));

        if invalidated || vanished.is_some() {
            debug!("cache"; "{} was built from stale inputs, not caching", key);
            return artifact;
        }

        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = CacheEntry {
            key: key.clone(),
            artifact: artifact.clone(),
            version,
            created: Instant::now(),
        };
        store.entries.insert(key.clone(), Arc::new(entry));

        for dependency in &provenance.dependencies {
            store.graph.add_dependency(key, dependency);
        }
        for companion in &provenance.companions {
            if store.contains(companion) {
                store.graph.add_mutual(key, companion);
            }
        }
        for path in provenance.watched {
            store.watch(key, path);
        }

        debug!("cache"; "created {} (v{})", key, version);
        artifact
    }

    fn finish(&self, key: &ResourceKey, result: LoadResult) -> LoadResult {
        if let Some((_, pending)) = self.in_flight.remove(key) {
            for waiter in pending.waiters {
                let _ = waiter.send(result.clone());
            }
        }
        result
    }

    // =========================================================================
    // Graph
    // =========================================================================

    /// Record that `dependent` depends on `dependency`; both must be cached.
    pub fn add_dependency(
        &self,
        dependent: &ResourceKey,
        dependency: &ResourceKey,
    ) -> Result<bool, GraphError> {
        let mut store = self.store.write();

        for key in [dependent, dependency] {
            if !store.contains(key) {
                return Err(GraphError::MissingNode {
                    from: dependent.clone(),
                    to: dependency.clone(),
                    missing: key.clone(),
                });
            }
        }

        Ok(store.graph.add_dependency(dependent, dependency))
    }

    /// Check that no edge references an absent entry.
    pub fn verify(&self) -> Result<(), GraphError> {
        let store = self.store.read();
        store.graph.verify(|key| store.contains(key))
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Remove `key` and everything that transitively depends on it.
    ///
    /// Returns the closure in breadth-first order (starting with `key`), or
    /// an empty list if `key` was not cached. A creation of `key` still in
    /// flight is marked stale so its result is not cached.
    pub fn invalidate(&self, key: &ResourceKey) -> Vec<ResourceKey> {
        let (closure, removed) = {
            let mut store = self.store.write();

            if let Some(mut pending) = self.in_flight.get_mut(key) {
                pending.stale = true;
            }

            if !store.contains(key) {
                return Vec::new();
            }

            let closure = store.graph.closure(key);
            let removed: Vec<_> = closure
                .iter()
                .filter_map(|member| store.remove(member))
                .inspect(|entry| entry.artifact.retire())
                .collect();
            (closure, removed)
        };

        log!("cache"; "invalidated {}", describe(&closure));
        self.notify(&removed);
        closure
    }

    /// Invalidate every key built from the file at `path`.
    pub fn invalidate_path(&self, path: &Path) -> Vec<ResourceKey> {
        let mut closure = Vec::new();
        for key in self.keys_for_path(path) {
            closure.extend(self.invalidate(&key));
        }
        closure
    }

    /// Drop every entry (server shutdown).
    pub fn clear(&self) -> usize {
        let removed: Vec<Arc<CacheEntry>> = {
            let mut store = self.store.write();
            let entries = std::mem::take(&mut store.entries);
            store.graph.clear();
            store.watched.clear();
            store.watched_by.clear();

            entries
                .into_values()
                .inspect(|entry| entry.artifact.retire())
                .collect()
        };

        if !removed.is_empty() {
            debug!("cache"; "cleared {} entries", removed.len());
            self.notify(&removed);
        }
        removed.len()
    }

    fn notify(&self, removed: &[Arc<CacheEntry>]) {
        let listeners: Vec<_> = {
            let mut listeners = self.listeners.write();
            listeners.retain(|listener| listener.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.invalidated(removed);
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Live entries, ordered by key.
    pub fn snapshot(&self) -> Vec<EntrySummary> {
        let store = self.store.read();
        let mut rows: Vec<_> = store
            .entries
            .values()
            .map(|entry| EntrySummary {
                key: entry.key.clone(),
                kind: entry.key.kind(),
                artifact: entry.artifact.label(),
                version: entry.version,
                age_ms: u64::try_from(entry.created.elapsed().as_millis()).unwrap_or(u64::MAX),
                dependencies: store.graph.dependencies(&entry.key).map_or(0, |s| s.len()),
                dependents: store.graph.dependents(&entry.key).map_or(0, |s| s.len()),
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }
}

/// `a, b and 3 more` style summary for log lines.
fn describe(keys: &[ResourceKey]) -> String {
    const SHOWN: usize = 3;
    let mut text = keys
        .iter()
        .take(SHOWN)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    if keys.len() > SHOWN {
        text.push_str(&format!(" and {} more", keys.len() - SHOWN));
    }
    text
}
