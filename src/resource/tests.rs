use crossbeam::channel;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

use super::*;
use crate::script::DirectiveCompiler;
use crate::utils::path::normalize_path;

const WAIT: Duration = Duration::from_secs(5);

/// Creator for `Static` keys driven by a closure.
struct FnCreator<F> {
    calls: AtomicUsize,
    create: F,
}

impl<F> ResourceCreator for FnCreator<F>
where
    F: Fn(&ResourceKey, &mut LoadContext<'_>) -> Result<Artifact, CreateError> + Send + Sync,
{
    fn kind(&self) -> ResourceKind {
        ResourceKind::Static
    }

    fn can_load(&self, name: &str, _args: &[String]) -> bool {
        !name.is_empty()
    }

    fn create(&self, key: &ResourceKey, ctx: &mut LoadContext<'_>) -> Result<Artifact, CreateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.create)(key, ctx)
    }
}

fn cache_with<F>(create: F) -> (Arc<ResourceCache>, Arc<FnCreator<F>>)
where
    F: Fn(&ResourceKey, &mut LoadContext<'_>) -> Result<Artifact, CreateError>
        + Send
        + Sync
        + 'static,
{
    let creator = Arc::new(FnCreator {
        calls: AtomicUsize::new(0),
        create,
    });
    let mut creators = CreatorRegistry::new();
    creators.register(Arc::clone(&creator) as Arc<dyn ResourceCreator>);
    let locations = Locations {
        app: PathBuf::from("/nonexistent/app"),
        assets: PathBuf::from("/nonexistent/assets"),
        specs: PathBuf::from("/nonexistent/specs"),
    };
    (Arc::new(ResourceCache::new(creators, locations)), creator)
}

fn key(name: &str) -> ResourceKey {
    ResourceKey::new(ResourceKind::Static, Location::Virtual, name)
}

fn text(name: &str) -> Artifact {
    Artifact::Static(Arc::new(StaticFile::new(
        PathBuf::from(name),
        name.as_bytes().to_vec(),
    )))
}

/// `chain` loads its successor: `c → b → a`.
fn chained(key: &ResourceKey, ctx: &mut LoadContext<'_>) -> Result<Artifact, CreateError> {
    let next = match key.name() {
        "c" => Some("b"),
        "b" => Some("a"),
        _ => None,
    };
    if let Some(next) = next {
        ctx.load(self::key(next))?;
    }
    Ok(text(key.name()))
}

#[test]
fn test_single_flight_under_contention() {
    let (cache, creator) = cache_with(|key, _| {
        thread::sleep(Duration::from_millis(50));
        Ok(text(key.name()))
    });
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.load(&key("shared")).unwrap()
            })
        })
        .collect();
    let artifacts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(creator.calls.load(Ordering::SeqCst), 1);
    assert!(artifacts.iter().all(|a| a.ptr_eq(&artifacts[0])));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_concurrent_waiters_share_one_failure() {
    let (cache, creator) = cache_with(|key, _| {
        thread::sleep(Duration::from_millis(50));
        Err(CreateError::NotFound(key.clone()))
    });
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.load(&key("missing")).unwrap_err()
            })
        })
        .collect();
    let errors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(creator.calls.load(Ordering::SeqCst), 1);
    assert!(errors.iter().all(|e| Arc::ptr_eq(e, &errors[0])));
    assert!(errors[0].is_not_found());
}

#[test]
fn test_failure_is_not_cached() {
    let attempts = AtomicUsize::new(0);
    let (cache, creator) = cache_with(move |key, _| {
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(CreateError::Compile {
                key: key.clone(),
                message: "line 1: unexpected".into(),
            })
        } else {
            Ok(text(key.name()))
        }
    });

    assert!(cache.load(&key("flaky")).is_err());
    assert!(!cache.contains(&key("flaky")));

    assert!(cache.load(&key("flaky")).is_ok());
    assert!(cache.contains(&key("flaky")));
    assert_eq!(creator.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_cascading_invalidation() {
    let (cache, _) = cache_with(chained);
    cache.load(&key("c")).unwrap();
    cache.load(&key("unrelated")).unwrap();

    assert!(cache.depends_on(&key("c"), &key("b")));
    assert!(cache.depends_on(&key("b"), &key("a")));
    assert_eq!(cache.dependents(&key("a")), vec![key("b")]);

    let closure = cache.invalidate(&key("a"));
    assert_eq!(closure, vec![key("a"), key("b"), key("c")]);
    for name in ["a", "b", "c"] {
        assert!(!cache.contains(&key(name)));
    }
    assert!(cache.contains(&key("unrelated")));
    assert!(cache.verify().is_ok());

    // not cached: nothing to do
    assert!(cache.invalidate(&key("a")).is_empty());
}

#[test]
fn test_invalidating_a_leaf_keeps_its_dependencies() {
    let (cache, _) = cache_with(chained);
    cache.load(&key("c")).unwrap();

    assert_eq!(cache.invalidate(&key("c")), vec![key("c")]);
    assert!(cache.contains(&key("b")));
    assert!(cache.contains(&key("a")));
    assert!(cache.dependents(&key("b")).is_empty());
    assert!(cache.verify().is_ok());
}

#[test]
fn test_cycle_invalidation_terminates() {
    let (cache, _) = cache_with(|key, _| Ok(text(key.name())));
    for name in ["x", "y", "z"] {
        cache.load(&key(name)).unwrap();
    }
    assert!(cache.add_dependency(&key("x"), &key("y")).unwrap());
    assert!(cache.add_dependency(&key("y"), &key("z")).unwrap());
    assert!(cache.add_dependency(&key("z"), &key("x")).unwrap());
    // recording an edge twice is a no-op
    assert!(!cache.add_dependency(&key("x"), &key("y")).unwrap());

    let closure = cache.invalidate(&key("y"));
    assert_eq!(closure.len(), 3);
    assert!(cache.is_empty());
    assert!(cache.verify().is_ok());
}

#[test]
fn test_add_dependency_requires_both_entries() {
    let (cache, _) = cache_with(|key, _| Ok(text(key.name())));
    cache.load(&key("present")).unwrap();

    let err = cache
        .add_dependency(&key("present"), &key("absent"))
        .unwrap_err();
    assert!(matches!(err, GraphError::MissingNode { missing, .. } if missing == key("absent")));
}

#[test]
fn test_self_reference_fails_fast() {
    let (cache, _) = cache_with(|key, ctx| {
        ctx.load(key.clone())?;
        Ok(text(key.name()))
    });

    let err = cache.load(&key("ouroboros")).unwrap_err();
    assert!(matches!(err.root_cause(), CreateError::SelfReference(k) if *k == key("ouroboros")));
    assert!(!cache.contains(&key("ouroboros")));
}

#[test]
fn test_creator_panic_reaches_caller() {
    let attempts = AtomicUsize::new(0);
    let (cache, _) = cache_with(move |key, _| {
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("creator bug");
        }
        Ok(text(key.name()))
    });

    let err = cache.load(&key("fragile")).unwrap_err();
    assert!(matches!(*err, CreateError::Panicked(_)));
    assert!(cache.load(&key("fragile")).is_ok());
}

#[test]
fn test_result_built_from_invalidated_input_is_not_cached() {
    let (started_tx, started_rx) = channel::bounded::<()>(1);
    let (go_tx, go_rx) = channel::bounded::<()>(1);

    let (cache, _) = cache_with(move |key, ctx| {
        if key.name() == "derived" {
            ctx.load(self::key("input"))?;
            started_tx.send(()).ok();
            go_rx.recv_timeout(WAIT).ok();
        }
        Ok(text(key.name()))
    });

    let loader = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.load(&key("derived")))
    };

    started_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(cache.invalidate(&key("input")), vec![key("input")]);
    go_tx.send(()).unwrap();

    let artifact = loader.join().unwrap();
    assert!(artifact.is_ok());
    assert!(!cache.contains(&key("derived")));
    assert!(cache.verify().is_ok());
}

#[test]
fn test_invalidating_in_flight_key_skips_insert() {
    let (started_tx, started_rx) = channel::bounded::<()>(1);
    let (go_tx, go_rx) = channel::bounded::<()>(1);

    let (cache, _) = cache_with(move |key, _| {
        started_tx.send(()).ok();
        go_rx.recv_timeout(WAIT).ok();
        Ok(text(key.name()))
    });

    let loader = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.load(&key("slow")))
    };

    started_rx.recv_timeout(WAIT).unwrap();
    assert!(cache.invalidate(&key("slow")).is_empty());
    go_tx.send(()).unwrap();

    assert!(loader.join().unwrap().is_ok());
    assert!(!cache.contains(&key("slow")));
}

#[test]
fn test_reload_creates_new_instance() {
    let (cache, creator) = cache_with(|key, _| Ok(text(key.name())));
    let first = cache.load(&key("page")).unwrap();
    assert!(cache.load(&key("page")).unwrap().ptr_eq(&first));

    let second = cache.reload(&key("page")).unwrap();
    assert!(!second.ptr_eq(&first));
    assert_eq!(creator.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_snapshot_reports_edges() {
    let (cache, _) = cache_with(chained);
    cache.load(&key("c")).unwrap();

    let rows = cache.snapshot();
    let names: Vec<_> = rows.iter().map(|row| row.key.name().to_string()).collect();
    assert_eq!(names, ["a", "b", "c"]);

    let b = &rows[1];
    assert_eq!(b.kind, ResourceKind::Static);
    assert_eq!(b.dependencies, 1);
    assert_eq!(b.dependents, 1);
    assert!(rows[2].version > rows[0].version);

    let json = serde_json::to_value(&rows).unwrap();
    assert_eq!(json[0]["kind"], "static");
}

struct Recorder {
    seen: Mutex<Vec<ResourceKey>>,
}

impl InvalidationListener for Recorder {
    fn invalidated(&self, removed: &[Arc<CacheEntry>]) {
        self.seen
            .lock()
            .extend(removed.iter().map(|entry| entry.key().clone()));
    }
}

#[test]
fn test_listeners_see_removed_entries() {
    let (cache, _) = cache_with(chained);
    let recorder = Arc::new(Recorder {
        seen: Mutex::new(Vec::new()),
    });
    let weak: std::sync::Weak<Recorder> = Arc::downgrade(&recorder);
    cache.subscribe(weak);

    cache.load(&key("b")).unwrap();
    cache.invalidate(&key("a"));
    assert_eq!(*recorder.seen.lock(), vec![key("a"), key("b")]);

    cache.load(&key("solo")).unwrap();
    assert_eq!(cache.clear(), 1);
    assert_eq!(recorder.seen.lock().len(), 3);

    // dropped listeners are skipped
    drop(recorder);
    cache.load(&key("after")).unwrap();
    cache.invalidate(&key("after"));
}

// ============================================================================
// File-backed creators
// ============================================================================

struct Project {
    _temp: TempDir,
    cache: ResourceCache,
}

impl Project {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = normalize_path(temp.path());
        let locations = Locations {
            app: root.join("app"),
            assets: root.join("assets"),
            specs: root.join("specs"),
        };
        for dir in [&locations.app, &locations.assets, &locations.specs] {
            std::fs::create_dir_all(dir).unwrap();
        }
        let cache = ResourceCache::new(default_creators(Arc::new(DirectiveCompiler)), locations);
        Self { _temp: temp, cache }
    }

    fn write(&self, location: Location, name: &str, content: &str) -> PathBuf {
        let path = self.cache.locations().resolve(location, name).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }
}

#[test]
fn test_script_depends_on_its_source_file() {
    let project = Project::new();
    let path = project.write(Location::App, "index.js", "emit hello");

    let script = ResourceKey::script("index.js");
    let first = project.cache.load(&script).unwrap();
    assert!(first.as_environment().is_some());
    assert!(project.cache.contains(&ResourceKey::app_source("index.js")));

    project.write(Location::App, "index.js", "emit changed");
    let closure = project.cache.invalidate_path(&path);
    assert_eq!(closure, vec![ResourceKey::app_source("index.js"), script.clone()]);

    let second = project.cache.load(&script).unwrap();
    assert!(!second.ptr_eq(&first));
    assert!(first.as_environment().is_some_and(|env| !env.is_alive()));
}

#[test]
fn test_script_and_spec_are_companions() {
    let project = Project::new();
    project.write(Location::App, "index.js", "emit hello");
    project.write(Location::Specs, "index.js", "emit spec");

    let script = ResourceKey::script("index.js");
    let spec = ResourceKey::new(ResourceKind::Spec, Location::Specs, "index.js");
    project.cache.load(&script).unwrap();
    project.cache.load(&spec).unwrap();

    assert!(project.cache.depends_on(&script, &spec));
    assert!(project.cache.depends_on(&spec, &script));

    let closure = project.cache.invalidate(&script);
    assert!(closure.contains(&spec));
    assert!(!project.cache.contains(&spec));
    assert!(project.cache.verify().is_ok());
}

#[test]
fn test_missing_and_invalid_sources() {
    let project = Project::new();

    let err = project.cache.load(&ResourceKey::script("nope.js")).unwrap_err();
    assert!(err.is_not_found());

    project.write(Location::App, "broken.js", "on ready\nemit never closed");
    let err = project.cache.load(&ResourceKey::script("broken.js")).unwrap_err();
    assert!(matches!(err.root_cause(), CreateError::Compile { .. }));
    // the source file itself is fine and stays cached
    assert!(project.cache.contains(&ResourceKey::app_source("broken.js")));

    let escape = ResourceKey::new(ResourceKind::Static, Location::Assets, "../app/broken.js");
    assert!(project.cache.load(&escape).unwrap_err().is_not_found());
}

#[test]
fn test_each_requester_gets_its_own_module() {
    let project = Project::new();
    project.write(Location::App, "util.js", "export answer = 42");

    let a = ResourceKey::module("util", &ResourceKey::script("a.js"));
    let b = ResourceKey::module("util", &ResourceKey::script("b.js"));
    let first = project.cache.load(&a).unwrap();
    let second = project.cache.load(&b).unwrap();

    assert_ne!(a, b);
    assert!(!first.ptr_eq(&second));
    // both were built from the same source file
    assert_eq!(
        project.cache.dependents(&ResourceKey::app_source("util.js")).len(),
        2
    );

    let bare = ResourceKey::new(ResourceKind::Module, Location::App, "util");
    assert!(matches!(
        *project.cache.load(&bare).unwrap_err(),
        CreateError::Unclaimed(_)
    ));
}
