//! File watcher that turns source changes into cache invalidations.
//!
//! ```text
//! notify → Debouncer (timing, dedup) → classify → invalidate / reload config
//! ```
//!
//! The watcher is attached before the server starts accepting requests, so
//! edits made during startup are buffered rather than lost.

mod debouncer;
mod types;


use std::path::PathBuf;
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use rustc_hash::FxHashSet;

use super::ResourceCache;
use crate::logger::{status_error, status_success, status_unchanged};
use debouncer::{Debouncer, classify};
use types::{BatchReport, ChangeBatch, ChangeKind};

/// Watches the resource roots and the config file.
pub struct FileWatcher {
    /// Sync side of the notify bridge
    notify_rx: std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
    /// Watcher handle (must be kept alive)
    watcher: RecommendedWatcher,
    roots: WatchRoots,
    config_file: PathBuf,
}

impl FileWatcher {
    /// Start watching `roots` (and `config_file` if it exists) immediately.
    pub fn new(roots: Vec<PathBuf>, config_file: PathBuf) -> notify::Result<Self> {
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.send(res);
        })?;

        let mut desired = roots;
        if config_file.is_file() {
            desired.push(config_file.clone());
        }
        let mut roots = WatchRoots::new(desired);
        roots.attach_existing(&mut watcher)?;

        Ok(Self {
            notify_rx,
            watcher,
            roots,
            config_file,
        })
    }

    /// Event loop; runs until the task is aborted.
    pub async fn run(self, cache: Arc<ResourceCache>) {
        let Self {
            notify_rx,
            mut watcher,
            mut roots,
            config_file,
        } = self;
        let mut debouncer = Debouncer::new();

        let (async_tx, mut async_rx) = tokio::sync::mpsc::channel::<notify::Event>(64);

        // notify delivers on its own thread; bridge into the async side.
        std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                match result {
                    Ok(event) => {
                        if async_tx.blocking_send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => crate::log!("watch"; "notify error: {}", e),
                }
            }
        });

        loop {
            tokio::select! {
                biased;
                event = async_rx.recv() => match event {
                    Some(event) => debouncer.add_event(&event),
                    None => break,
                },
                _ = tokio::time::sleep(debouncer.sleep_duration()) => {
                    roots.maintain(&mut watcher);
                    let Some(raw) = debouncer.take_if_ready() else {
                        continue;
                    };
                    let batch = classify(raw, &config_file);
                    if batch.is_empty() {
                        continue;
                    }

                    let cache = Arc::clone(&cache);
                    let report = tokio::task::spawn_blocking(move || {
                        let mut report = apply(&batch, &cache);
                        if batch.config {
                            reload(&mut report);
                        }
                        report
                    })
                    .await;

                    match report {
                        Ok(report) => show(&report),
                        Err(err) => crate::log!("watch"; "change handler failed: {}", err),
                    }
                }
            }
        }
    }
}

/// Invalidate every key built from a changed source.
///
/// A removed directory invalidates every watched file below it.
fn apply(batch: &ChangeBatch, cache: &ResourceCache) -> BatchReport {
    let mut report = BatchReport::default();

    for (path, kind) in &batch.sources {
        let paths = match kind {
            ChangeKind::Removed => {
                let mut below = cache.watched_under(path);
                if below.is_empty() {
                    below.push(path.clone());
                }
                below
            }
            ChangeKind::Created | ChangeKind::Modified => vec![path.clone()],
        };

        for path in paths {
            let closure = cache.invalidate_path(&path);
            if !closure.is_empty() {
                crate::debug!("watch"; "{} {} → {} resources", kind.label(), path.display(), closure.len());
            }
            report
                .invalidated
                .extend(closure.iter().map(ToString::to_string));
        }
    }

    report
}

fn reload(report: &mut BatchReport) {
    match crate::config::reload_config() {
        Ok(changed) => report.config_reloaded = changed,
        Err(err) => report.config_error = Some(format!("{err:#}")),
    }
}

fn show(report: &BatchReport) {
    if let Some(err) = &report.config_error {
        status_error("config reload failed", err);
        return;
    }

    match (report.invalidated.len(), report.config_reloaded) {
        (0, false) => status_unchanged("no cached resources affected"),
        (0, true) => status_success("reloaded config"),
        (n, reloaded) => {
            let shown: Vec<_> = report.invalidated.iter().take(3).map(String::as_str).collect();
            let more = n.saturating_sub(shown.len());
            let mut message = format!("invalidated {}", shown.join(", "));
            if more > 0 {
                message.push_str(&format!(" and {more} more"));
            }
            if reloaded {
                message.push_str(", reloaded config");
            }
            status_success(&message);
        }
    }
}

/// Attach roots at startup and re-attach roots that were removed and
/// recreated.
struct WatchRoots {
    desired: Vec<PathBuf>,
    attached: FxHashSet<PathBuf>,
}

impl WatchRoots {
    fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            desired: paths,
            attached: FxHashSet::default(),
        }
    }

    fn attach_existing(&mut self, watcher: &mut RecommendedWatcher) -> notify::Result<()> {
        for path in &self.desired {
            if !path.exists() {
                continue;
            }
            watcher.watch(path, RecursiveMode::Recursive)?;
            self.attached.insert(path.clone());
        }
        Ok(())
    }

    fn maintain(&mut self, watcher: &mut RecommendedWatcher) {
        self.attached.retain(|path| path.exists());

        for path in &self.desired {
            if self.attached.contains(path) || !path.exists() {
                continue;
            }
            if watcher.watch(path, RecursiveMode::Recursive).is_ok() {
                self.attached.insert(path.clone());
                crate::debug!("watch"; "re-attached watch: {}", path.display());
            }
        }
    }

    #[cfg(test)]
    fn is_attached(&self, path: &std::path::Path) -> bool {
        self.attached.contains(path)
    }
}
