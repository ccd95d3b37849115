//! Global config with atomic reload support.
//!
//! Uses `arc-swap` for lock-free reads and atomic config replacement, so the
//! file watcher can swap in a new `weaver.toml` while processors keep reading.

use crate::config::WeaverConfig;
use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::{Arc, LazyLock};

/// Global config storage.
static CONFIG: LazyLock<ArcSwap<WeaverConfig>> =
    LazyLock::new(|| ArcSwap::from_pointee(WeaverConfig::default()));

/// Hash of the config file content currently loaded.
static CONFIG_HASH: LazyLock<Mutex<Option<blake3::Hash>>> = LazyLock::new(|| Mutex::new(None));

#[inline]
pub fn cfg() -> Arc<WeaverConfig> {
    CONFIG.load_full()
}

/// Reload config from disk if its content changed.
///
/// Returns `Ok(true)` if config was updated, `Ok(false)` if unchanged.
pub fn reload_config() -> Result<bool> {
    let current = cfg();
    let Some(cli) = current.cli else {
        return Ok(false);
    };

    let content = std::fs::read(&current.config_path)
        .with_context(|| format!("Failed to read {}", current.config_path.display()))?;
    let new_hash = blake3::hash(&content);

    if *CONFIG_HASH.lock() == Some(new_hash) {
        return Ok(false);
    }

    let new_config = WeaverConfig::load(cli)?;
    CONFIG.store(Arc::new(new_config));
    *CONFIG_HASH.lock() = Some(new_hash);

    Ok(true)
}

/// Install the config loaded at startup.
pub fn init_config(config: WeaverConfig) -> Arc<WeaverConfig> {
    if let Ok(content) = std::fs::read(&config.config_path) {
        *CONFIG_HASH.lock() = Some(blake3::hash(&content));
    }

    let arc = Arc::new(config);
    CONFIG.store(Arc::clone(&arc));
    arc
}
