//! `[resource]` section configuration.
//!
//! Base locations that resource keys resolve against.
//!
//! # Example
//!
//! ```toml
//! [resource]
//! app = "app"         # Document scripts and modules
//! assets = "assets"   # Static files served as-is
//! specs = "specs"     # Companion spec scripts
//! watch = true        # Invalidate resources when their files change
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::path::normalize_path;

/// Resource locations, relative to the project root until normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub app: PathBuf,
    pub assets: PathBuf,
    pub specs: PathBuf,
    pub watch: bool,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            app: "app".into(),
            assets: "assets".into(),
            specs: "specs".into(),
            watch: true,
        }
    }
}

impl ResourceConfig {
    /// Make every location absolute under `root`.
    pub(crate) fn normalize(&mut self, root: &Path) {
        self.app = normalize_path(&root.join(&self.app));
        self.assets = normalize_path(&root.join(&self.assets));
        self.specs = normalize_path(&root.join(&self.specs));
    }

    /// Directories the file watcher attaches to (missing ones are skipped).
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        [&self.app, &self.assets, &self.specs]
            .into_iter()
            .filter(|dir| dir.is_dir())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;
    use std::path::Path;

    #[test]
    fn test_resource_config_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.resource.app, Path::new("app"));
        assert_eq!(config.resource.specs, Path::new("specs"));
        assert!(config.resource.watch);
    }

    #[test]
    fn test_normalize_joins_root() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("scripts")).unwrap();

        let mut config = test_parse_config("[resource]\napp = \"scripts\"\nwatch = false");
        config.resource.normalize(temp.path());

        assert!(config.resource.app.is_absolute());
        assert!(config.resource.app.ends_with("scripts"));
        assert_eq!(config.resource.watch_roots().len(), 1);
    }
}
