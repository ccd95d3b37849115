//! Server configuration management for `weaver.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section/       # Configuration section definitions
//! │   ├── http       # [http]
//! │   ├── resource   # [resource]
//! │   ├── runtime    # [runtime]
//! │   └── serve      # [serve]
//! ├── error          # ConfigError
//! ├── handle         # Global config handle (arc-swap)
//! └── mod.rs         # WeaverConfig (this file)
//! ```
//!
//! # Sections
//!
//! | Section      | Purpose                                          |
//! |--------------|--------------------------------------------------|
//! | `[runtime]`  | Evaluation workers, I/O threads, queue warnings  |
//! | `[resource]` | App/assets/specs locations, file watching        |
//! | `[serve]`    | HTTP and WebSocket listeners                     |
//! | `[http]`     | Outbound call timeout and user agent             |

mod error;
mod handle;
pub mod section;
mod util;

pub use error::ConfigError;
pub use handle::{cfg, init_config, reload_config};
pub use section::{ExecutionConfig, HttpConfig, ResourceConfig, ServeConfig};

use crate::{
    cli::{Cli, Commands},
    log,
    utils::path::normalize_path,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use util::find_config_file;

/// Root configuration structure representing weaver.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeaverConfig {
    /// CLI arguments reference (internal use only)
    #[serde(skip)]
    pub cli: Option<&'static Cli>,

    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Project root directory - parent of config file (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    #[serde(default)]
    pub runtime: ExecutionConfig,

    #[serde(default)]
    pub resource: ResourceConfig,

    #[serde(default)]
    pub serve: ServeConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

impl WeaverConfig {
    /// Load configuration from CLI arguments.
    ///
    /// Searches upward from cwd for the config file. Without one, defaults
    /// are used and the cwd becomes the project root.
    pub fn load(cli: &'static Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current working directory")?;

        let mut config = match find_config_file(&cli.config) {
            Some(path) => {
                let mut config = Self::from_path(&path)?;
                config.config_path = normalize_path(&path);
                config
            }
            None => {
                log!("config"; "{} not found, using defaults", cli.config.display());
                let mut config = Self::default();
                config.config_path = cwd.join(&cli.config);
                config
            }
        };

        let root = config
            .config_path
            .parent()
            .map_or_else(|| cwd.clone(), Path::to_path_buf);

        config.cli = Some(cli);
        config.set_root(&root);
        config.apply_command_options(cli);
        config.validate()?;

        Ok(config)
    }

    /// Default configuration rooted at `root`, with normalized locations.
    pub fn with_root(root: &Path) -> Self {
        let mut config = Self::default();
        config.config_path = root.join("weaver.toml");
        config.set_root(root);
        config
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::parse(&content)
    }

    /// Set the project root and resolve resource locations under it.
    pub fn set_root(&mut self, root: &Path) {
        self.root = normalize_path(root);
        let root = self.root.clone();
        self.resource.normalize(&root);
    }

    /// Apply command-specific configuration options.
    fn apply_command_options(&mut self, cli: &Cli) {
        crate::logger::set_verbose(cli.verbose);

        match &cli.command {
            Commands::Serve {
                interface,
                port,
                ws_port,
                watch,
            } => {
                Self::update_option(&mut self.serve.interface, interface.as_ref());
                Self::update_option(&mut self.serve.port, port.as_ref());
                Self::update_option(&mut self.serve.ws_port, ws_port.as_ref());
                Self::update_option(&mut self.resource.watch, watch.as_ref());
            }
            Commands::Check { .. } => self.resource.watch = false,
        }
    }

    /// Update config option if CLI value is provided.
    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runtime.validate()?;
        self.serve.validate()?;
        self.http.validate()?;
        Ok(())
    }

    /// Whether `path` is the loaded config file.
    pub fn is_config_file(&self, path: &Path) -> bool {
        !self.config_path.as_os_str().is_empty() && normalize_path(path) == self.config_path
    }
}

// ============================================================================
// Test Helpers
// ============================================================================

#[cfg(test)]
pub fn test_parse_config(content: &str) -> WeaverConfig {
    WeaverConfig::parse(content).unwrap()
}
