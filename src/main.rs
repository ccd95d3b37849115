//! Weaver - a script server with a dependency-tracked resource cache.

#![allow(dead_code)]

mod cli;
mod config;
mod logger;
mod resource;
mod runtime;
mod script;
mod utils;

use std::sync::Arc;

use anyhow::Result;
use clap::{ColorChoice, Parser};
use cli::{Cli, Commands};
use config::{WeaverConfig, init_config};
use runtime::Runtime;

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    cli::serve::setup_shutdown_handler()?;

    let cli: &'static Cli = Box::leak(Box::new(Cli::parse()));

    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {}
    }

    let config = init_config(WeaverConfig::load(cli)?);

    match &cli.command {
        Commands::Serve { .. } => serve(&config),
        Commands::Check { names } => cli::check::check_scripts(&config, names),
    }
}

fn serve(config: &WeaverConfig) -> Result<()> {
    let bound = cli::serve::bind_server(config)?;
    let runtime = Arc::new(Runtime::new(config)?);

    if config.resource.watch {
        runtime.watch(config)?;
    }

    bound.run(runtime)
}
