//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

/// Weaver script server CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: weaver.toml)
    #[arg(short = 'C', long, default_value = "weaver.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Enable verbose output for debugging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve documents and WebSocket sessions backed by scripts
    #[command(visible_alias = "s")]
    Serve {
        /// Network interface to bind (e.g., 127.0.0.1, 0.0.0.0)
        #[arg(short, long)]
        interface: Option<IpAddr>,

        /// HTTP port number
        #[arg(short, long)]
        port: Option<u16>,

        /// WebSocket port number
        #[arg(long)]
        ws_port: Option<u16>,

        /// Invalidate cached resources when their files change
        #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        watch: Option<bool>,
    },

    /// Compile scripts and report errors without serving
    #[command(visible_alias = "c")]
    Check {
        /// Script names relative to the app directory (default: every script)
        #[arg(value_name = "NAME")]
        names: Vec<String>,
    },
}

impl Cli {
    pub const fn is_serve(&self) -> bool {
        matches!(self.command, Commands::Serve { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_overrides_parse() {
        let cli = Cli::parse_from(["weaver", "serve", "--port", "9000", "--watch", "false"]);
        match cli.command {
            Commands::Serve { port, watch, .. } => {
                assert_eq!(port, Some(9000));
                assert_eq!(watch, Some(false));
            }
            Commands::Check { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn test_bare_watch_flag_means_true() {
        let cli = Cli::parse_from(["weaver", "serve", "-w"]);
        assert!(matches!(
            cli.command,
            Commands::Serve {
                watch: Some(true),
                ..
            }
        ));
    }

    #[test]
    fn test_check_collects_names() {
        let cli = Cli::parse_from(["weaver", "-v", "check", "index.js", "chat.js"]);
        assert!(cli.verbose);
        assert!(!cli.is_serve());
        match cli.command {
            Commands::Check { names } => assert_eq!(names, ["index.js", "chat.js"]),
            Commands::Serve { .. } => panic!("expected check"),
        }
    }
}
