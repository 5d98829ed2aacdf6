//! Command line interface: argument parsing and config resolution.
//!
//! CLI flags override file values, which override defaults.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "tether", version, about = "Bidirectional Studio <-> filesystem sync daemon")]
pub struct Cli {
    /// Directory the projected tree lives in
    #[arg(long, global = true)]
    pub sync_dir: Option<PathBuf>,

    /// Port the plugin connects to
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Path to a TOML config file (default: ./tether.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Skip confirmation prompts
    #[arg(long, global = true)]
    pub no_warn: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan the sync directory and send it into Studio as one snapshot
    Build,
    /// Scan an arbitrary directory and send it into Studio
    Push {
        /// Directory to scan
        source: PathBuf,
        /// Where to mount the tree, e.g. `ReplicatedStorage.Shared`
        #[arg(long)]
        destination: Option<String>,
    },
}

impl Cli {
    /// Resolve the effective config: file (explicit path or `tether.toml`),
    /// then flag overrides on top.
    pub fn resolve_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::load_or_default(),
        };

        if let Some(dir) = &self.sync_dir {
            config.sync.dir = dir.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.debug {
            config.logging.level = "debug".into();
        }
        Ok(config)
    }
}

/// Ask a y/N question on stdin. Anything but an explicit yes declines.
pub fn confirm(prompt: &str) -> bool {
    print!("{prompt} [y/N] ");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_values() {
        let cli = Cli::parse_from([
            "tether",
            "--sync-dir",
            "/tmp/game",
            "--port",
            "9000",
            "--debug",
        ]);
        let config = cli.resolve_config().expect("resolve");
        assert_eq!(config.sync.dir, PathBuf::from("/tmp/game"));
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn subcommands_parse() {
        let cli = Cli::parse_from(["tether", "push", "./pkg", "--destination", "ReplicatedStorage.Pkg"]);
        match cli.command {
            Some(Command::Push {
                source,
                destination,
            }) => {
                assert_eq!(source, PathBuf::from("./pkg"));
                assert_eq!(destination.as_deref(), Some("ReplicatedStorage.Pkg"));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::parse_from(["tether", "build", "--no-warn"]);
        assert!(matches!(cli.command, Some(Command::Build)));
        assert!(cli.no_warn);
    }
}
