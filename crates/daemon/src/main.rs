use clap::Parser;
use tracing::warn;

use tether_daemon::cli::{confirm, Cli, Command};
use tether_daemon::logging::init_logging;
use tether_daemon::{daemon, oneshot};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    init_logging(&config.logging);

    match &cli.command {
        None => {
            if !cli.no_warn && !serve_is_safe(&config) {
                return Ok(());
            }
            daemon::run(config).await
        }
        Some(Command::Build) => {
            if !cli.no_warn
                && !confirm("This replaces the synced part of the Studio tree with the local files. Continue?")
            {
                return Ok(());
            }
            oneshot::run_build(config).await
        }
        Some(Command::Push {
            source,
            destination,
        }) => {
            if !cli.no_warn
                && !confirm("This creates instances in the live Studio session. Continue?")
            {
                return Ok(());
            }
            oneshot::run_push(config, source, destination.as_deref()).await
        }
    }
}

/// The orphan sweep deletes untracked script files under the sync root;
/// pointing it at the working directory deserves a second look.
fn serve_is_safe(config: &tether_daemon::Config) -> bool {
    if !config.sync.delete_orphans_on_connect {
        return true;
    }
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(_) => return true,
    };
    let sync_dir = config
        .sync
        .dir
        .canonicalize()
        .unwrap_or_else(|_| config.sync.dir.clone());
    if cwd.starts_with(&sync_dir) {
        warn!(dir = %sync_dir.display(), "the working directory is inside the sync root");
        return confirm("Untracked script files under the sync root are deleted on connect. Continue?");
    }
    true
}
