//! One-shot commands: scan a local tree and deliver it into Studio as a
//! build snapshot, then exit. Uses the same server as the sync daemon but
//! no watcher and no projection.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;

use tether_protocol::{DaemonMessage, InstanceRecord};

use crate::config::Config;
use crate::daemon::DaemonEvent;
use crate::scan;
use crate::server::SyncServer;

/// How long to stay up after sending, so WebSocket frames flush and polling
/// clients get a drain cycle.
const LINGER: Duration = Duration::from_secs(2);

/// Scan the sync directory and push it into Studio.
pub async fn run_build(config: Config) -> anyhow::Result<()> {
    let dir = config
        .sync
        .dir
        .canonicalize()
        .with_context(|| format!("sync directory {} not found", config.sync.dir.display()))?;
    let records = scan::scan_directory(&dir, &config.sync.script_extension)?;
    info!(instances = records.len(), dir = %dir.display(), "scanned local tree");
    deliver_snapshot(&config, records).await
}

/// Scan an arbitrary directory and push it into Studio, optionally rerooted
/// under a destination path like `ReplicatedStorage.Shared`.
pub async fn run_push(
    config: Config,
    source: &Path,
    destination: Option<&str>,
) -> anyhow::Result<()> {
    let dir = source
        .canonicalize()
        .with_context(|| format!("source directory {} not found", source.display()))?;
    let mut records = scan::scan_directory(&dir, &config.sync.script_extension)?;
    if let Some(destination) = destination {
        records = scan::reroot(records, destination);
    }
    info!(instances = records.len(), dir = %dir.display(), "scanned push source");
    deliver_snapshot(&config, records).await
}

/// Bring the transports up, wait for the plugin, send one snapshot, exit.
async fn deliver_snapshot(config: &Config, records: Vec<InstanceRecord>) -> anyhow::Result<()> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let server = SyncServer::new(events_tx);

    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    let router = server.router();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    info!("listening on http://{bind_address}");
    info!("waiting for Studio to connect...");
    loop {
        match events_rx.recv().await {
            // The polling transport announces itself with its first message.
            Some(DaemonEvent::Connected { .. }) | Some(DaemonEvent::Remote(_)) => break,
            Some(_) => continue,
            None => anyhow::bail!("transports shut down before Studio connected"),
        }
    }

    server
        .broadcast(&DaemonMessage::BuildSnapshot { data: records })
        .await;
    tokio::time::sleep(LINGER).await;
    info!("snapshot delivered");
    Ok(())
}
