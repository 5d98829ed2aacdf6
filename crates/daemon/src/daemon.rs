//! The orchestrator: one serialized event loop over every event source.
//!
//! WebSocket frames, polled messages, and debounced watcher events all land
//! on a single mpsc channel; each is handled to completion before the next,
//! so the tree, the file mapping, and the sourcemap never see overlapping
//! mutation. Handled failures produce exactly one log line and the loop
//! moves on; only startup failures escape.

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tether_protocol::{DaemonMessage, InstanceRecord, StudioMessage};

use crate::config::Config;
use crate::error::SyncError;
use crate::projector::FileProjector;
use crate::server::SyncServer;
use crate::sourcemap::SourcemapGenerator;
use crate::tree::{InstanceNode, TreeManager};
use crate::watcher::{FileWatcher, WatchEvent};

/// Everything the orchestrator reacts to.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A parsed message from the plugin, via either transport.
    Remote(StudioMessage),
    /// A debounced external edit under the sync root.
    LocalChange(WatchEvent),
    /// A push-channel session opened.
    Connected { session: Uuid },
    /// A push-channel session dropped.
    Disconnected { session: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Disconnected,
    AwaitingSnapshot,
    Synced,
}

/// Wires the tree, projector, watcher, and sourcemap together behind the
/// single mutation stream.
pub struct SyncDaemon {
    config: Config,
    tree: TreeManager,
    projector: FileProjector,
    watcher: FileWatcher,
    sourcemap: SourcemapGenerator,
    server: SyncServer,
    state: SyncState,
    watch_tx: mpsc::UnboundedSender<WatchEvent>,
}

impl SyncDaemon {
    pub fn new(
        config: Config,
        server: SyncServer,
        watch_tx: mpsc::UnboundedSender<WatchEvent>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.sync.dir)
            .with_context(|| format!("cannot create sync dir {}", config.sync.dir.display()))?;
        // Watcher events arrive with resolved paths; the mapping must match.
        let base_dir = config
            .sync
            .dir
            .canonicalize()
            .unwrap_or_else(|_| config.sync.dir.clone());

        Ok(Self {
            projector: FileProjector::new(&base_dir, &config.sync.script_extension),
            sourcemap: SourcemapGenerator::new(&base_dir),
            watcher: FileWatcher::new(config.debounce()),
            tree: TreeManager::new(),
            server,
            state: SyncState::Disconnected,
            watch_tx,
            config,
        })
    }

    /// Handle one event to completion. This is the only place any of the
    /// owned components mutate.
    pub async fn handle_event(&mut self, event: DaemonEvent) {
        match event {
            DaemonEvent::Connected { session } => {
                debug!(%session, "session opened");
                if self.state == SyncState::Disconnected {
                    self.state = SyncState::AwaitingSnapshot;
                }
            }
            DaemonEvent::Disconnected { session } => {
                debug!(%session, "session closed, watcher stays active");
                self.state = SyncState::Disconnected;
            }
            DaemonEvent::Remote(message) => {
                // The polling transport has no connect handshake; its first
                // message doubles as one.
                if self.state == SyncState::Disconnected {
                    self.state = SyncState::AwaitingSnapshot;
                }
                self.handle_remote(message).await;
            }
            DaemonEvent::LocalChange(change) => self.handle_local_change(change).await,
        }
    }

    async fn handle_remote(&mut self, message: StudioMessage) {
        match message {
            StudioMessage::FullSnapshot { data } => {
                if let Err(err) = self.handle_full_snapshot(data) {
                    error!(%err, "failed to apply full snapshot");
                }
            }
            StudioMessage::ScriptChanged {
                guid,
                source,
                path,
                class_name,
            } => {
                if let Err(err) = self.handle_script_changed(guid, source, path, class_name) {
                    warn!(%err, "failed to apply script change");
                }
            }
            StudioMessage::InstanceUpdated { data } => {
                if let Err(err) = self.handle_instance_updated(data) {
                    warn!(%err, "failed to apply instance update");
                }
            }
            StudioMessage::Deleted { guid } => {
                if let Err(err) = self.handle_deleted(&guid) {
                    warn!(%err, "failed to apply deletion");
                }
            }
            StudioMessage::Ping => {
                self.server.broadcast(&DaemonMessage::Pong).await;
            }
            StudioMessage::ClientDisconnect => {
                info!("plugin requested to close the session");
                self.server.close_sessions().await;
                self.state = SyncState::Disconnected;
            }
        }
    }

    fn handle_full_snapshot(&mut self, data: Vec<InstanceRecord>) -> Result<(), SyncError> {
        info!(instances = data.len(), "received full snapshot");
        self.tree.apply_full_snapshot(data);

        let nodes = self.tree.all_nodes();
        // On reconnect the watcher is already live; every projection write
        // is self-caused.
        for node in &nodes {
            if node.is_script() {
                self.watcher.suppress_next_change(self.projector.file_path(node));
            }
        }
        self.projector.write_tree(&nodes)?;

        if self.config.sync.delete_orphans_on_connect {
            let orphans = self.projector.remove_orphans()?;
            if orphans > 0 {
                info!(orphans, "removed untracked script files");
            }
        }

        let watch = self.watcher.watch(
            self.projector.base_dir(),
            &self.config.sync.script_extension,
            self.watch_tx.clone(),
        );
        if let Err(err) = watch {
            warn!(%err, "failed to start file watcher");
        }

        self.sourcemap.generate_and_write(
            &nodes,
            self.projector.mappings(),
            &self.config.sync.sourcemap_path,
        )?;

        let stats = self.tree.stats();
        info!(
            scripts = stats.script_nodes,
            total = stats.total_nodes,
            "sync complete"
        );
        self.state = SyncState::Synced;
        Ok(())
    }

    fn handle_script_changed(
        &mut self,
        guid: String,
        source: String,
        path: Vec<String>,
        class_name: tether_protocol::ClassName,
    ) -> Result<(), SyncError> {
        self.tree.update_script_source(&guid, &source);

        if self.tree.get_node(&guid).is_none() {
            // First sighting of this script: create it, then write.
            let name = path.last().cloned().unwrap_or_default();
            self.tree.update_instance(InstanceRecord {
                guid: guid.clone(),
                class_name,
                name,
                path,
                source: Some(source),
            });
        }

        let Some(node) = self.tree.get_node(&guid).cloned() else {
            return Err(SyncError::UnknownReference(guid));
        };

        self.write_suppressed(&node)?;

        let nodes = self.tree.all_nodes();
        self.sourcemap.upsert_subtree(
            &node,
            &nodes,
            self.projector.mappings(),
            &self.config.sync.sourcemap_path,
            None,
        )
    }

    fn handle_instance_updated(&mut self, data: InstanceRecord) -> Result<(), SyncError> {
        let update = self.tree.update_instance(data);
        let node = update.node.clone();

        let mut to_write: Vec<InstanceNode> = Vec::new();
        if node.is_script() {
            to_write.push(node.clone());
        }
        if update.path_changed || update.name_changed {
            to_write.extend(self.tree.descendant_scripts(&node.guid).into_iter().cloned());
        }

        if !node.is_script() {
            self.projector.ensure_container(&node)?;
        }
        for script in &to_write {
            self.write_suppressed(script)?;
        }

        if update.path_changed || update.name_changed || node.is_script() {
            let nodes = self.tree.all_nodes();
            self.sourcemap.upsert_subtree(
                &node,
                &nodes,
                self.projector.mappings(),
                &self.config.sync.sourcemap_path,
                update.prev_path.as_deref(),
            )?;
        }

        self.projector.cleanup_empty_directories()?;
        Ok(())
    }

    fn handle_deleted(&mut self, guid: &str) -> Result<(), SyncError> {
        let node = self.tree.get_node(guid).cloned();
        if node.is_none() {
            debug!(guid, "deletion for unknown instance, treating as no-op");
        }
        let fallback_path = node.as_ref().map(|n| self.projector.file_path(n));
        let prev_path = node.map(|n| n.path);

        self.tree.delete_instance(guid);

        let deleted = self.projector.delete_script(guid)?;
        if !deleted {
            // Mapping already lost; fall back to the derived path.
            if let Some(path) = fallback_path {
                self.projector.delete_file_path(&path)?;
            }
        }

        let nodes = self.tree.all_nodes();
        match prev_path {
            Some(segments) => self.sourcemap.prune_path(
                &segments,
                &self.config.sync.sourcemap_path,
                &nodes,
                self.projector.mappings(),
            )?,
            None => self.sourcemap.generate_and_write(
                &nodes,
                self.projector.mappings(),
                &self.config.sync.sourcemap_path,
            )?,
        }

        self.projector.cleanup_empty_directories()?;
        Ok(())
    }

    async fn handle_local_change(&mut self, change: WatchEvent) {
        let Some(guid) = self.projector.guid_by_path(&change.path) else {
            warn!(path = %change.path.display(), "no mapping for changed file");
            return;
        };
        let guid = guid.to_string();

        info!(path = %change.path.display(), "file changed externally");
        self.tree.update_script_source(&guid, &change.source);
        self.server
            .broadcast(&DaemonMessage::PatchScript {
                guid,
                source: change.source,
            })
            .await;
    }

    /// Register suppression for the node's target path, then write it.
    fn write_suppressed(&mut self, node: &InstanceNode) -> Result<(), SyncError> {
        let path = self.projector.file_path(node);
        self.watcher.suppress_next_change(path);
        self.projector.write_script(node)?;
        Ok(())
    }

    /// Stop observation and release watcher resources.
    pub fn shutdown(&mut self) {
        self.watcher.stop();
    }
}

/// Bind the transports and run the daemon until interrupted.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    // Watcher emissions join the same serialized stream as remote messages.
    let (watch_tx, mut watch_rx) = mpsc::unbounded_channel();
    let forward_tx = events_tx.clone();
    tokio::spawn(async move {
        while let Some(change) = watch_rx.recv().await {
            if forward_tx.send(DaemonEvent::LocalChange(change)).is_err() {
                break;
            }
        }
    });

    let server = SyncServer::new(events_tx);
    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;

    let router = server.router();
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            error!(%err, "server terminated");
        }
    });

    let mut daemon = SyncDaemon::new(config, server, watch_tx)?;
    info!("listening on http://{bind_address}");
    info!("waiting for Studio connection...");

    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(event) => daemon.handle_event(event).await,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                daemon.shutdown();
                break;
            }
        }
    }
    Ok(())
}
