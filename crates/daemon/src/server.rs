//! Dual-transport server: WebSocket push channel + HTTP long-poll fallback.
//!
//! Both transports parse frames into the typed message catalogue at the
//! boundary and funnel them onto the daemon's single event channel, and both
//! can carry outbound pushes: WebSocket sessions get them directly, polling
//! clients drain a shared queue woken by a watch trigger.

use std::collections::VecDeque;
use std::sync::Arc;

use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tether_protocol::{DaemonMessage, StudioMessage};

use crate::daemon::DaemonEvent;

/// How long a poll request parks before returning empty-handed.
const POLL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

/// Shared transport state.
pub struct ServerState {
    events_tx: mpsc::UnboundedSender<DaemonEvent>,
    sessions: DashMap<Uuid, mpsc::UnboundedSender<String>>,
    poll_queue: Mutex<VecDeque<DaemonMessage>>,
    trigger: watch::Sender<()>,
    trigger_rx: watch::Receiver<()>,
}

/// The daemon-facing handle over both transports.
#[derive(Clone)]
pub struct SyncServer {
    state: Arc<ServerState>,
}

impl SyncServer {
    pub fn new(events_tx: mpsc::UnboundedSender<DaemonEvent>) -> Self {
        let (trigger, trigger_rx) = watch::channel(());
        Self {
            state: Arc::new(ServerState {
                events_tx,
                sessions: DashMap::new(),
                poll_queue: Mutex::new(VecDeque::new()),
                trigger,
                trigger_rx,
            }),
        }
    }

    /// Build the axum router carrying both transports.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/messages", post(message_handler))
            .route("/poll", get(poll_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone())
    }

    /// Deliver one message to every live WebSocket session and enqueue it
    /// for polling clients. Dead sessions are pruned on send failure.
    pub async fn broadcast(&self, message: &DaemonMessage) {
        let frame = match serde_json::to_string(message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "failed to encode outbound message");
                return;
            }
        };

        let mut dead = Vec::new();
        for session in self.state.sessions.iter() {
            if session.value().send(frame.clone()).is_err() {
                dead.push(*session.key());
            }
        }
        for id in dead {
            self.state.sessions.remove(&id);
        }

        self.state.poll_queue.lock().await.push_back(message.clone());
        let _ = self.state.trigger.send(());
    }

    /// Close every push session; queued poll messages for the dead session
    /// die here rather than being replayed into the next one.
    pub async fn close_sessions(&self) {
        self.state.sessions.clear();
        self.state.poll_queue.lock().await.clear();
    }

    pub fn connection_count(&self) -> usize {
        self.state.sessions.len()
    }
}

/// Upgrade a plugin connection onto the push channel.
async fn ws_handler(
    State(state): State<Arc<ServerState>>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_session(state, socket))
}

async fn handle_session(state: Arc<ServerState>, socket: WebSocket) {
    let session = Uuid::new_v4();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    state.sessions.insert(session, outbound_tx);
    info!(%session, "plugin connected");
    let _ = state.events_tx.send(DaemonEvent::Connected { session });

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Forward outbound frames to the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if ws_sender.send(WsMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // Parse inbound frames at the boundary; malformed ones are logged and
    // dropped, the session survives.
    while let Some(Ok(message)) = ws_receiver.next().await {
        let text = match message {
            WsMessage::Text(text) => text.to_string(),
            WsMessage::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!(%session, "discarding non-utf8 frame");
                    continue;
                }
            },
            WsMessage::Close(_) => {
                debug!(%session, "close frame received");
                break;
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
        };

        match serde_json::from_str::<StudioMessage>(&text) {
            Ok(parsed) => {
                if state.events_tx.send(DaemonEvent::Remote(parsed)).is_err() {
                    break;
                }
            }
            Err(err) => warn!(%session, %err, "discarding malformed message"),
        }
    }

    writer.abort();
    state.sessions.remove(&session);
    info!(%session, "plugin disconnected");
    let _ = state.events_tx.send(DaemonEvent::Disconnected { session });
}

/// Polling-transport inbound: one message per request body.
async fn message_handler(State(state): State<Arc<ServerState>>, body: String) -> impl IntoResponse {
    match serde_json::from_str::<StudioMessage>(&body) {
        Ok(parsed) => {
            let _ = state.events_tx.send(DaemonEvent::Remote(parsed));
            StatusCode::OK
        }
        Err(err) => {
            warn!(%err, "discarding malformed poll message");
            StatusCode::BAD_REQUEST
        }
    }
}

/// Polling-transport outbound: long-poll that drains the shared queue.
async fn poll_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    {
        let mut queue = state.poll_queue.lock().await;
        if !queue.is_empty() {
            let drained: Vec<DaemonMessage> = queue.drain(..).collect();
            return (StatusCode::OK, Json(drained));
        }
    }

    let mut trigger_rx = state.trigger_rx.clone();
    tokio::select! {
        _ = tokio::time::sleep(POLL_TIMEOUT) => {
            (StatusCode::OK, Json(Vec::new()))
        }
        _ = trigger_rx.changed() => {
            let mut queue = state.poll_queue.lock().await;
            let drained: Vec<DaemonMessage> = queue.drain(..).collect();
            (StatusCode::OK, Json(drained))
        }
    }
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.sessions.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_enqueues_for_pollers() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let server = SyncServer::new(events_tx);

        server
            .broadcast(&DaemonMessage::PatchScript {
                guid: "abc".into(),
                source: "return 1".into(),
            })
            .await;

        let queue = server.state.poll_queue.lock().await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn close_sessions_discards_queued_messages() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let server = SyncServer::new(events_tx);
        server.broadcast(&DaemonMessage::Pong).await;

        server.close_sessions().await;
        assert!(server.state.poll_queue.lock().await.is_empty());
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn malformed_poll_message_is_rejected() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let server = SyncServer::new(events_tx);
        let state = server.state.clone();

        let status = message_handler(State(state.clone()), r#"{"type":"teleport"}"#.into())
            .await
            .into_response()
            .status();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let status = message_handler(State(state), r#"{"type":"ping"}"#.into())
            .await
            .into_response()
            .status();
        assert_eq!(status, StatusCode::OK);
        match events_rx.recv().await {
            Some(DaemonEvent::Remote(StudioMessage::Ping)) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
