//! Signaling relay - accepts peer connections and routes messages by id
//!
//! The relay never sees media. It assigns each WebSocket connection an
//! opaque id, answers directory queries, and forwards offer/answer/ice
//! frames to their addressee with the sender's id stamped as `from`.
//! Delivery is at-most-once best effort: a frame addressed to an unknown
//! or vanished peer is dropped silently, and no peer is ever notified of
//! another's disconnect.

mod registry;

pub use registry::ConnectionRegistry;

use crate::protocol::{ClientMessage, PeerId, ServerMessage};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::any,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared state behind the WebSocket route.
#[derive(Clone)]
pub struct RelayState {
    pub registry: Arc<ConnectionRegistry>,
}

impl RelayState {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
        }
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RelayServer {
    state: RelayState,
    addr: String,
}

impl RelayServer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            state: RelayState::new(),
            addr: addr.into(),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The axum router serving the signaling endpoint.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", any(ws_handler))
            .with_state(self.state.clone())
    }

    /// Bind the listen address and serve until the process exits.
    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("signaling relay listening on ws://{}", self.addr);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One logical actor per connected peer: read frames sequentially, route
/// each, clean up the registry entry on disconnect. Frames from a single
/// sender stay in order; each recipient's queue preserves insertion order,
/// so delivery is FIFO per sender-channel.
async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(100);

    // Spawn task to forward queued messages to this client
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(_) => continue,
            };
            if ws_sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let reply_tx = tx.clone();
    let peer_id = state.registry.register(tx).await;
    info!("peer connected: {}", peer_id);

    while let Some(result) = ws_stream.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("websocket error from {}: {}", peer_id.short(), e);
                break;
            }
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(msg) => dispatch(&state, &peer_id, &reply_tx, msg).await,
            Err(e) => {
                // One peer's garbage must not affect anyone else.
                debug!("malformed frame from {}: {}", peer_id.short(), e);
            }
        }
    }

    state.registry.unregister(&peer_id).await;
    info!(
        "peer disconnected: {} ({} still connected)",
        peer_id,
        state.registry.len().await
    );
    send_task.abort();
}

async fn dispatch(
    state: &RelayState,
    sender: &PeerId,
    reply_tx: &mpsc::Sender<ServerMessage>,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::List => {
            let peers = state.registry.list_others(sender).await;
            debug!("list request from {}: {} others", sender.short(), peers.len());
            let _ = reply_tx.send(ServerMessage::PeerList { peers }).await;
        }
        ClientMessage::Offer { to, sdp } => {
            route(state, sender, &to, ServerMessage::Offer {
                from: sender.clone(),
                sdp,
            })
            .await;
        }
        ClientMessage::Answer { to, sdp } => {
            route(state, sender, &to, ServerMessage::Answer {
                from: sender.clone(),
                sdp,
            })
            .await;
        }
        ClientMessage::Ice { to, sdp } => {
            route(state, sender, &to, ServerMessage::Ice {
                from: sender.clone(),
                sdp,
            })
            .await;
        }
    }
}

/// Atomic lookup-and-forward. An unknown addressee means the frame is
/// dropped; the sender is not told.
async fn route(state: &RelayState, sender: &PeerId, to: &PeerId, msg: ServerMessage) {
    match state.registry.sender(to).await {
        Some(tx) => {
            debug!("{} from {} -> {}", msg.kind(), sender.short(), to.short());
            if tx.send(msg).await.is_err() {
                // Recipient is tearing down; same as not registered.
                warn!("dropped message for closing peer {}", to.short());
            }
        }
        None => {
            debug!(
                "{} from {} -> {}: no such peer, dropped",
                msg.kind(),
                sender.short(),
                to.short()
            );
        }
    }
}
