//! Session orchestrator - the client side of the signaling protocol
//!
//! Owns the signaling channel, the collection of live peer sessions and
//! the local media source. Inbound relay frames are dispatched as typed
//! commands to the session matching their `from` id (created on demand for
//! offers); engine callbacks arrive on an event queue and are handled the
//! same way. Session state is only ever mutated here, by the event loop,
//! so unrelated sessions never contend.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::track::track_remote::TrackRemote;

use super::media::MediaSource;
use super::peer::{PeerSession, SessionDirection, SessionEvent, SessionState};
use crate::config::SessionConfig;
use crate::protocol::{ClientMessage, PeerId, ServerMessage};

/// What rendering needs to know about one remote peer: the current state
/// label and the current remote media track, if one has arrived.
#[derive(Clone)]
pub struct PeerView {
    pub peer_id: PeerId,
    pub direction: SessionDirection,
    pub state: SessionState,
    pub remote_track: Option<Arc<TrackRemote>>,
}

/// Shared read view over the live sessions, for display. The orchestrator
/// writes it; everyone else only reads.
pub struct SessionDirectory {
    views: RwLock<HashMap<PeerId, PeerView>>,
}

impl SessionDirectory {
    fn new() -> Self {
        Self {
            views: RwLock::new(HashMap::new()),
        }
    }

    pub async fn snapshot(&self) -> Vec<PeerView> {
        self.views.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: &PeerId) -> Option<PeerView> {
        self.views.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.views.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.views.read().await.is_empty()
    }

    async fn insert(&self, id: PeerId, direction: SessionDirection) {
        self.views.write().await.insert(
            id.clone(),
            PeerView {
                peer_id: id,
                direction,
                state: SessionState::Idle,
                remote_track: None,
            },
        );
    }

    async fn set_state(&self, id: &PeerId, state: SessionState) {
        if let Some(view) = self.views.write().await.get_mut(id) {
            view.state = state;
        }
    }

    async fn set_track(&self, id: &PeerId, track: Arc<TrackRemote>) {
        if let Some(view) = self.views.write().await.get_mut(id) {
            view.remote_track = Some(track);
        }
    }

    async fn remove(&self, id: &PeerId) {
        self.views.write().await.remove(id);
    }

    async fn clear(&self) {
        self.views.write().await.clear();
    }
}

/// Stops a running orchestrator from another task. Safe to call at any
/// point, including mid-negotiation, and more than once.
#[derive(Clone)]
pub struct StopHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub struct SessionOrchestrator {
    config: SessionConfig,
    media: Arc<dyn MediaSource>,
    sessions: HashMap<PeerId, PeerSession>,
    directory: Arc<SessionDirectory>,
    shutdown: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    signaling_tx: mpsc::Sender<ClientMessage>,
    signaling_rx: Option<mpsc::Receiver<ClientMessage>>,
    event_tx: mpsc::Sender<SessionEvent>,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
}

impl SessionOrchestrator {
    /// Exactly one orchestrator is active per local user session.
    pub fn new(config: SessionConfig, media: Arc<dyn MediaSource>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (signaling_tx, signaling_rx) = mpsc::channel(100);
        let (event_tx, event_rx) = mpsc::channel(100);

        Self {
            config,
            media,
            sessions: HashMap::new(),
            directory: Arc::new(SessionDirectory::new()),
            shutdown: Arc::new(shutdown),
            shutdown_rx,
            signaling_tx,
            signaling_rx: Some(signaling_rx),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Read view over the live sessions, for rendering.
    pub fn directory(&self) -> Arc<SessionDirectory> {
        self.directory.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Open the signaling channel, request the peer directory, then drive
    /// everything from events until stopped. On return every session is
    /// closed, the directory is empty and the channel to the relay is
    /// gone; no outstanding negotiation step is resumed afterwards.
    pub async fn run(&mut self) -> Result<()> {
        let (ws, _) = connect_async(&self.config.relay_url)
            .await
            .context("failed to connect to signaling relay")?;
        let (mut sink, mut stream) = ws.split();
        info!("connected to relay at {}", self.config.relay_url);

        sink.send(Message::Text(serde_json::to_string(&ClientMessage::List)?))
            .await?;

        let mut signaling_rx = self
            .signaling_rx
            .take()
            .context("orchestrator already ran")?;
        let mut event_rx = self.event_rx.take().context("orchestrator already ran")?;
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("orchestrator stopping");
                        break;
                    }
                }
                Some(msg) = signaling_rx.recv() => {
                    let text = serde_json::to_string(&msg)?;
                    if sink.send(Message::Text(text)).await.is_err() {
                        warn!("signaling channel closed while sending {}", msg.kind());
                        break;
                    }
                }
                Some(event) = event_rx.recv() => {
                    self.handle_session_event(event).await;
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerMessage>(&text) {
                                Ok(msg) => {
                                    if let Err(e) = self.handle_server_message(msg).await {
                                        debug!("error handling relay frame: {}", e);
                                    }
                                }
                                Err(e) => debug!("unparseable relay frame: {}", e),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("relay closed the signaling channel");
                            break;
                        }
                        Some(Err(e)) => {
                            error!("signaling channel error: {}", e);
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }

        let _ = sink.send(Message::Close(None)).await;
        self.teardown().await;
        Ok(())
    }

    /// Dispatch one relay frame to the session it belongs to.
    pub(crate) async fn handle_server_message(&mut self, msg: ServerMessage) -> Result<()> {
        match msg {
            ServerMessage::PeerList { peers } => {
                info!("peer directory: {} others", peers.len());
                for peer_id in peers {
                    if self.sessions.contains_key(&peer_id) {
                        continue;
                    }
                    if let Err(e) = self
                        .create_session(peer_id.clone(), SessionDirection::Outbound)
                        .await
                    {
                        // Contained: one failed session must not stop the rest.
                        error!("failed to open session to {}: {}", peer_id.short(), e);
                    }
                }
            }
            ServerMessage::Offer { from, sdp } => {
                debug!("offer from {}", from.short());
                if !self.sessions.contains_key(&from) {
                    self.create_session(from.clone(), SessionDirection::Inbound)
                        .await?;
                }
                if let Some(session) = self.sessions.get_mut(&from) {
                    session.handle_offer(sdp).await?;
                    self.directory.set_state(&from, session.state()).await;
                }
            }
            ServerMessage::Answer { from, sdp } => {
                match self.sessions.get_mut(&from) {
                    Some(session) => session.handle_answer(sdp).await?,
                    None => {
                        // Protocol violation from a stale or misbehaving
                        // peer; discard, never escalate.
                        warn!("answer from {} with no session, dropped", from.short());
                    }
                }
            }
            ServerMessage::Ice { from, sdp } => {
                match self.sessions.get_mut(&from) {
                    Some(session) => session.handle_candidate(sdp).await?,
                    None => {
                        // No buffering or replay for early candidates.
                        debug!("candidate from {} with no session, dropped", from.short());
                    }
                }
            }
        }
        Ok(())
    }

    /// Dispatch one engine notification.
    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::NegotiationNeeded(peer_id) => {
                if let Some(session) = self.sessions.get_mut(&peer_id) {
                    if let Err(e) = session.start_negotiation().await {
                        error!("negotiation with {} failed: {}", peer_id.short(), e);
                    }
                    self.directory.set_state(&peer_id, session.state()).await;
                }
            }
            SessionEvent::Connectivity(peer_id, state) => match state {
                RTCPeerConnectionState::Connected => {
                    if let Some(session) = self.sessions.get_mut(&peer_id) {
                        session.mark_connected();
                        self.directory.set_state(&peer_id, session.state()).await;
                    }
                }
                RTCPeerConnectionState::Failed
                | RTCPeerConnectionState::Disconnected
                | RTCPeerConnectionState::Closed => {
                    // Terminal. Remove the session and everything derived
                    // from it in one step; duplicate failure events for an
                    // already-removed peer are no-ops.
                    if let Some(mut session) = self.sessions.remove(&peer_id) {
                        info!("peer {} gone ({:?}), closing session", peer_id.short(), state);
                        if let Err(e) = session.close().await {
                            debug!("error closing session {}: {}", peer_id.short(), e);
                        }
                        self.directory.remove(&peer_id).await;
                    }
                }
                _ => {}
            },
            SessionEvent::TrackAdded(peer_id, track) => {
                self.directory.set_track(&peer_id, track).await;
            }
        }
    }

    async fn create_session(&mut self, peer_id: PeerId, direction: SessionDirection) -> Result<()> {
        let session = PeerSession::new(
            peer_id.clone(),
            direction,
            self.signaling_tx.clone(),
            self.event_tx.clone(),
            self.media.as_ref(),
            &self.config.stun_servers,
        )
        .await?;

        info!("new {} session for {}", direction, peer_id.short());
        self.directory.insert(peer_id.clone(), direction).await;
        self.sessions.insert(peer_id, session);
        Ok(())
    }

    /// Close every session and discard all derived state.
    async fn teardown(&mut self) {
        for (peer_id, mut session) in self.sessions.drain() {
            if let Err(e) = session.close().await {
                debug!("error closing session {}: {}", peer_id.short(), e);
            }
        }
        self.directory.clear().await;
        info!("all sessions closed");
    }
}
