//! Per-peer connection session
//!
//! One `PeerSession` per remote peer id, owning exactly one underlying
//! peer connection. The session drives the engine through offer/answer and
//! candidate exchange; everything the engine reports asynchronously is
//! forwarded as a typed event or an outbound signaling message, never by
//! mutating shared state from a callback.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

use super::media::MediaSource;
use crate::protocol::{ClientMessage, PeerId};

/// Lifecycle of one session. `Closed` is terminal: a session is never
/// resurrected, a returning peer id gets a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    Connected,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Negotiating => write!(f, "negotiating"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Which side opened the pairing. Outbound sessions initiate when the
/// engine signals negotiation-needed; inbound sessions exist because an
/// offer arrived and only ever answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDirection {
    Outbound,
    Inbound,
}

impl std::fmt::Display for SessionDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionDirection::Outbound => write!(f, "outbound"),
            SessionDirection::Inbound => write!(f, "inbound"),
        }
    }
}

/// Engine notifications, surfaced to the orchestrator as messages rather
/// than handled inside callbacks.
pub enum SessionEvent {
    NegotiationNeeded(PeerId),
    Connectivity(PeerId, RTCPeerConnectionState),
    TrackAdded(PeerId, Arc<TrackRemote>),
}

pub struct PeerSession {
    peer_id: PeerId,
    direction: SessionDirection,
    state: SessionState,
    pc: Arc<RTCPeerConnection>,
    signaling_tx: mpsc::Sender<ClientMessage>,
}

impl PeerSession {
    /// Create the underlying peer connection, install its callbacks and
    /// attach the shared local tracks. Callbacks go in before tracks:
    /// attaching a track is what raises the engine's negotiation-needed
    /// signal, and a signal raised with no handler installed is lost.
    ///
    /// A source with no tracks still negotiates: a receive-only video
    /// transceiver is added so the engine has something to offer.
    pub async fn new(
        peer_id: PeerId,
        direction: SessionDirection,
        signaling_tx: mpsc::Sender<ClientMessage>,
        event_tx: mpsc::Sender<SessionEvent>,
        media: &dyn MediaSource,
        stun_servers: &[String],
    ) -> Result<Self> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await?);

        let session = Self {
            peer_id,
            direction,
            state: SessionState::Idle,
            pc,
            signaling_tx,
        };
        session.install_handlers(event_tx);

        let tracks = media.tracks();
        if tracks.is_empty() {
            debug!("no local tracks for {}, receive-only", session.peer_id.short());
            session
                .pc
                .add_transceiver_from_kind(
                    RTPCodecType::Video,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: Vec::new(),
                    }),
                )
                .await?;
        } else {
            for track in tracks {
                session.pc.add_track(track).await?;
            }
        }

        Ok(session)
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn direction(&self) -> SessionDirection {
        self.direction
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.pc.connection_state() == RTCPeerConnectionState::Connected
    }

    /// Install engine callbacks. Candidates go straight out as signaling
    /// messages, one per discovery, as soon as each is produced; everything
    /// else is forwarded to the orchestrator's event queue.
    fn install_handlers(&self, event_tx: mpsc::Sender<SessionEvent>) {
        let signaling_tx = self.signaling_tx.clone();
        let to = self.peer_id.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let signaling_tx = signaling_tx.clone();
                let to = to.clone();

                Box::pin(async move {
                    if let Some(c) = candidate {
                        if let Ok(init) = c.to_json() {
                            let sdp = serde_json::to_value(&init).unwrap_or_default();
                            let _ = signaling_tx.send(ClientMessage::Ice { to, sdp }).await;
                        }
                    }
                })
            }));

        let peer_id = self.peer_id.clone();
        let tx = event_tx.clone();
        self.pc.on_negotiation_needed(Box::new(move || {
            let peer_id = peer_id.clone();
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(SessionEvent::NegotiationNeeded(peer_id)).await;
            })
        }));

        let peer_id = self.peer_id.clone();
        let tx = event_tx.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let peer_id = peer_id.clone();
                let tx = tx.clone();
                Box::pin(async move {
                    info!("peer {} connection state: {:?}", peer_id.short(), state);
                    let _ = tx.send(SessionEvent::Connectivity(peer_id, state)).await;
                })
            }));

        let peer_id = self.peer_id.clone();
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let peer_id = peer_id.clone();
            let tx = event_tx.clone();
            Box::pin(async move {
                info!("peer {} remote track added", peer_id.short());
                let _ = tx.send(SessionEvent::TrackAdded(peer_id, track)).await;
            })
        }));
    }

    /// React to the engine's negotiation-needed signal by producing an
    /// offer. Only outbound sessions that have not started negotiating do
    /// anything here; an inbound session's negotiation is driven entirely
    /// by the offer it was created for.
    ///
    /// Glare is not tie-broken: if both ends become negotiation-needed at
    /// the same time, one of the two negotiations may be silently lost.
    pub async fn start_negotiation(&mut self) -> Result<()> {
        if self.direction != SessionDirection::Outbound || self.state != SessionState::Idle {
            return Ok(());
        }

        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;

        let sdp = serde_json::json!({ "type": "offer", "sdp": offer.sdp });
        self.signaling_tx
            .send(ClientMessage::Offer {
                to: self.peer_id.clone(),
                sdp,
            })
            .await
            .context("signaling channel closed")?;

        debug!("sent offer to {}", self.peer_id.short());
        self.state = SessionState::Negotiating;
        Ok(())
    }

    /// Apply a remote offer and reply with an answer.
    pub async fn handle_offer(&mut self, sdp: serde_json::Value) -> Result<()> {
        let offer_sdp = sdp
            .get("sdp")
            .and_then(|s| s.as_str())
            .ok_or_else(|| anyhow!("missing sdp in offer"))?;

        let offer = RTCSessionDescription::offer(offer_sdp.to_string())?;
        self.pc.set_remote_description(offer).await?;

        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;

        let sdp = serde_json::json!({ "type": "answer", "sdp": answer.sdp });
        self.signaling_tx
            .send(ClientMessage::Answer {
                to: self.peer_id.clone(),
                sdp,
            })
            .await
            .context("signaling channel closed")?;

        debug!("sent answer to {}", self.peer_id.short());
        self.state = SessionState::Negotiating;
        Ok(())
    }

    /// Apply a remote answer to our outstanding offer.
    pub async fn handle_answer(&mut self, sdp: serde_json::Value) -> Result<()> {
        let answer_sdp = sdp
            .get("sdp")
            .and_then(|s| s.as_str())
            .ok_or_else(|| anyhow!("missing sdp in answer"))?;

        let answer = RTCSessionDescription::answer(answer_sdp.to_string())?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    /// Feed a remote connectivity candidate into the engine's pool. An
    /// empty candidate string (end-of-candidates marker) is ignored.
    pub async fn handle_candidate(&mut self, sdp: serde_json::Value) -> Result<()> {
        if let Some(init) = candidate_init(&sdp) {
            self.pc.add_ice_candidate(init).await?;
        }
        Ok(())
    }

    /// The transport reported a usable path after both descriptions were
    /// set.
    pub fn mark_connected(&mut self) {
        if self.state != SessionState::Closed {
            self.state = SessionState::Connected;
        }
    }

    /// Close the underlying connection. Idempotent: closing an
    /// already-closed session does nothing.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        self.pc.close().await?;
        Ok(())
    }
}

/// Pull the candidate fields out of a wire payload. Fields that do not
/// parse cleanly become `None` rather than a mangled value; a missing or
/// empty candidate string yields no init at all.
pub(crate) fn candidate_init(sdp: &serde_json::Value) -> Option<RTCIceCandidateInit> {
    let candidate = sdp.get("candidate").and_then(|c| c.as_str()).unwrap_or("");
    if candidate.is_empty() {
        return None;
    }

    Some(RTCIceCandidateInit {
        candidate: candidate.to_string(),
        sdp_mid: sdp
            .get("sdpMid")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string()),
        sdp_mline_index: sdp
            .get("sdpMLineIndex")
            .and_then(|i| i.as_u64())
            .and_then(|i| u16::try_from(i).ok()),
        username_fragment: sdp
            .get("usernameFragment")
            .and_then(|u| u.as_str())
            .map(|s| s.to_string()),
    })
}
