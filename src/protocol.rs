//! Signaling wire protocol
//!
//! One JSON text frame per message. Kind names carry a direction suffix:
//! `-1` is client-to-relay, `-2` is relay-to-client. A client addresses a
//! message with `to`; the relay strips it and stamps the sender's id as
//! `from` before forwarding, so the two fields never appear on the same
//! frame.

use serde::{Deserialize, Serialize};

/// Opaque peer identifier, assigned by the relay for the lifetime of one
/// signaling connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh base-36 id. 30 chars of entropy is collision-free
    /// for any realistic number of connections in one process lifetime.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        Self(
            (0..30)
                .map(|_| char::from_digit(rng.gen_range(0..36), 36).unwrap())
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines. Ids the relay generates are ASCII,
    /// but this is also called on ids copied off the wire, so the cut
    /// has to land on a char boundary.
    pub fn short(&self) -> &str {
        self.0
            .char_indices()
            .nth(8)
            .map_or(self.0.as_str(), |(i, _)| &self.0[..i])
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages a client sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "list-1")]
    List,
    #[serde(rename = "offer-1")]
    Offer { to: PeerId, sdp: serde_json::Value },
    #[serde(rename = "answer-1")]
    Answer { to: PeerId, sdp: serde_json::Value },
    #[serde(rename = "ice-1")]
    Ice { to: PeerId, sdp: serde_json::Value },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::List => "list-1",
            ClientMessage::Offer { .. } => "offer-1",
            ClientMessage::Answer { .. } => "answer-1",
            ClientMessage::Ice { .. } => "ice-1",
        }
    }

    pub fn to(&self) -> Option<&PeerId> {
        match self {
            ClientMessage::List => None,
            ClientMessage::Offer { to, .. }
            | ClientMessage::Answer { to, .. }
            | ClientMessage::Ice { to, .. } => Some(to),
        }
    }
}

/// Messages the relay delivers to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "list-2")]
    PeerList { peers: Vec<PeerId> },
    #[serde(rename = "offer-2")]
    Offer { from: PeerId, sdp: serde_json::Value },
    #[serde(rename = "answer-2")]
    Answer { from: PeerId, sdp: serde_json::Value },
    #[serde(rename = "ice-2")]
    Ice { from: PeerId, sdp: serde_json::Value },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::PeerList { .. } => "list-2",
            ServerMessage::Offer { .. } => "offer-2",
            ServerMessage::Answer { .. } => "answer-2",
            ServerMessage::Ice { .. } => "ice-2",
        }
    }

    pub fn from(&self) -> Option<&PeerId> {
        match self {
            ServerMessage::PeerList { .. } => None,
            ServerMessage::Offer { from, .. }
            | ServerMessage::Answer { from, .. }
            | ServerMessage::Ice { from, .. } => Some(from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_request_format() {
        let json = serde_json::to_string(&ClientMessage::List).unwrap();
        assert_eq!(json, r#"{"type":"list-1"}"#);

        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), "list-1");
        assert!(parsed.to().is_none());
    }

    #[test]
    fn test_offer_request_format() {
        let sdp = serde_json::json!({
            "type": "offer",
            "sdp": "v=0\r\no=- 123 456 IN IP4 127.0.0.1\r\n"
        });
        let msg = ClientMessage::Offer {
            to: PeerId::new("peer-b"),
            sdp,
        };
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"offer-1\""));
        assert!(json.contains("\"to\":\"peer-b\""));
        // A client never supplies `from`.
        assert!(!json.contains("\"from\""));

        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.to().unwrap().as_str(), "peer-b");
    }

    #[test]
    fn test_forwarded_offer_format() {
        let msg = ServerMessage::Offer {
            from: PeerId::new("peer-a"),
            sdp: serde_json::json!({"type": "offer", "sdp": "v=0"}),
        };
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"offer-2\""));
        // The relay never forwards the original `to`.
        assert!(!json.contains("\"to\""));

        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), "offer-2");
        assert_eq!(parsed.from().unwrap().as_str(), "peer-a");
    }

    #[test]
    fn test_answer_and_ice_formats() {
        let answer = ClientMessage::Answer {
            to: PeerId::new("x"),
            sdp: serde_json::json!({"type": "answer", "sdp": "v=0"}),
        };
        assert_eq!(answer.kind(), "answer-1");

        let ice = ServerMessage::Ice {
            from: PeerId::new("y"),
            sdp: serde_json::json!({
                "candidate": "candidate:1 1 UDP 2130706431 192.168.1.1 54321 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            }),
        };
        let json = serde_json::to_string(&ice).unwrap();
        assert!(json.contains("\"type\":\"ice-2\""));
        assert!(json.contains("sdpMid"));
    }

    #[test]
    fn test_peer_list_format() {
        let msg = ServerMessage::PeerList {
            peers: vec![PeerId::new("a"), PeerId::new("b")],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"list-2","peers":["a","b"]}"#);

        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            ServerMessage::PeerList { peers } => assert_eq!(peers.len(), 2),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_browser_client_frame() {
        // Exact shape a browser client emits for an ICE candidate.
        let frame = r#"{"type":"ice-1","to":"abc123","sdp":{"candidate":"candidate:0 1 UDP 1 10.0.0.1 9 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        let parsed: ClientMessage = serde_json::from_str(frame).unwrap();
        assert_eq!(parsed.kind(), "ice-1");
        assert_eq!(parsed.to().unwrap().as_str(), "abc123");
    }

    #[test]
    fn test_short_id_respects_char_boundaries() {
        // Ids arrive off the wire, so nothing guarantees ASCII.
        assert_eq!(PeerId::new("€€€€").short(), "€€€€");
        assert_eq!(PeerId::new("éééééééééé").short(), "éééééééé");
        assert_eq!(PeerId::new("abc").short(), "abc");
        assert_eq!(PeerId::new("").short(), "");
    }

    #[test]
    fn test_peer_id_generation() {
        let a = PeerId::generate();
        let b = PeerId::generate();

        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 30);
        assert_eq!(a.short().len(), 8);
    }
}
