//! Integration tests for the signaling relay's routing and directory
//! behavior, driven through real WebSocket connections.

use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use vidmesh::{ClientMessage, PeerId, RelayServer, ServerMessage};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = RelayServer::new(addr.to_string()).router();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("ws://{}", addr)
}

async fn connect(url: &str) -> Ws {
    let (ws, _) = connect_async(url).await.expect("failed to connect");
    // Give the relay a moment to register the connection.
    tokio::time::sleep(Duration::from_millis(50)).await;
    ws
}

async fn send(ws: &mut Ws, msg: &ClientMessage) {
    ws.send(Message::Text(serde_json::to_string(msg).unwrap()))
        .await
        .unwrap();
}

async fn recv(ws: &mut Ws) -> ServerMessage {
    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
        .unwrap();
    serde_json::from_str(frame.to_text().unwrap()).unwrap()
}

async fn assert_silent(ws: &mut Ws, ms: u64) {
    let got = tokio::time::timeout(Duration::from_millis(ms), ws.next()).await;
    assert!(got.is_err(), "expected no frame, got {:?}", got);
}

async fn list(ws: &mut Ws) -> Vec<PeerId> {
    send(ws, &ClientMessage::List).await;
    match recv(ws).await {
        ServerMessage::PeerList { peers } => peers,
        other => panic!("expected list-2, got {:?}", other),
    }
}

#[tokio::test]
async fn test_list_excludes_requester() {
    let url = start_relay().await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    let mut c = connect(&url).await;

    let from_a = list(&mut a).await;
    let from_b = list(&mut b).await;
    let from_c = list(&mut c).await;

    // Each sees exactly the other two, never itself, so the three answers
    // cover exactly three distinct ids.
    assert_eq!(from_a.len(), 2);
    assert_eq!(from_b.len(), 2);
    assert_eq!(from_c.len(), 2);

    let union: HashSet<_> = from_a
        .iter()
        .chain(from_b.iter())
        .chain(from_c.iter())
        .cloned()
        .collect();
    assert_eq!(union.len(), 3);
}

#[tokio::test]
async fn test_offer_routed_only_to_addressee() {
    let url = start_relay().await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    let mut c = connect(&url).await;

    // a's view holds {b, c} and b's view holds {a, c}; the differences
    // identify who is who without the relay ever telling anyone its own id.
    let a_view: HashSet<_> = list(&mut a).await.into_iter().collect();
    let b_view: HashSet<_> = list(&mut b).await.into_iter().collect();
    let b_id = a_view.difference(&b_view).next().cloned().unwrap();
    let a_id = b_view.difference(&a_view).next().cloned().unwrap();

    let sdp = serde_json::json!({ "type": "offer", "sdp": "v=0\r\n" });
    send(
        &mut a,
        &ClientMessage::Offer {
            to: b_id,
            sdp: sdp.clone(),
        },
    )
    .await;

    match recv(&mut b).await {
        ServerMessage::Offer { from, sdp: got } => {
            assert_eq!(from, a_id, "forwarded offer must carry the sender id");
            assert_eq!(got, sdp);
        }
        other => panic!("expected offer-2, got {:?}", other),
    }

    // Nobody else hears anything, the sender included.
    assert_silent(&mut a, 200).await;
    assert_silent(&mut c, 200).await;
}

#[tokio::test]
async fn test_unknown_recipient_is_silently_dropped() {
    let url = start_relay().await;
    let mut a = connect(&url).await;

    send(
        &mut a,
        &ClientMessage::Offer {
            to: PeerId::new("nobody-here"),
            sdp: serde_json::json!({ "type": "offer", "sdp": "v=0" }),
        },
    )
    .await;

    // No error frame, and the relay keeps serving the sender.
    assert_silent(&mut a, 200).await;
    assert_eq!(list(&mut a).await.len(), 0);
}

#[tokio::test]
async fn test_messages_after_disconnect_are_dropped() {
    let url = start_relay().await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;

    let b_id = list(&mut a).await.into_iter().next().unwrap();

    b.close(None).await.unwrap();
    drop(b);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The registry entry is gone, so the route misses.
    send(
        &mut a,
        &ClientMessage::Ice {
            to: b_id,
            sdp: serde_json::json!({ "candidate": "candidate:0 1 UDP 1 10.0.0.1 9 typ host" }),
        },
    )
    .await;

    // No notification about the vanished peer reaches anyone: discovery
    // of a gone peer is each session's own job.
    assert_silent(&mut a, 200).await;
    assert_eq!(list(&mut a).await.len(), 0);
}

#[tokio::test]
async fn test_per_sender_fifo_order() {
    let url = start_relay().await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;

    let b_id = list(&mut a).await.into_iter().next().unwrap();

    for seq in 0..10 {
        send(
            &mut a,
            &ClientMessage::Ice {
                to: b_id.clone(),
                sdp: serde_json::json!({ "candidate": "candidate:0", "seq": seq }),
            },
        )
        .await;
    }

    for seq in 0..10 {
        match recv(&mut b).await {
            ServerMessage::Ice { sdp, .. } => {
                assert_eq!(sdp.get("seq").and_then(|s| s.as_u64()), Some(seq));
            }
            other => panic!("expected ice-2, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_malformed_frame_does_not_kill_connection() {
    let url = start_relay().await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;

    a.send(Message::Text("not even json".to_string()))
        .await
        .unwrap();
    a.send(Message::Text(r#"{"type":"bogus-9"}"#.to_string()))
        .await
        .unwrap();

    // The offending peer keeps working and other peers are unaffected.
    assert_eq!(list(&mut a).await.len(), 1);
    assert_eq!(list(&mut b).await.len(), 1);
}
