//! End-to-end tests for the signaling hub, driven over real WebSocket
//! connections with raw protocol frames.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use peerlink::protocol::{AuthResult, Envelope, MessageType, RelayPayload};
use peerlink::{Hub, HubConfig};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn setup_hub(relay_password: Option<&str>) -> (Hub, String) {
    let hub = Hub::new(HubConfig {
        bind_address: "127.0.0.1:0".to_string(),
        relay_password: relay_password.map(str::to_string),
    });
    let addr = hub.start().await.expect("hub start");
    (hub, format!("ws://{}", addr))
}

async fn send(ws: &mut WsStream, envelope: Envelope) {
    ws.send(Message::Text(envelope.encode())).await.unwrap();
}

async fn recv(ws: &mut WsStream) -> Envelope {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed")
        .expect("socket error");
    match msg {
        Message::Text(text) => Envelope::decode(&text).unwrap(),
        other => panic!("unexpected message: {other:?}"),
    }
}

/// Connect and register, returning the socket and the assigned identity.
async fn join(url: &str, requested: &str) -> (WsStream, String) {
    let (mut ws, _) = connect_async(url).await.expect("failed to connect");
    send(&mut ws, Envelope::with_payload(MessageType::Register, requested)).await;
    let echo = recv(&mut ws).await;
    assert_eq!(echo.kind, MessageType::Register);
    let identity = echo.payload.clone();
    (ws, identity)
}

async fn authenticate(ws: &mut WsStream, password: &str) -> AuthResult {
    send(ws, Envelope::with_payload(MessageType::RelayAuth, password)).await;
    let reply = recv(ws).await;
    assert_eq!(reply.kind, MessageType::RelayAuthResult);
    AuthResult::from_json(&reply.payload).unwrap()
}

#[tokio::test]
async fn register_and_list() {
    let (_hub, url) = setup_hub(None).await;

    let (mut a, a_id) = join(&url, "").await;
    assert_eq!(a_id, "peer_1");

    let (_b, b_id) = join(&url, "bob").await;
    assert_eq!(b_id, "bob");

    send(&mut a, Envelope::new(MessageType::PeerList)).await;
    let reply = recv(&mut a).await;
    assert_eq!(reply.kind, MessageType::PeerList);
    assert_eq!(reply.payload, r#"["bob"]"#);
}

#[tokio::test]
async fn duplicate_request_gets_fresh_identity() {
    let (hub, url) = setup_hub(None).await;

    let (_a, a_id) = join(&url, "").await;
    assert_eq!(a_id, "peer_1");

    let (_c, c_id) = join(&url, "peer_1").await;
    assert_eq!(c_id, "peer_2");

    let peers = hub.peers();
    assert_eq!(peers.len(), 2);
    assert!(peers.iter().any(|(id, _)| id == "peer_1"));
    assert!(peers.iter().any(|(id, _)| id == "peer_2"));
}

#[tokio::test]
async fn second_register_is_ignored() {
    let (hub, url) = setup_hub(None).await;

    let (mut a, a_id) = join(&url, "alice").await;
    send(&mut a, Envelope::with_payload(MessageType::Register, "other")).await;

    // The rebind attempt produced no reply; the next reply is the list.
    send(&mut a, Envelope::new(MessageType::PeerList)).await;
    let reply = recv(&mut a).await;
    assert_eq!(reply.kind, MessageType::PeerList);

    assert_eq!(hub.peers(), vec![(a_id, false)]);
}

#[tokio::test]
async fn broker_round_trip() {
    let (_hub, url) = setup_hub(None).await;

    let (mut a, a_id) = join(&url, "").await;
    let (mut b, b_id) = join(&url, "bob").await;

    let offer_payload = r#"{"type":"offer","sdp":"v=0..."}"#;
    // A supplied `from` is overwritten by the hub.
    let mut offer = Envelope::request(MessageType::Offer, &b_id, offer_payload);
    offer.from = "mallory".to_string();
    send(&mut a, offer).await;

    let delivered = recv(&mut b).await;
    assert_eq!(delivered.kind, MessageType::Offer);
    assert_eq!(delivered.from, a_id);
    assert_eq!(delivered.payload, offer_payload);

    let answer_payload = r#"{"type":"answer","sdp":"v=0..."}"#;
    send(&mut b, Envelope::request(MessageType::Answer, &a_id, answer_payload)).await;

    let delivered = recv(&mut a).await;
    assert_eq!(delivered.kind, MessageType::Answer);
    assert_eq!(delivered.from, b_id);
    assert_eq!(delivered.payload, answer_payload);
}

#[tokio::test]
async fn broker_reports_unknown_target() {
    let (_hub, url) = setup_hub(None).await;
    let (mut a, _) = join(&url, "").await;

    send(&mut a, Envelope::request(MessageType::Candidate, "ghost", "{}")).await;
    let reply = recv(&mut a).await;
    assert_eq!(reply.kind, MessageType::Error);
    assert_eq!(reply.payload, "Peer not found: ghost");
}

#[tokio::test]
async fn connect_request_is_forwarded() {
    let (_hub, url) = setup_hub(None).await;
    let (mut a, a_id) = join(&url, "").await;
    let (mut b, b_id) = join(&url, "bob").await;

    send(&mut a, Envelope::request(MessageType::Connect, &b_id, "")).await;
    let delivered = recv(&mut b).await;
    assert_eq!(delivered.kind, MessageType::Connect);
    assert_eq!(delivered.from, a_id);
    assert_eq!(delivered.payload, "connect_request");
}

#[tokio::test]
async fn unauthorized_relay_is_rejected() {
    let (hub, url) = setup_hub(Some("s3cret")).await;
    let (mut a, _) = join(&url, "").await;
    let (mut b, b_id) = join(&url, "bob").await;

    send(&mut a, Envelope::request(MessageType::RelayConnect, &b_id, "")).await;
    let reply = recv(&mut a).await;
    assert_eq!(reply.kind, MessageType::Error);
    assert_eq!(reply.payload, "Not authenticated for relay");
    assert!(hub.relay_pairs().is_empty());

    // B saw nothing: its next frame is its own peer-list reply.
    send(&mut b, Envelope::new(MessageType::PeerList)).await;
    let reply = recv(&mut b).await;
    assert_eq!(reply.kind, MessageType::PeerList);
}

#[tokio::test]
async fn wrong_password_is_refused() {
    let (_hub, url) = setup_hub(Some("s3cret")).await;
    let (mut a, _) = join(&url, "").await;

    let result = authenticate(&mut a, "nope").await;
    assert!(!result.success);
    assert_eq!(result.message, "Invalid relay password");

    // The flag stayed down.
    send(&mut a, Envelope::request(MessageType::RelayConnect, "bob", "")).await;
    let reply = recv(&mut a).await;
    assert_eq!(reply.payload, "Not authenticated for relay");
}

#[tokio::test]
async fn relay_disabled_without_secret() {
    let (_hub, url) = setup_hub(None).await;
    let (mut a, _) = join(&url, "").await;

    let result = authenticate(&mut a, "anything").await;
    assert!(!result.success);
    assert_eq!(result.message, "Relay is not configured on this server");
}

#[tokio::test]
async fn relay_happy_path() {
    let (hub, url) = setup_hub(Some("s3cret")).await;
    let (mut a, a_id) = join(&url, "").await;
    let (mut b, b_id) = join(&url, "bob").await;

    let result = authenticate(&mut a, "s3cret").await;
    assert!(result.success);
    assert_eq!(result.message, "Authentication successful");

    send(&mut a, Envelope::request(MessageType::RelayConnect, &b_id, "")).await;
    let notice = recv(&mut b).await;
    assert_eq!(notice.kind, MessageType::RelayConnect);
    assert_eq!(notice.from, a_id);
    assert_eq!(hub.relay_pairs(), vec![("bob".to_string(), "peer_1".to_string())]);

    let payload = RelayPayload::text("hi").to_json();
    send(&mut a, Envelope::request(MessageType::RelayData, &b_id, payload.clone())).await;
    let delivered = recv(&mut b).await;
    assert_eq!(delivered.kind, MessageType::RelayData);
    assert_eq!(delivered.from, a_id);
    assert_eq!(delivered.payload, payload);

    // A drops; B gets exactly one relay_disconnect and the pair is gone.
    drop(a);
    let notice = recv(&mut b).await;
    assert_eq!(notice.kind, MessageType::RelayDisconnect);
    assert_eq!(notice.from, a_id);
    assert!(hub.relay_pairs().is_empty());

    send(&mut b, Envelope::new(MessageType::PeerList)).await;
    let reply = recv(&mut b).await;
    assert_eq!(reply.kind, MessageType::PeerList);
    assert_eq!(reply.payload, "[]");
}

#[tokio::test]
async fn relay_data_requires_a_pair() {
    let (_hub, url) = setup_hub(Some("s3cret")).await;
    let (mut a, _) = join(&url, "").await;
    let (_b, b_id) = join(&url, "bob").await;

    assert!(authenticate(&mut a, "s3cret").await.success);

    let payload = RelayPayload::text("hi").to_json();
    send(&mut a, Envelope::request(MessageType::RelayData, &b_id, payload)).await;
    let reply = recv(&mut a).await;
    assert_eq!(reply.kind, MessageType::Error);
    assert_eq!(reply.payload, "No relay connection with bob");
}

#[tokio::test]
async fn responder_may_send_without_authenticating() {
    let (_hub, url) = setup_hub(Some("s3cret")).await;
    let (mut a, a_id) = join(&url, "").await;
    let (mut b, b_id) = join(&url, "bob").await;

    assert!(authenticate(&mut a, "s3cret").await.success);
    send(&mut a, Envelope::request(MessageType::RelayConnect, &b_id, "")).await;
    let _ = recv(&mut b).await;

    // B never authenticated, but the pair admits it.
    let payload = RelayPayload::text("pong").to_json();
    send(&mut b, Envelope::request(MessageType::RelayData, &a_id, payload.clone())).await;
    let delivered = recv(&mut a).await;
    assert_eq!(delivered.kind, MessageType::RelayData);
    assert_eq!(delivered.from, b_id);
    assert_eq!(delivered.payload, payload);
}

#[tokio::test]
async fn relay_disconnect_from_either_endpoint() {
    let (hub, url) = setup_hub(Some("s3cret")).await;
    let (mut a, a_id) = join(&url, "").await;
    let (mut b, b_id) = join(&url, "bob").await;

    assert!(authenticate(&mut a, "s3cret").await.success);
    send(&mut a, Envelope::request(MessageType::RelayConnect, &b_id, "")).await;
    let _ = recv(&mut b).await;

    // Double insert has no further effect.
    send(&mut a, Envelope::request(MessageType::RelayConnect, &b_id, "")).await;
    let _ = recv(&mut b).await;
    assert_eq!(hub.relay_pairs().len(), 1);

    // The responder tears the pair down.
    send(&mut b, Envelope::request(MessageType::RelayDisconnect, &a_id, "")).await;
    let notice = recv(&mut a).await;
    assert_eq!(notice.kind, MessageType::RelayDisconnect);
    assert_eq!(notice.from, b_id);
    assert!(hub.relay_pairs().is_empty());

    send(&mut a, Envelope::request(MessageType::RelayData, &b_id, RelayPayload::text("hi").to_json())).await;
    let reply = recv(&mut a).await;
    assert_eq!(reply.payload, "No relay connection with bob");
}

#[tokio::test]
async fn binary_relay_round_trip() {
    let (_hub, url) = setup_hub(Some("s3cret")).await;
    let (mut a, _) = join(&url, "").await;
    let (mut b, b_id) = join(&url, "bob").await;

    assert!(authenticate(&mut a, "s3cret").await.success);
    send(&mut a, Envelope::request(MessageType::RelayConnect, &b_id, "")).await;
    let _ = recv(&mut b).await;

    let record = RelayPayload {
        is_binary: true,
        data: "SGVsbG8=".to_string(),
    };
    send(&mut a, Envelope::request(MessageType::RelayData, &b_id, record.to_json())).await;

    let delivered = recv(&mut b).await;
    let decoded = RelayPayload::from_json(&delivered.payload).unwrap();
    assert!(decoded.is_binary);
    assert_eq!(decoded.decode_binary().unwrap(), b"Hello");
}

#[tokio::test]
async fn malformed_and_unknown_frames_are_tolerated() {
    let (_hub, url) = setup_hub(None).await;
    let (mut a, _) = join(&url, "").await;

    a.send(Message::Text("not json".to_string())).await.unwrap();
    a.send(Message::Text(r#"{"type":"teleport","to":"x"}"#.to_string()))
        .await
        .unwrap();

    // The connection survived both frames.
    send(&mut a, Envelope::new(MessageType::PeerList)).await;
    let reply = recv(&mut a).await;
    assert_eq!(reply.kind, MessageType::PeerList);
    assert_eq!(reply.payload, "[]");
}

#[tokio::test]
async fn eviction_cleans_every_pair() {
    let (hub, url) = setup_hub(Some("s3cret")).await;
    let (mut a, a_id) = join(&url, "").await;
    let (mut b, _) = join(&url, "bob").await;
    let (mut c, _) = join(&url, "carol").await;

    assert!(authenticate(&mut a, "s3cret").await.success);
    send(&mut a, Envelope::request(MessageType::RelayConnect, "bob", "")).await;
    let _ = recv(&mut b).await;
    send(&mut a, Envelope::request(MessageType::RelayConnect, "carol", "")).await;
    let _ = recv(&mut c).await;
    assert_eq!(hub.relay_pairs().len(), 2);

    drop(a);

    for survivor in [&mut b, &mut c] {
        let notice = recv(survivor).await;
        assert_eq!(notice.kind, MessageType::RelayDisconnect);
        assert_eq!(notice.from, a_id);
    }
    assert!(hub.relay_pairs().is_empty());
    assert_eq!(hub.peers().len(), 2);
}
