// End-to-end tests for the relay: raw WebSocket clients against an
// in-process relay, speaking the JSON event protocol directly.

mod common;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use rocket_race_relay::config::Config;

use common::{start_relay, start_relay_with, WAIT};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: std::net::SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, frame: Value) {
    socket.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn recv(socket: &mut Socket) -> Value {
    loop {
        let message = timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for relay")
            .expect("relay closed the socket")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Connect and consume the connect-time selection
async fn connect_synced(addr: std::net::SocketAddr) -> (Socket, Value) {
    let mut socket = connect(addr).await;
    let bootstrap = recv(&mut socket).await;
    assert_eq!(bootstrap["event"], "rocket-selection");
    (socket, bootstrap["data"].clone())
}

fn selection(ids: &[&str]) -> Value {
    json!({"event": "rocket-selection", "data": ids})
}

fn rocket_move(id: &str, x: f32, y: f32) -> Value {
    json!({"event": "rocket-move", "data": {"id": id, "x": x, "y": y}})
}

async fn health(addr: std::net::SocketAddr) -> Value {
    reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn new_connection_gets_current_selection_once() {
    let addr = start_relay().await;

    let (mut a, initial) = connect_synced(addr).await;
    assert_eq!(initial, json!([]));
    let (mut observer, _) = connect_synced(addr).await;

    send(&mut a, selection(&["r1", "r2"])).await;
    assert_eq!(recv(&mut observer).await, selection(&["r1", "r2"]));

    // The relay has applied the change; a newcomer bootstraps from it
    let (mut b, initial) = connect_synced(addr).await;
    assert_eq!(initial, json!(["r1", "r2"]));

    // Nothing else was pushed to the newcomer before this move
    send(&mut a, rocket_move("r1", 4.0, 8.0)).await;
    assert_eq!(recv(&mut b).await, rocket_move("r1", 4.0, 8.0));
}

#[tokio::test]
async fn selections_reach_other_clients_in_order() {
    let addr = start_relay().await;
    let (mut a, _) = connect_synced(addr).await;
    let (mut b, _) = connect_synced(addr).await;

    send(&mut a, selection(&["r1"])).await;
    send(&mut a, selection(&["r1", "r2"])).await;

    assert_eq!(recv(&mut b).await, selection(&["r1"]));
    assert_eq!(recv(&mut b).await, selection(&["r1", "r2"]));

    let status = health(addr).await;
    assert_eq!(status["selection"], json!(["r1", "r2"]));
    assert_eq!(status["selection_version"], 2);
    assert_eq!(status["connections"], 2);

    // A never saw its own selections: the first thing it gets is B's move
    send(&mut b, rocket_move("r2", 1.0, 2.0)).await;
    assert_eq!(recv(&mut a).await, rocket_move("r2", 1.0, 2.0));
}

#[tokio::test]
async fn resync_replaces_selection_like_a_change() {
    let addr = start_relay().await;
    let (mut a, _) = connect_synced(addr).await;
    let (mut b, _) = connect_synced(addr).await;

    send(&mut a, selection(&["r1"])).await;
    assert_eq!(recv(&mut b).await, selection(&["r1"]));

    send(&mut b, json!({"event": "sync-rocket-selection", "data": ["r7", "r8"]})).await;
    // rebroadcast under the canonical event name
    assert_eq!(recv(&mut a).await, selection(&["r7", "r8"]));

    assert_eq!(health(addr).await["selection"], json!(["r7", "r8"]));
}

#[tokio::test]
async fn launch_is_attributed_and_not_echoed() {
    let addr = start_relay().await;
    let (mut a, _) = connect_synced(addr).await;
    let (mut b, _) = connect_synced(addr).await;
    let (mut c, _) = connect_synced(addr).await;

    send(&mut a, selection(&["r1", "r2"])).await;
    assert_eq!(recv(&mut b).await, selection(&["r1", "r2"]));
    assert_eq!(recv(&mut c).await, selection(&["r1", "r2"]));

    send(&mut a, json!({"event": "launch-race", "data": ["r1", "r2"]})).await;

    let launched_b = recv(&mut b).await;
    let launched_c = recv(&mut c).await;
    assert_eq!(launched_b["event"], "race-launched");
    assert_eq!(launched_b["data"]["rocketIds"], json!(["r1", "r2"]));
    let initiator = launched_b["data"]["initiatorSocketId"].as_str().unwrap();
    uuid::Uuid::parse_str(initiator).unwrap();
    assert_eq!(launched_c, launched_b);

    // A launch from B carries a different connection id
    send(&mut b, json!({"event": "launch-race", "data": ["r1", "r2"]})).await;
    let from_b = recv(&mut c).await;
    assert_ne!(from_b["data"]["initiatorSocketId"], launched_b["data"]["initiatorSocketId"]);

    // A only sees B's launch, never its own
    let seen_by_a = recv(&mut a).await;
    assert_eq!(seen_by_a, from_b);

    // Launching never touched the stored selection
    let status = health(addr).await;
    assert_eq!(status["selection"], json!(["r1", "r2"]));
    assert_eq!(status["selection_version"], 1);
}

#[tokio::test]
async fn game_events_fan_out_to_everyone_but_the_sender() {
    let addr = start_relay().await;
    let (mut a, _) = connect_synced(addr).await;
    let (mut b, _) = connect_synced(addr).await;
    let (mut c, _) = connect_synced(addr).await;

    send(&mut a, json!({"event": "rocket-collision", "data": {"rocketId": "r1", "asteroidId": "a3"}}))
        .await;
    send(&mut a, json!({"event": "race-invitation", "data": ["r1", "r2"]})).await;

    let collision = json!({"event": "game-collision", "data": {"rocketId": "r1", "asteroidId": "a3"}});
    let invitation = json!({"event": "race-invitation", "data": ["r1", "r2"]});
    for socket in [&mut b, &mut c] {
        assert_eq!(recv(socket).await, collision);
        assert_eq!(recv(socket).await, invitation);
    }

    send(&mut c, rocket_move("r2", 0.0, 0.0)).await;
    assert_eq!(recv(&mut a).await, rocket_move("r2", 0.0, 0.0));
}

#[tokio::test]
async fn malformed_payload_is_rejected_to_sender_only() {
    let addr = start_relay().await;
    let (mut a, _) = connect_synced(addr).await;
    let (mut b, _) = connect_synced(addr).await;

    send(&mut a, selection(&["r1", "r2", "r3"])).await;
    let rejection = recv(&mut a).await;
    assert_eq!(rejection["event"], "error");
    assert_eq!(rejection["data"]["code"], "malformed_payload");

    a.send(Message::Text("not json".into())).await.unwrap();
    assert_eq!(recv(&mut a).await["data"]["code"], "malformed_payload");

    send(&mut a, json!({"event": "race-launched", "data": ["r1", "r2"]})).await;
    assert_eq!(recv(&mut a).await["event"], "error");

    // B saw none of it
    send(&mut a, rocket_move("r1", 5.0, 5.0)).await;
    assert_eq!(recv(&mut b).await, rocket_move("r1", 5.0, 5.0));

    assert_eq!(health(addr).await["selection"], json!([]));
}

#[tokio::test]
async fn disconnect_leaves_selection_in_place() {
    let addr = start_relay().await;
    let (mut a, _) = connect_synced(addr).await;
    let (mut b, _) = connect_synced(addr).await;

    send(&mut a, selection(&["r5"])).await;
    assert_eq!(recv(&mut b).await, selection(&["r5"]));

    a.close(None).await.unwrap();
    drop(a);

    let (_c, initial) = connect_synced(addr).await;
    assert_eq!(initial, json!(["r5"]));
}

#[tokio::test]
async fn selection_gets_through_after_move_flood() {
    let addr = start_relay_with(Config::default()).await;
    let (mut a, _) = connect_synced(addr).await;
    let (mut b, _) = connect_synced(addr).await;

    // twice the default quota of moves, then a selection change
    for step in 0..60 {
        send(&mut a, rocket_move("r1", step as f32, 0.0)).await;
    }
    send(&mut a, selection(&["r1", "r2"])).await;

    // the flood is throttled for the sender
    let rejection = recv(&mut a).await;
    assert_eq!(rejection["event"], "error");
    assert_eq!(rejection["data"]["code"], "rate_limited");

    // but B still converges on the new selection
    let mut moves = 0;
    loop {
        let frame = recv(&mut b).await;
        if frame["event"] == "rocket-selection" {
            assert_eq!(frame, selection(&["r1", "r2"]));
            break;
        }
        assert_eq!(frame["event"], "rocket-move");
        moves += 1;
    }
    assert!(moves < 60, "every move got through: {moves}");

    assert_eq!(health(addr).await["selection"], json!(["r1", "r2"]));
}
