mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use live_api::live::client::ClientInfo;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn send_json(ws: &mut Ws, value: serde_json::Value) {
    ws.send(tungstenite::Message::Text(value.to_string().into()))
        .await
        .expect("ws send");
}

/// Read the next text frame as JSON.
async fn next_json(ws: &mut Ws) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout")
            .expect("stream ended")
            .expect("read error");
        match msg {
            tungstenite::Message::Text(text) => return serde_json::from_str(&text).expect("json"),
            tungstenite::Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

/// Connect to the live gateway as `scene_id` and consume READY.
async fn connect_scene(addr: SocketAddr, session_id: &str, scene_id: &str) -> Ws {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/live"))
        .await
        .expect("ws connect");

    send_json(
        &mut ws,
        json!({ "op": 2, "d": { "session_id": session_id, "scene_id": scene_id } }),
    )
    .await;

    let ready = next_json(&mut ws).await;
    assert_eq!(ready["op"], 0, "READY should be op=0 (DISPATCH)");
    assert_eq!(ready["t"], "READY");
    assert_eq!(ready["s"], 1);
    assert_eq!(ready["d"]["session_id"], session_id);
    assert_eq!(ready["d"]["scene_id"], scene_id);
    assert!(ready["d"]["heartbeat_interval"].as_u64().unwrap() > 0);

    ws
}

/// Poll until `check` holds or a few seconds pass.
async fn eventually(mut check: impl FnMut() -> bool) {
    time::timeout(Duration::from_secs(5), async {
        while !check() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identify_returns_ready_and_heartbeat_is_acked() {
    let (addr, state) = common::start_ws_server().await;
    let session = state.sessions.create(ClientInfo::default());

    let mut ws = connect_scene(addr, session.id(), "scene-a").await;
    eventually(|| session.is_connected("scene-a")).await;
    assert_eq!(session.connection_count(), 1);

    send_json(&mut ws, json!({ "op": 1, "d": { "seq": 7 } })).await;
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["op"], 6);
    assert_eq!(ack["d"]["ack"], 7);
}

#[tokio::test]
async fn unknown_session_is_closed() {
    let (addr, _state) = common::start_ws_server().await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/live"))
        .await
        .expect("ws connect");
    send_json(
        &mut ws,
        json!({ "op": 2, "d": { "session_id": "nope", "scene_id": "s" } }),
    )
    .await;

    let msg = time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout")
        .expect("stream ended")
        .expect("read error");

    match msg {
        tungstenite::Message::Close(Some(frame)) => {
            assert_eq!(
                frame.code,
                tungstenite::protocol::frame::coding::CloseCode::from(4004)
            );
        }
        tungstenite::Message::Close(None) => {
            // Also acceptable.
        }
        other => panic!("Expected Close frame, got: {other:?}"),
    }
}

#[tokio::test]
async fn bound_scene_receives_data_updates() {
    let (addr, state) = common::start_ws_server().await;
    let session = state.sessions.create(ClientInfo::default());

    let mut ws = connect_scene(addr, session.id(), "scene-a").await;
    send_json(&mut ws, json!({ "op": 4, "d": { "bindings": ["id123"] } })).await;
    eventually(|| session.listening_scenes("id123") == vec!["scene-a".to_string()]).await;

    let notified = state.broadcaster.update_data(
        "id123",
        json!({ "_id": "other", "child": { "_id": "id123", "v": 5 } }),
    );
    assert_eq!(notified, 1);

    let update = next_json(&mut ws).await;
    assert_eq!(update["op"], 0);
    assert_eq!(update["t"], "data-update");
    assert_eq!(update["s"], 2);
    assert_eq!(update["d"]["id"], "id123");
    assert_eq!(update["d"]["data"], json!({ "_id": "id123", "v": 5 }));
}

#[tokio::test]
async fn expected_scene_gets_queued_updates_in_order() {
    let (addr, state) = common::start_ws_server().await;
    let session = state.sessions.create(ClientInfo::default());

    session.expect_scene("scene-b");
    session.register_bindings(["r1"], None);
    session.send_data_update("r1", json!({ "v": 1 }), Some("scene-b"));
    session.send_data_update("r1", json!({ "v": 2 }), Some("scene-b"));
    assert_eq!(session.queued_updates("scene-b"), 2);

    let mut ws = connect_scene(addr, session.id(), "scene-b").await;

    for v in 1..=2 {
        let update = next_json(&mut ws).await;
        assert_eq!(update["t"], "data-update");
        assert_eq!(update["d"], json!({ "id": "r1", "data": { "v": v } }));
    }
    assert_eq!(session.queued_updates("scene-b"), 0);
}

#[tokio::test]
async fn closing_the_socket_detaches_the_scene() {
    let (addr, state) = common::start_ws_server().await;
    let session = state.sessions.create(ClientInfo::default());

    let mut ws = connect_scene(addr, session.id(), "scene-a").await;
    send_json(&mut ws, json!({ "op": 4, "d": { "bindings": ["r1"] } })).await;
    eventually(|| !session.listening_scenes("r1").is_empty()).await;

    ws.close(None).await.expect("close");

    eventually(|| session.connection_count() == 0).await;
    assert!(!session.is_connected("scene-a"));
    assert!(session.listening_scenes("r1").is_empty());
    // The session still listens; only the scene went away.
    assert!(state.sessions.index().is_subscribed("r1", session.id()));
}

#[tokio::test]
async fn destroying_the_session_closes_its_scenes() {
    let (addr, state) = common::start_ws_server().await;
    let session = state.sessions.create(ClientInfo::default());

    let mut ws = connect_scene(addr, session.id(), "scene-a").await;
    eventually(|| session.is_connected("scene-a")).await;

    session.destroy();

    let msg = time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout")
        .expect("stream ended")
        .expect("read error");
    match msg {
        tungstenite::Message::Close(Some(frame)) => {
            assert_eq!(
                frame.code,
                tungstenite::protocol::frame::coding::CloseCode::from(4010)
            );
        }
        other => panic!("Expected Close frame, got: {other:?}"),
    }

    eventually(|| session.connection_count() == 0).await;
    assert!(state.sessions.get(session.id()).is_none());
}
