//! WebSocket upgrade handler and per-scene event loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time;

use crate::AppState;

use super::client::ClientInfo;
use super::connection::{Connection, DataUpdate};
use super::events::{
    BindPayload, ClientMessage, EventName, GatewayMessage, HeartbeatPayload, IdentifyPayload,
    OP_BIND, OP_HEARTBEAT, OP_IDENTIFY,
};
use super::session::{Bindings, SceneHandle, Session};

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
const CLOSE_NOT_IDENTIFIED: u16 = 4003;
const CLOSE_IDENTIFY_FAILED: u16 = 4004;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;
const CLOSE_SCENE_RELEASED: u16 = 4010;

/// Timeout for receiving IDENTIFY after connection (seconds).
const IDENTIFY_TIMEOUT_SECS: u64 = 10;

/// Heartbeat interval sent to scenes in the READY payload (ms).
pub const HEARTBEAT_INTERVAL_MS: u64 = 41250;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

pub fn router() -> Router<AppState> {
    Router::new().route("/live", get(ws_upgrade))
}

/// A scene attached over WebSocket.
///
/// Pushes go onto an unbounded channel drained by the scene's event loop, so
/// `send` never blocks the session that calls it.
pub struct WsConnection {
    scene_id: String,
    client: ClientInfo,
    seq: AtomicU64,
    tx: mpsc::UnboundedSender<GatewayMessage>,
}

impl WsConnection {
    fn new(scene_id: String, client: ClientInfo, tx: mpsc::UnboundedSender<GatewayMessage>) -> Self {
        Self {
            scene_id,
            client,
            seq: AtomicU64::new(0),
            tx,
        }
    }

    fn dispatch(&self, event_name: &str, data: Value) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        // A closed channel means the event loop has ended; the scene is
        // being detached.
        let _ = self.tx.send(GatewayMessage::dispatch(event_name, seq, data));
    }
}

impl Connection for WsConnection {
    fn scene_id(&self) -> &str {
        &self.scene_id
    }

    fn client(&self) -> &ClientInfo {
        &self.client
    }

    fn send(&self, topic: &str, payload: &DataUpdate) {
        self.dispatch(
            topic,
            serde_json::json!({ "id": payload.id, "data": payload.data }),
        );
    }
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let client = ClientInfo::from_headers(&headers);
    ws.on_upgrade(move |socket| handle_connection(socket, state, client))
}

async fn handle_connection(socket: WebSocket, state: AppState, client: ClientInfo) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Step 1: Wait for IDENTIFY within timeout.
    let identify_result = time::timeout(Duration::from_secs(IDENTIFY_TIMEOUT_SECS), async {
        while let Some(msg) = ws_rx.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!(?e, "ws read error during identify");
                    return Err("read error");
                }
            };

            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => return Err("client closed"),
                _ => continue,
            };

            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(_) => {
                    let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                    return Err("invalid json");
                }
            };

            if client_msg.op != OP_IDENTIFY {
                let _ = send_close(&mut ws_tx, CLOSE_NOT_IDENTIFIED, "Expected IDENTIFY").await;
                return Err("expected identify");
            }

            return serde_json::from_value::<IdentifyPayload>(client_msg.d)
                .map_err(|_| "invalid identify payload");
        }
        Err("connection closed before identify")
    })
    .await;

    let payload = match identify_result {
        Ok(Ok(payload)) => payload,
        Ok(Err(reason)) => {
            tracing::debug!(%reason, "initial handshake failed");
            let _ = send_close(&mut ws_tx, CLOSE_IDENTIFY_FAILED, reason).await;
            return;
        }
        Err(_timeout) => {
            let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Handshake timeout").await;
            return;
        }
    };

    // Step 2: Attach the scene to its session.
    let Some(session) = state.sessions.get(&payload.session_id) else {
        tracing::debug!(session_id = %payload.session_id, "identify for unknown session");
        let _ = send_close(&mut ws_tx, CLOSE_IDENTIFY_FAILED, "Unknown session").await;
        return;
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let connection = Arc::new(WsConnection::new(payload.scene_id.clone(), client, tx));

    // READY goes first on the channel so it precedes any replayed updates.
    connection.dispatch(
        EventName::READY,
        serde_json::json!({
            "session_id": session.id(),
            "scene_id": payload.scene_id,
            "heartbeat_interval": HEARTBEAT_INTERVAL_MS,
        }),
    );

    let scene = session.register_connection(connection);

    run_scene(&session, &scene, ws_tx, ws_rx, rx).await;

    scene.disconnect();

    tracing::info!(
        session_id = %session.id(),
        scene_id = %scene.scene_id(),
        "scene connection ended"
    );
}

/// Main scene event loop: read client messages, forward pushes, enforce heartbeat.
async fn run_scene(
    session: &Arc<Session>,
    scene: &SceneHandle,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    mut pushes: mpsc::UnboundedReceiver<GatewayMessage>,
) {
    // Heartbeat deadline: client must heartbeat within 1.5× the interval.
    let heartbeat_deadline = Duration::from_millis(HEARTBEAT_INTERVAL_MS * 3 / 2);
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            // Client sends us a message.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                                break;
                            }
                        };

                        match client_msg.op {
                            OP_HEARTBEAT => {
                                got_heartbeat = true;
                                let payload: HeartbeatPayload =
                                    serde_json::from_value(client_msg.d).unwrap_or(HeartbeatPayload { seq: 0 });
                                if send_message(&mut ws_tx, &GatewayMessage::heartbeat_ack(payload.seq)).await.is_err() {
                                    break;
                                }
                            }
                            OP_BIND => {
                                let payload: BindPayload = serde_json::from_value(client_msg.d)
                                    .unwrap_or(BindPayload { bindings: Value::Null });
                                session.register_bindings(Bindings::from(payload.bindings), Some(scene.scene_id()));
                            }
                            OP_IDENTIFY => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Already identified").await;
                                break;
                            }
                            _ => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, session_id = %session.id(), "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // Push from the session.
            push = pushes.recv() => {
                match push {
                    Some(msg) => {
                        if send_message(&mut ws_tx, &msg).await.is_err() {
                            break;
                        }
                    }
                    // The session was removed, or replaced this scene with a
                    // newer connection.
                    None => {
                        let _ = send_close(&mut ws_tx, CLOSE_SCENE_RELEASED, "Scene released").await;
                        break;
                    }
                }
            }

            // Heartbeat timeout check.
            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(
                        session_id = %session.id(),
                        scene_id = %scene.scene_id(),
                        "heartbeat timeout, closing connection"
                    );
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }
        }
    }
}

async fn send_message(ws_tx: &mut WsSink, msg: &GatewayMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
