#![allow(dead_code)]

use std::net::SocketAddr;

use axum::Router;

use live_api::config::Config;
use live_api::AppState;

/// Build a test AppState with default settings and a fixed discovery id.
pub fn test_state() -> AppState {
    test_state_with(Config {
        discovery_id: "node_test".to_string(),
        ..Config::default()
    })
}

pub fn test_state_with(config: Config) -> AppState {
    AppState::new(config)
}

/// Build the full application router wired to the test state.
pub fn test_app() -> (Router, AppState) {
    let state = test_state();
    let app = live_api::routes::router().with_state(state.clone());
    (app, state)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background.
pub async fn start_ws_server() -> (SocketAddr, AppState) {
    let state = test_state();
    let app = live_api::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}
