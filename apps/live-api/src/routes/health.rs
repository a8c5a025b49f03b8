use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    /// Prefix of the session ids issued by this process.
    pub discovery_id: String,
    /// Live sessions.
    pub sessions: usize,
    /// Session menu labels, when the menu is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_menu: Option<Vec<String>>,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    ),
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        discovery_id: state.config.discovery_id.clone(),
        sessions: state.sessions.session_count(),
        session_menu: state.menu.as_ref().map(|menu| menu.labels()),
    })
}
