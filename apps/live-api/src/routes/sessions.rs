//! Session endpoints: first contact, scenes, bindings and postponed requests.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use scenecast_common::id::{prefix, prefixed_ulid};

use crate::error::{ApiError, ApiErrorBody};
use crate::live::client::ClientInfo;
use crate::live::postponed::PendingRequest;
use crate::live::session::{Bindings, SessionStats};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route(
            "/sessions/{session_id}",
            get(get_session).delete(delete_session),
        )
        .route("/sessions/{session_id}/scenes", post(expect_scene))
        .route("/sessions/{session_id}/bindings", post(register_bindings))
        .route(
            "/sessions/{session_id}/data/{data_id}",
            post(send_data_update),
        )
        .route("/sessions/{session_id}/postponed", post(postpone_request))
        .route(
            "/sessions/{session_id}/postponed/{token}",
            get(resume_request),
        )
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateSessionResponse {
    pub id: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ExpectSceneRequest {
    /// Scene id to expect. Generated when omitted.
    #[serde(default)]
    pub scene_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExpectSceneResponse {
    pub scene_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterBindingsRequest {
    /// A list of data ids, or an object keyed by data id.
    #[serde(default)]
    pub bindings: Value,
    #[serde(default)]
    pub scene_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendDataRequest {
    pub data: Value,
    /// Target scene. Every listening scene when omitted.
    #[serde(default)]
    pub scene_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PostponeRequest {
    pub path: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PostponeResponse {
    pub token: String,
}

// ---------------------------------------------------------------------------
// POST /api/v1/sessions
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/sessions",
    tag = "Sessions",
    responses(
        (status = 201, description = "Session created", body = CreateSessionResponse),
    ),
)]
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<CreateSessionResponse>) {
    let session = state.sessions.create(ClientInfo::from_headers(&headers));
    session.record_request();

    (
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            id: session.id().to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /api/v1/sessions/:session_id
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/sessions/{session_id}",
    tag = "Sessions",
    params(
        ("session_id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 200, description = "Session counters", body = SessionStats),
        (status = 404, description = "Session not found", body = ApiErrorBody),
    ),
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStats>, ApiError> {
    let session = state.sessions.require(&session_id)?;
    Ok(Json(session.stats()))
}

// ---------------------------------------------------------------------------
// DELETE /api/v1/sessions/:session_id
// ---------------------------------------------------------------------------

#[utoipa::path(
    delete,
    path = "/api/v1/sessions/{session_id}",
    tag = "Sessions",
    params(
        ("session_id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 204, description = "Session destroyed"),
        (status = 404, description = "Session not found", body = ApiErrorBody),
    ),
)]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = state.sessions.require(&session_id)?;
    session.destroy();
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// POST /api/v1/sessions/:session_id/scenes
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{session_id}/scenes",
    tag = "Sessions",
    params(
        ("session_id" = String, Path, description = "Session ID"),
    ),
    request_body = ExpectSceneRequest,
    responses(
        (status = 201, description = "Scene expected", body = ExpectSceneResponse),
        (status = 404, description = "Session not found", body = ApiErrorBody),
    ),
)]
pub async fn expect_scene(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Option<Json<ExpectSceneRequest>>,
) -> Result<(StatusCode, Json<ExpectSceneResponse>), ApiError> {
    let session = state.sessions.require(&session_id)?;
    session.record_request();

    let Json(body) = body.unwrap_or_default();
    let scene_id = match body.scene_id {
        Some(id) if id.trim().is_empty() => {
            return Err(ApiError::bad_request("scene_id must not be empty"));
        }
        Some(id) => id,
        None => prefixed_ulid(prefix::SCENE),
    };

    session.expect_scene(&scene_id);

    Ok((StatusCode::CREATED, Json(ExpectSceneResponse { scene_id })))
}

// ---------------------------------------------------------------------------
// POST /api/v1/sessions/:session_id/bindings
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{session_id}/bindings",
    tag = "Sessions",
    params(
        ("session_id" = String, Path, description = "Session ID"),
    ),
    request_body = RegisterBindingsRequest,
    responses(
        (status = 204, description = "Bindings registered"),
        (status = 404, description = "Session not found", body = ApiErrorBody),
    ),
)]
pub async fn register_bindings(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<RegisterBindingsRequest>,
) -> Result<StatusCode, ApiError> {
    let session = state.sessions.require(&session_id)?;
    session.record_request();

    session.register_bindings(Bindings::from(body.bindings), body.scene_id.as_deref());

    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// POST /api/v1/sessions/:session_id/data/:data_id
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{session_id}/data/{data_id}",
    tag = "Sessions",
    params(
        ("session_id" = String, Path, description = "Session ID"),
        ("data_id" = String, Path, description = "Bound record ID"),
    ),
    request_body = SendDataRequest,
    responses(
        (status = 204, description = "Update sent or queued"),
        (status = 404, description = "Session not found", body = ApiErrorBody),
    ),
)]
pub async fn send_data_update(
    State(state): State<AppState>,
    Path((session_id, data_id)): Path<(String, String)>,
    Json(body): Json<SendDataRequest>,
) -> Result<StatusCode, ApiError> {
    let session = state.sessions.require(&session_id)?;
    session.record_action();

    session.send_data_update(&data_id, body.data, body.scene_id.as_deref());

    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// POST /api/v1/sessions/:session_id/postponed
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{session_id}/postponed",
    tag = "Sessions",
    params(
        ("session_id" = String, Path, description = "Session ID"),
    ),
    request_body = PostponeRequest,
    responses(
        (status = 201, description = "Request postponed", body = PostponeResponse),
        (status = 404, description = "Session not found", body = ApiErrorBody),
    ),
)]
pub async fn postpone_request(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<PostponeRequest>,
) -> Result<(StatusCode, Json<PostponeResponse>), ApiError> {
    let session = state.sessions.require(&session_id)?;
    session.record_request();

    let token = session.postpone(PendingRequest::new(body.path, body.payload));

    Ok((StatusCode::CREATED, Json(PostponeResponse { token })))
}

// ---------------------------------------------------------------------------
// GET /api/v1/sessions/:session_id/postponed/:token
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/sessions/{session_id}/postponed/{token}",
    tag = "Sessions",
    params(
        ("session_id" = String, Path, description = "Session ID"),
        ("token" = String, Path, description = "Postponed request token"),
    ),
    responses(
        (status = 200, description = "Resumed request", body = PendingRequest),
        (status = 404, description = "Session or postponed request not found", body = ApiErrorBody),
    ),
)]
pub async fn resume_request(
    State(state): State<AppState>,
    Path((session_id, token)): Path<(String, String)>,
) -> Result<Json<PendingRequest>, ApiError> {
    let session = state.sessions.require(&session_id)?;
    session.record_request();

    Ok(Json(session.resume(&token)?))
}
