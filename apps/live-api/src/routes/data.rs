//! Record change notifications.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::{ApiError, ApiErrorBody};
use crate::live::broadcast::DataPayload;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/data/{data_id}", post(update_data))
}

/// Either a plain record or a document of records (first one is sent).
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateDataRequest {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub document: Option<Vec<Value>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpdateDataResponse {
    /// Sessions the update was dispatched to.
    pub sessions: usize,
}

#[utoipa::path(
    post,
    path = "/api/v1/data/{data_id}",
    tag = "Data",
    params(
        ("data_id" = String, Path, description = "Changed record ID"),
    ),
    request_body = UpdateDataRequest,
    responses(
        (status = 200, description = "Update dispatched", body = UpdateDataResponse),
        (status = 400, description = "Neither data nor document given", body = ApiErrorBody),
    ),
)]
pub async fn update_data(
    State(state): State<AppState>,
    Path(data_id): Path<String>,
    Json(body): Json<UpdateDataRequest>,
) -> Result<Json<UpdateDataResponse>, ApiError> {
    let payload = match (body.data, body.document) {
        (Some(data), None) => DataPayload::Record(data),
        (None, Some(records)) => DataPayload::Document(records),
        _ => return Err(ApiError::bad_request("Provide exactly one of data or document")),
    };

    let sessions = state.broadcaster.update_data(&data_id, payload);

    Ok(Json(UpdateDataResponse { sessions }))
}
