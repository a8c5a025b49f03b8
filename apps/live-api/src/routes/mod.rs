pub mod data;
pub mod health;
pub mod sessions;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::live::server::router())
        .nest("/api/v1", sessions::router().merge(data::router()))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Sessions
        sessions::create_session,
        sessions::get_session,
        sessions::delete_session,
        sessions::expect_scene,
        sessions::register_bindings,
        sessions::send_data_update,
        sessions::postpone_request,
        sessions::resume_request,
        // Data
        data::update_data,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            // Live types
            crate::live::session::SessionStats,
            crate::live::postponed::PendingRequest,
            // Route request/response types
            health::HealthResponse,
            sessions::CreateSessionResponse,
            sessions::ExpectSceneRequest,
            sessions::ExpectSceneResponse,
            sessions::RegisterBindingsRequest,
            sessions::SendDataRequest,
            sessions::PostponeRequest,
            sessions::PostponeResponse,
            data::UpdateDataRequest,
            data::UpdateDataResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Sessions", description = "Client sessions and their scenes"),
        (name = "Data", description = "Record change notifications"),
    )
)]
pub struct ApiDoc;
