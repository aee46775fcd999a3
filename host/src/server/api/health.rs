use axum::{http::StatusCode, routing::get, Router};
use utoipa::OpenApi;

use crate::AppState;

#[utoipa::path(get, path = "/health",
    tag = "Health",
    responses((status = 200, description = "The server is up"))
)]
/// Liveness probe.
async fn health_handler() -> StatusCode {
    StatusCode::OK
}

#[derive(OpenApi)]
#[openapi(paths(health_handler))]
struct Docs;

pub fn create_docs() -> utoipa::openapi::OpenApi {
    Docs::openapi()
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", get(health_handler))
}
