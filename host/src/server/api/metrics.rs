use axum::{routing::get, Router};
use utoipa::OpenApi;

use crate::AppState;

#[utoipa::path(get, path = "/metrics",
    tag = "Metrics",
    responses((status = 200, description = "Prometheus text exposition"))
)]
/// Prometheus scrape endpoint.
async fn metrics_handler() -> String {
    crate::metrics::gather()
}

#[derive(OpenApi)]
#[openapi(paths(metrics_handler))]
struct Docs;

pub fn create_docs() -> utoipa::openapi::OpenApi {
    Docs::openapi()
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", get(metrics_handler))
}
