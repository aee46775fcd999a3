use axum::{
    body::HttpBody,
    extract::Request,
    http::{header, HeaderName, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::Response,
    Router,
};
use serde::Serialize;
use storx_backup_lib::consts::MAX_WEBHOOK_BODY;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{self, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::AppState;

pub mod health;
pub mod job;
pub mod metrics;
pub mod scheduled;
pub mod task;
pub mod webhook;

/// The uniform response envelope every endpoint returns.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_ids: Option<Vec<String>>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
            error: None,
            failed_ids: None,
            processed_ids: None,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "StorX Backup Orchestration API",
        version = "1.0",
        description = "Multi-tenant backup orchestration between SaaS sources and the StorX satellite",
    ),
    components(
        schemas(
            crate::error::HostError,
            storx_backup_store::JobStatus,
            storx_backup_store::TaskStatus,
            storx_backup_store::MessageStatus,
            storx_backup_store::ScheduledTaskStatus,
        )
    ),
    tags(
        (name = "AutoSync", description = "Recurring backup jobs and their tasks"),
        (name = "ScheduledTask", description = "One-shot cohort backups"),
        (name = "Webhook", description = "Satellite change-event ingest"),
        (name = "Health", description = "Routes that report the server health status"),
        (name = "Metrics", description = "Routes that give detailed insight into the server")
    )
)]
/// The root API struct which is generated from the `OpenApi` derive macro.
pub struct Docs;

#[must_use]
pub fn create_docs() -> utoipa::openapi::OpenApi {
    [
        health::create_docs(),
        metrics::create_docs(),
        job::create_docs(),
        task::create_docs(),
        scheduled::create_docs(),
        webhook::create_docs(),
    ]
    .into_iter()
    .fold(Docs::openapi(), |mut doc, sub_doc| {
        doc.merge(sub_doc);
        doc
    })
}

pub fn create_router() -> Router<AppState> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::ORIGIN,
            header::ACCEPT,
            header::CONTENT_TYPE,
            HeaderName::from_static("access_token"),
            HeaderName::from_static("x-encryption"),
        ])
        .allow_origin(cors::Any);
    let compression = CompressionLayer::new();

    let middleware = ServiceBuilder::new().layer(cors).layer(compression);
    let trace = TraceLayer::new_for_http();
    let docs = create_docs();

    Router::new()
        .nest("/auto-sync/job", job::create_router())
        .nest("/auto-sync/task", task::create_router())
        .route("/auto-sync/live", axum::routing::get(job::live_handler))
        .nest("/scheduled-task", scheduled::create_router())
        .nest("/webhook", webhook::create_router())
        .nest("/health", health::create_router())
        .nest("/metrics", metrics::create_router())
        .layer(middleware)
        .layer(middleware::from_fn(check_max_body_size))
        .layer(trace)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", docs))
        .fallback(|uri: Uri| async move {
            (StatusCode::NOT_FOUND, format!("No handler found for {uri}"))
        })
}

async fn check_max_body_size(req: Request, next: Next) -> Response {
    let request_content_length = match req.body().size_hint().upper() {
        Some(v) => v,
        None => MAX_WEBHOOK_BODY as u64 + 1,
    };

    if request_content_length > MAX_WEBHOOK_BODY as u64 {
        let mut resp = Response::new(axum::body::Body::from("request too large"));
        *resp.status_mut() = StatusCode::BAD_REQUEST;
        return resp;
    }

    next.run(req).await
}
