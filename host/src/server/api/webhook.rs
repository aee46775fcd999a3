use axum::{
    body::Bytes,
    debug_handler,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use storx_backup_satellite::scheme_matches;
use storx_backup_store::NewWebhookEvent;
use tracing::{debug, warn};
use utoipa::OpenApi;

use crate::{
    error::{HostError, HostResult},
    metrics::WEBHOOK_EVENTS,
    server::api::ApiResponse,
    AppState,
};

const ENCRYPTION_HEADER: &str = "X-Encryption";

/// The decrypted change event the satellite pushes.
#[derive(Debug, Deserialize)]
struct ChangeEvent {
    operation: String,
    table: String,
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    old_data: Option<Value>,
}

#[utoipa::path(post, path = "/webhook",
    tag = "Webhook",
    responses(
        (status = 200, description = "Event stored"),
        (status = 400, description = "Bad scheme, envelope or event"),
    )
)]
#[debug_handler(state = AppState)]
/// Ingest one hybrid-encrypted table-change event. The envelope is
/// decrypted and parsed, then stored `received` for the reconciler; this
/// endpoint never processes the event inline.
async fn ingest_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> HostResult<Json<ApiResponse<Value>>> {
    let scheme = headers
        .get(ENCRYPTION_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !scheme_matches(scheme) {
        WEBHOOK_EVENTS.with_label_values(&["bad_scheme"]).inc();
        return Err(HostError::InvalidRequest(
            "unsupported encryption scheme, expected RSA-AES".to_string(),
        ));
    }

    let Some(decryptor) = &state.decryptor else {
        warn!("webhook received but no RSA key is configured");
        return Err(HostError::InvalidRequest(
            "webhook ingestion is not configured".to_string(),
        ));
    };

    let plaintext = decryptor.decrypt(&body).map_err(|e| {
        WEBHOOK_EVENTS.with_label_values(&["undecryptable"]).inc();
        HostError::InvalidRequest(format!("envelope did not decrypt: {e}"))
    })?;
    let event: ChangeEvent = serde_json::from_slice(&plaintext).map_err(|e| {
        WEBHOOK_EVENTS.with_label_values(&["unparseable"]).inc();
        HostError::InvalidRequest(format!("event did not parse: {e}"))
    })?;

    match event.operation.as_str() {
        "INSERT" | "UPDATE" | "DELETE" => {}
        other => {
            WEBHOOK_EVENTS.with_label_values(&["bad_operation"]).inc();
            return Err(HostError::InvalidRequest(format!(
                "unsupported operation {other}"
            )));
        }
    }

    let stored = state
        .store
        .create_webhook_event(NewWebhookEvent {
            operation: event.operation,
            table_name: event.table,
            event_time: event.timestamp.unwrap_or_else(Utc::now),
            data: event.data,
            old_data: event.old_data,
        })
        .await?;
    WEBHOOK_EVENTS.with_label_values(&["received"]).inc();
    debug!(event_id = stored.id, "webhook event stored");

    Ok(Json(ApiResponse::ok(
        "event received",
        serde_json::json!({ "status": "received", "id": stored.id }),
    )))
}

#[derive(OpenApi)]
#[openapi(paths(ingest_handler))]
struct Docs;

pub fn create_docs() -> utoipa::openapi::OpenApi {
    Docs::openapi()
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", post(ingest_handler))
}
