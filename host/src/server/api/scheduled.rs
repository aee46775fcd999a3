use std::str::FromStr;

use axum::{
    debug_handler,
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use storx_backup_lib::Method;
use storx_backup_store::ScheduledTask;
use tracing::info;
use utoipa::OpenApi;

use crate::{
    error::{HostError, HostResult},
    server::{api::ApiResponse, auth::AccessToken},
    AppState,
};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CreateScheduledTaskBody {
    /// Destination path prefix for the cohort.
    login_id: String,
    /// Explicit item ids to back up now; photo album ids expand to their
    /// children during the run.
    ids: Vec<String>,
    /// Provider credentials.
    input_data: Value,
}

#[utoipa::path(post, path = "/scheduled-task/{method}",
    tag = "ScheduledTask",
    params(("method" = String, Path, description = "Backup method")),
    responses(
        (status = 200, description = "Cohort accepted", body = ScheduledTask),
        (status = 400, description = "No ids supplied or bad method"),
    )
)]
#[debug_handler(state = AppState)]
/// Accept an explicit cohort of item ids for a one-shot backup. The
/// worker picks it up from the `created` state.
async fn create_scheduled_task_handler(
    State(state): State<AppState>,
    Path(method): Path<String>,
    token: AccessToken,
    Json(body): Json<CreateScheduledTaskBody>,
) -> HostResult<Json<ApiResponse<ScheduledTask>>> {
    let method = Method::from_str(&method).map_err(HostError::InvalidMethod)?;
    if body.ids.is_empty() {
        return Err(HostError::InvalidRequest("no item ids supplied".to_string()));
    }
    let login_id = if body.login_id.is_empty() {
        token.user_id.clone()
    } else {
        body.login_id
    };
    let task = state
        .store
        .create_scheduled_task(
            &token.user_id,
            &login_id,
            method,
            &token.grant,
            body.input_data,
            body.ids,
        )
        .await?;
    info!(task_id = task.id, %method, "scheduled task accepted");
    Ok(Json(ApiResponse::ok("scheduled task created", task)))
}

#[utoipa::path(get, path = "/scheduled-task/{id}",
    tag = "ScheduledTask",
    params(("id" = i64, Path, description = "Scheduled task id")),
    responses(
        (status = 200, description = "Cohort progress", body = ScheduledTask),
        (status = 404, description = "No such scheduled task"),
    )
)]
#[debug_handler(state = AppState)]
/// Progress and terminal state of one cohort.
async fn get_scheduled_task_handler(
    State(state): State<AppState>,
    token: AccessToken,
    Path(id): Path<i64>,
) -> HostResult<Json<ApiResponse<ScheduledTask>>> {
    let task = state.store.scheduled_task_by_id(id).await?;
    if task.user_id != token.user_id {
        return Err(HostError::NotFound(format!("scheduled task {id}")));
    }
    Ok(Json(ApiResponse::ok("scheduled task", task)))
}

#[derive(OpenApi)]
#[openapi(paths(create_scheduled_task_handler, get_scheduled_task_handler))]
struct Docs;

pub fn create_docs() -> utoipa::openapi::OpenApi {
    Docs::openapi()
}

pub fn create_router() -> Router<AppState> {
    Router::new().route(
        "/:id",
        post(create_scheduled_task_handler).get(get_scheduled_task_handler),
    )
}
