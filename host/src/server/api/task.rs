use axum::{
    debug_handler,
    extract::{Path, Query, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use storx_backup_store::Task;
use tracing::info;
use utoipa::OpenApi;

use crate::{
    error::{HostError, HostResult},
    metrics::TASKS_REQUESTED,
    server::{api::ApiResponse, auth::AccessToken},
    AppState,
};

#[utoipa::path(post, path = "/auto-sync/task/{job_id}",
    tag = "AutoSync",
    params(("job_id" = i64, Path, description = "Job id")),
    responses(
        (status = 200, description = "Task enqueued", body = Task),
        (status = 400, description = "A task is already open for this job"),
        (status = 404, description = "No such job"),
    )
)]
#[debug_handler(state = AppState)]
/// Enqueue a task for a job right now, outside the scheduler's clock.
async fn create_task_handler(
    State(state): State<AppState>,
    token: AccessToken,
    Path(job_id): Path<i64>,
) -> HostResult<Json<ApiResponse<Task>>> {
    let job = state.store.job_by_id(job_id).await?;
    if job.user_id != token.user_id {
        return Err(HostError::NotFound(format!("job {job_id}")));
    }
    let task = state.store.create_task(job_id).await?;
    TASKS_REQUESTED.inc();
    info!(job_id, task_id = task.id, "task enqueued on demand");
    Ok(Json(ApiResponse::ok("task created", task)))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    20
}

#[utoipa::path(get, path = "/auto-sync/task/{job_id}",
    tag = "AutoSync",
    params(
        ("job_id" = i64, Path, description = "Job id"),
        ("limit" = i64, Query, description = "Page size"),
        ("offset" = i64, Query, description = "Page offset"),
    ),
    responses((status = 200, description = "Task history, newest first", body = [Task]))
)]
#[debug_handler(state = AppState)]
/// Page through a job's execution history.
async fn list_tasks_handler(
    State(state): State<AppState>,
    token: AccessToken,
    Path(job_id): Path<i64>,
    Query(query): Query<ListTasksQuery>,
) -> HostResult<Json<ApiResponse<Vec<Task>>>> {
    let job = state.store.job_by_id(job_id).await?;
    if job.user_id != token.user_id {
        return Err(HostError::NotFound(format!("job {job_id}")));
    }
    let tasks = state
        .store
        .list_tasks_by_job(job_id, query.limit.clamp(1, 100), query.offset.max(0))
        .await?;
    Ok(Json(ApiResponse::ok("tasks", tasks)))
}

#[derive(OpenApi)]
#[openapi(paths(create_task_handler, list_tasks_handler))]
struct Docs;

pub fn create_docs() -> utoipa::openapi::OpenApi {
    Docs::openapi()
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/:job_id", post(create_task_handler).get(list_tasks_handler))
}
