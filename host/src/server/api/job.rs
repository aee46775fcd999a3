use std::str::FromStr;

use axum::{
    debug_handler,
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use storx_backup_engine::drain_webhook_events;
use storx_backup_lib::{Interval, Method, SyncType};
use storx_backup_providers::connect_adapter;
use storx_backup_store::{Job, JobLite, JobUpdate, NewJob, TokenKind};
use tracing::{debug, info};
use utoipa::OpenApi;

use crate::{
    error::{HostError, HostResult},
    metrics::JOBS_CREATED,
    server::{api::ApiResponse, auth::AccessToken},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateJobQuery {
    sync_type: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CreateJobBody {
    /// Source-account name; filled from the provider identity when empty.
    name: String,
    /// Destination path prefix; defaults to `name`.
    login_id: String,
    interval: Option<Interval>,
    on: String,
    /// Provider credentials: refresh token, static token or DSN fields.
    input_data: Value,
}

#[utoipa::path(post, path = "/auto-sync/job/{method}",
    tag = "AutoSync",
    params(("method" = String, Path, description = "Backup method")),
    responses(
        (status = 200, description = "Job created"),
        (status = 400, description = "Invalid method or body"),
        (status = 403, description = "Missing access token"),
    )
)]
#[debug_handler(state = AppState)]
/// Create a backup job for a method. A `one_time` job also gets its task
/// immediately; recurring jobs wait for the scheduler.
async fn create_job_handler(
    State(state): State<AppState>,
    Path(method): Path<String>,
    Query(query): Query<CreateJobQuery>,
    token: AccessToken,
    Json(body): Json<CreateJobBody>,
) -> HostResult<Json<ApiResponse<Job>>> {
    let method = Method::from_str(&method).map_err(HostError::InvalidMethod)?;
    let sync_type = match query.sync_type.as_deref() {
        None => SyncType::Daily,
        Some(raw) => SyncType::from_str(raw).map_err(HostError::InvalidRequest)?,
    };

    let input_data = resolve_stored_credentials(&state, method, body.input_data).await?;

    // resolve the source-account identity when the caller did not name it;
    // database sources have no adapter to ask
    let name = if body.name.is_empty() {
        if method.is_database() {
            return Err(HostError::InvalidRequest(
                "database jobs need an explicit name".to_string(),
            ));
        }
        let adapter = connect_adapter(method, &state.deps.keys, &input_data)
            .await
            .map_err(|e| HostError::Unauthorized(e.to_string()))?;
        adapter
            .user_identity()
            .await
            .map_err(|e| HostError::Unauthorized(e.to_string()))?
            .email
    } else {
        body.name
    };
    let login_id = if body.login_id.is_empty() {
        name.clone()
    } else {
        body.login_id
    };
    let interval = match sync_type {
        SyncType::OneTime => Interval::OneTime,
        SyncType::Daily => body.interval.unwrap_or(Interval::Daily),
    };

    let job = state
        .store
        .create_job(NewJob {
            user_id: token.user_id,
            login_id,
            name,
            method,
            interval,
            on_day: body.on,
            sync_type,
            input_data,
            storx_token: token.grant,
        })
        .await?;
    JOBS_CREATED.with_label_values(&[&method.to_string()]).inc();
    info!(job_id = job.id, %method, "job created");

    if sync_type == SyncType::OneTime {
        // one_time jobs skip the scheduler; their task exists from birth
        state
            .store
            .update_job(
                job.id,
                JobUpdate {
                    active: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        state.store.create_task(job.id).await?;
    }

    let job = state.store.job_by_id(job.id).await?;
    Ok(Json(ApiResponse::ok("job created", job)))
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ListJobsQuery {
    method: Option<String>,
}

#[utoipa::path(get, path = "/auto-sync/job/",
    tag = "AutoSync",
    params(("method" = Option<String>, Query, description = "Filter by backup method")),
    responses((status = 200, description = "Jobs of the calling user", body = [Job]))
)]
#[debug_handler(state = AppState)]
/// List the caller's jobs, optionally filtered by method.
async fn list_jobs_handler(
    State(state): State<AppState>,
    token: AccessToken,
    Query(query): Query<ListJobsQuery>,
) -> HostResult<Json<ApiResponse<Vec<Job>>>> {
    let method = match query.method.as_deref() {
        None => None,
        Some(raw) => Some(Method::from_str(raw).map_err(HostError::InvalidMethod)?),
    };
    // listing is a natural moment to fold pending delete events in
    if let Ok(drained) = drain_webhook_events(&state.store, 25).await {
        if drained > 0 {
            debug!(drained, "drained webhook events before listing");
        }
    }
    let jobs = state
        .store
        .list_jobs_for_user(&token.user_id, method)
        .await?;
    Ok(Json(ApiResponse::ok("jobs", jobs)))
}

#[utoipa::path(get, path = "/auto-sync/job/{id}",
    tag = "AutoSync",
    params(("id" = i64, Path, description = "Job id")),
    responses((status = 200, description = "The job", body = Job), (status = 404, description = "No such job"))
)]
#[debug_handler(state = AppState)]
/// Fetch one job.
async fn get_job_handler(
    State(state): State<AppState>,
    token: AccessToken,
    Path(id): Path<i64>,
) -> HostResult<Json<ApiResponse<Job>>> {
    let job = owned_job(&state, &token, id).await?;
    Ok(Json(ApiResponse::ok("job", job)))
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct UpdateJobBody {
    interval: Option<Interval>,
    on: Option<String>,
    input_data: Option<Value>,
    active: Option<bool>,
}

#[utoipa::path(put, path = "/auto-sync/job/{id}",
    tag = "AutoSync",
    params(("id" = i64, Path, description = "Job id")),
    responses(
        (status = 200, description = "Updated job", body = Job),
        (status = 400, description = "Validation failed"),
        (status = 401, description = "Replacement token belongs to another account"),
    )
)]
#[debug_handler(state = AppState)]
/// Update a job. Replacing the refresh token re-checks the source account:
/// the new token must belong to the same account the job was created for.
async fn update_job_handler(
    State(state): State<AppState>,
    token: AccessToken,
    Path(id): Path<i64>,
    Json(body): Json<UpdateJobBody>,
) -> HostResult<Json<ApiResponse<Job>>> {
    let job = owned_job(&state, &token, id).await?;

    if let Some(input_data) = &body.input_data {
        let replacing_token = input_data.get("refresh_token").is_some()
            || input_data.get("access_token").is_some();
        if replacing_token && !job.method.is_database() {
            let adapter = connect_adapter(job.method, &state.deps.keys, input_data)
                .await
                .map_err(|e| HostError::Unauthorized(e.to_string()))?;
            let identity = adapter
                .user_identity()
                .await
                .map_err(|e| HostError::Unauthorized(e.to_string()))?;
            if identity.email != job.name {
                return Err(HostError::Unauthorized(format!(
                    "credentials belong to {}, job is for {}",
                    identity.email, job.name
                )));
            }
        }
    }

    let updated = state
        .store
        .update_job(
            id,
            JobUpdate {
                interval: body.interval,
                on_day: body.on,
                input_data: body.input_data,
                active: body.active,
                storx_token: Some(token.grant),
                ..Default::default()
            },
        )
        .await?;
    Ok(Json(ApiResponse::ok("job updated", updated)))
}

#[utoipa::path(delete, path = "/auto-sync/job/{id}",
    tag = "AutoSync",
    params(("id" = i64, Path, description = "Job id")),
    responses((status = 200, description = "Job deleted"), (status = 404, description = "No such job"))
)]
#[debug_handler(state = AppState)]
/// Delete a job and, through the cascade, its tasks.
async fn delete_job_handler(
    State(state): State<AppState>,
    token: AccessToken,
    Path(id): Path<i64>,
) -> HostResult<Json<ApiResponse<Value>>> {
    owned_job(&state, &token, id).await?;
    state.store.delete_job(id).await?;
    Ok(Json(ApiResponse::ok("job deleted", Value::Null)))
}

#[utoipa::path(get, path = "/auto-sync/job/interval",
    tag = "AutoSync",
    responses((status = 200, description = "Supported intervals"))
)]
#[debug_handler(state = AppState)]
/// The interval vocabulary the scheduler understands.
async fn interval_handler() -> Json<ApiResponse<Vec<String>>> {
    Json(ApiResponse::ok(
        "supported intervals",
        vec![
            Interval::Daily.to_string(),
            Interval::Weekly.to_string(),
            Interval::Monthly.to_string(),
            Interval::OneTime.to_string(),
        ],
    ))
}

#[utoipa::path(get, path = "/auto-sync/live",
    tag = "AutoSync",
    responses((status = 200, description = "Jobs with open or failed tasks", body = [JobLite]))
)]
#[debug_handler(state = AppState)]
/// Jobs of the caller that currently have running, queued or failed tasks.
pub async fn live_handler(
    State(state): State<AppState>,
    token: AccessToken,
) -> HostResult<Json<ApiResponse<Vec<JobLite>>>> {
    if let Ok(drained) = drain_webhook_events(&state.store, 25).await {
        if drained > 0 {
            debug!(drained, "drained webhook events before live view");
        }
    }
    let jobs = state
        .store
        .active_jobs_with_open_tasks(&token.user_id)
        .await?;
    Ok(Json(ApiResponse::ok("live jobs", jobs)))
}

/// Credentials may arrive inline or as a `cookie` referencing a token the
/// OAuth callback stored earlier; resolve the cookie into the concrete
/// provider token so the adapters only ever see real credentials.
async fn resolve_stored_credentials(
    state: &AppState,
    method: Method,
    mut input_data: Value,
) -> HostResult<Value> {
    let has_inline = input_data.get("refresh_token").is_some()
        || input_data.get("access_token").is_some();
    let cookie = input_data
        .get("cookie")
        .and_then(Value::as_str)
        .map(str::to_string);
    let (Some(cookie), false) = (cookie, has_inline) else {
        return Ok(input_data);
    };

    let kind = match method {
        Method::Gmail | Method::GoogleDrive | Method::GooglePhotos | Method::GoogleCloud => {
            TokenKind::Google
        }
        Method::Shopify => TokenKind::Shopify,
        Method::Quickbooks => TokenKind::Quickbooks,
        _ => {
            return Err(HostError::InvalidRequest(format!(
                "{method} does not use stored cookies"
            )))
        }
    };
    let stored = state
        .store
        .token_by_cookie(kind, &cookie)
        .await
        .map_err(|e| HostError::Unauthorized(format!("cookie did not resolve: {e}")))?;

    let field = if method.is_oauth() {
        "refresh_token"
    } else {
        "access_token"
    };
    if let Some(object) = input_data.as_object_mut() {
        object.insert(field.to_string(), Value::String(stored));
        object.remove("cookie");
    }
    Ok(input_data)
}

/// Load a job and check the caller owns it.
async fn owned_job(state: &AppState, token: &AccessToken, id: i64) -> HostResult<Job> {
    let job = state.store.job_by_id(id).await?;
    if job.user_id != token.user_id {
        return Err(HostError::NotFound(format!("job {id}")));
    }
    Ok(job)
}

#[derive(OpenApi)]
#[openapi(paths(
    create_job_handler,
    list_jobs_handler,
    get_job_handler,
    update_job_handler,
    delete_job_handler,
    interval_handler,
    live_handler
))]
struct Docs;

pub fn create_docs() -> utoipa::openapi::OpenApi {
    Docs::openapi()
}

pub fn create_router() -> Router<AppState> {
    // POST shares the dynamic segment with the id routes: the creation
    // path carries a method name where the others carry a job id.
    Router::new()
        .route("/", get(list_jobs_handler))
        .route("/interval", get(interval_handler))
        .route(
            "/:id",
            get(get_job_handler)
                .put(update_job_handler)
                .delete(delete_job_handler)
                .post(create_job_handler),
        )
}
