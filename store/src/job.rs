use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use storx_backup_lib::{Interval, Memory, Method, SyncType};
use utoipa::ToSchema;

use crate::{
    error::{StoreError, StoreResult},
    Store,
};

/// Lifecycle of a job as the scheduler and dispatcher move it along.
#[derive(
    PartialEq, Eq, Clone, Copy, Debug, Deserialize, Serialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    InQueue,
    InProgress,
    Success,
    Failed,
}

/// Severity attached to the user-facing job message.
#[derive(
    PartialEq, Eq, Clone, Copy, Debug, Deserialize, Serialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "message_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Info,
    Warning,
    Error,
}

/// A persisted, user-owned backup intent.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct Job {
    pub id: i64,
    pub user_id: String,
    /// Destination path prefix, normally the user's login email.
    pub login_id: String,
    /// Usually the source-account email. Unique per `(user, sync_type)`.
    pub name: String,
    #[sqlx(try_from = "String")]
    #[schema(value_type = String)]
    pub method: Method,
    #[sqlx(try_from = "String")]
    #[schema(value_type = String)]
    pub interval: Interval,
    /// Day-of-week name or day-of-month; empty for daily/one_time.
    #[sqlx(rename = "on")]
    #[serde(rename = "on")]
    pub on_day: String,
    pub last_run: Option<NaiveDate>,
    /// Opaque provider credentials: refresh token, DSN fields, etc.
    #[schema(value_type = Object)]
    pub input_data: Json<Value>,
    #[serde(skip_serializing)]
    pub storx_token: String,
    pub active: bool,
    pub status: JobStatus,
    pub message: String,
    pub message_status: MessageStatus,
    /// Resumable state carried across runs.
    #[schema(value_type = Object)]
    pub task_memory: Option<Json<Memory>>,
    #[sqlx(try_from = "String")]
    #[schema(value_type = String)]
    pub sync_type: SyncType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// The slim join row returned for jobs that still have open tasks.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct JobLite {
    pub id: i64,
    pub name: String,
    #[sqlx(try_from = "String")]
    #[schema(value_type = String)]
    pub method: Method,
    pub status: JobStatus,
    pub message: String,
}

/// Input for job creation.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: String,
    pub login_id: String,
    pub name: String,
    pub method: Method,
    pub interval: Interval,
    pub on_day: String,
    pub sync_type: SyncType,
    pub input_data: Value,
    pub storx_token: String,
}

/// Partial update applied under a row lock; unset fields keep their value.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub interval: Option<Interval>,
    pub on_day: Option<String>,
    pub input_data: Option<Value>,
    pub storx_token: Option<String>,
    pub active: Option<bool>,
    pub status: Option<JobStatus>,
    pub message: Option<String>,
    pub message_status: Option<MessageStatus>,
    pub task_memory: Option<Memory>,
    pub last_run: Option<NaiveDate>,
}

impl Store {
    /// Create a job. Fails with `DuplicateKey` when the user already owns a
    /// job of the same name and sync type.
    pub async fn create_job(&self, new: NewJob) -> StoreResult<Job> {
        new.interval
            .validate_on(&new.on_day)
            .map_err(StoreError::Validation)?;
        let on_day = canonical_on(new.interval, &new.on_day);

        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO cron_job_listing_dbs
                (user_id, login_id, name, method, "interval", "on", input_data,
                 storx_token, sync_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(&new.user_id)
        .bind(&new.login_id)
        .bind(&new.name)
        .bind(new.method.to_string())
        .bind(new.interval.to_string())
        .bind(&on_day)
        .bind(Json(&new.input_data))
        .bind(&new.storx_token)
        .bind(new.sync_type.to_string())
        .fetch_one(self.pool())
        .await?;
        Ok(job)
    }

    pub async fn job_by_id(&self, id: i64) -> StoreResult<Job> {
        let job = sqlx::query_as::<_, Job>(
            "SELECT * FROM cron_job_listing_dbs WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        Ok(job)
    }

    pub async fn list_jobs_for_user(
        &self,
        user_id: &str,
        method: Option<Method>,
    ) -> StoreResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM cron_job_listing_dbs
            WHERE user_id = $1 AND deleted_at IS NULL
              AND ($2::text IS NULL OR method = $2)
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .bind(method.map(|m| m.to_string()))
        .fetch_all(self.pool())
        .await?;
        Ok(jobs)
    }

    /// Jobs of a user that currently have at least one non-terminal or
    /// failed task attached. One join query.
    pub async fn active_jobs_with_open_tasks(&self, user_id: &str) -> StoreResult<Vec<JobLite>> {
        let jobs = sqlx::query_as::<_, JobLite>(
            r#"
            SELECT DISTINCT j.id, j.name, j.method, j.status, j.message
            FROM cron_job_listing_dbs j
            JOIN task_listing_dbs t ON t.cron_job_id = j.id
            WHERE j.user_id = $1
              AND j.active = TRUE
              AND j.deleted_at IS NULL
              AND t.deleted_at IS NULL
              AND t.status IN ('pushed', 'running', 'failed')
            ORDER BY j.id
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(jobs)
    }

    /// Partial update under `FOR UPDATE`. Setting `active = true` runs the
    /// activation validation against the merged row, so a job can never go
    /// live with incomplete credentials.
    pub async fn update_job(&self, id: i64, update: JobUpdate) -> StoreResult<Job> {
        let mut tx = self.pool().begin().await?;
        let mut job = sqlx::query_as::<_, Job>(
            "SELECT * FROM cron_job_listing_dbs WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;

        if let Some(interval) = update.interval {
            job.interval = interval;
        }
        if let Some(on_day) = update.on_day {
            job.on_day = on_day;
        }
        job.on_day = canonical_on(job.interval, &job.on_day);
        if let Some(input_data) = update.input_data {
            job.input_data = Json(input_data);
        }
        if let Some(token) = update.storx_token {
            job.storx_token = token;
        }
        if let Some(status) = update.status {
            job.status = status;
        }
        if let Some(message) = update.message {
            job.message = message;
        }
        if let Some(message_status) = update.message_status {
            job.message_status = message_status;
        }
        if let Some(memory) = update.task_memory {
            job.task_memory = Some(Json(memory));
        }
        if let Some(last_run) = update.last_run {
            job.last_run = Some(last_run);
        }
        if let Some(active) = update.active {
            if active {
                validate_activation(&job)?;
            }
            job.active = active;
        }

        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE cron_job_listing_dbs SET
                "interval" = $2, "on" = $3, input_data = $4, storx_token = $5,
                active = $6, status = $7, message = $8, message_status = $9,
                task_memory = $10, last_run = $11, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(job.interval.to_string())
        .bind(&job.on_day)
        .bind(&job.input_data)
        .bind(&job.storx_token)
        .bind(job.active)
        .bind(job.status)
        .bind(&job.message)
        .bind(job.message_status)
        .bind(&job.task_memory)
        .bind(job.last_run)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(job)
    }

    /// Soft-delete the job; its tasks go with it through the cascade.
    pub async fn delete_job(&self, id: i64) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        let deleted = sqlx::query(
            "UPDATE task_listing_dbs SET deleted_at = now() WHERE cron_job_id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query(
            "UPDATE cron_job_listing_dbs SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("job {id}")));
        }
        tx.commit().await?;
        tracing::debug!(
            job_id = id,
            tasks = deleted.rows_affected(),
            "job deleted with its tasks"
        );
        Ok(())
    }

    /// One scheduler tick: inside a single transaction, select up to
    /// `limit` due jobs under `FOR UPDATE SKIP LOCKED`, mark each as pushed
    /// to the queue and insert its task. Returns the enqueued job ids.
    ///
    /// A job is due when it is active, not already queued (message check),
    /// has not run `today`, its interval matches the calendar, and no task
    /// of it is open. `one_time` jobs are never picked here.
    ///
    /// The `CASE` expression below is the SQL rendering of
    /// [`Interval::is_due`]; the two must move together, and the
    /// `scheduler_sql_agrees_with_interval_is_due` test holds them to it.
    pub async fn enqueue_due_jobs(
        &self,
        today: NaiveDate,
        limit: i64,
    ) -> StoreResult<Vec<i64>> {
        let weekday = today.format("%A").to_string().to_lowercase();
        let day_of_month = chrono::Datelike::day(&today).to_string();

        let mut tx = self.pool().begin().await?;
        let due = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM cron_job_listing_dbs j
            WHERE j.active = TRUE
              AND j.deleted_at IS NULL
              AND (j.message IS NULL OR j.message != 'push to queue')
              AND (j.last_run IS NULL OR j.last_run != $1)
              AND CASE j."interval"
                    WHEN 'daily' THEN TRUE
                    WHEN 'weekly' THEN lower(j."on") = $2
                    WHEN 'monthly' THEN j."on" = $3
                    ELSE FALSE
                  END
              AND NOT EXISTS (
                    SELECT 1 FROM task_listing_dbs t
                    WHERE t.cron_job_id = j.id
                      AND t.deleted_at IS NULL
                      AND t.status IN ('pushed', 'running')
              )
            ORDER BY j.last_run ASC NULLS FIRST, j.id ASC
            LIMIT $4
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(today)
        .bind(&weekday)
        .bind(&day_of_month)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let mut enqueued = Vec::with_capacity(due.len());
        for job in &due {
            sqlx::query(
                r#"
                UPDATE cron_job_listing_dbs
                SET message = 'push to queue', message_status = 'info',
                    status = 'in_queue', updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(job.id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("INSERT INTO task_listing_dbs (cron_job_id) VALUES ($1)")
                .bind(job.id)
                .execute(&mut *tx)
                .await?;
            enqueued.push(job.id);
        }
        tx.commit().await?;
        Ok(enqueued)
    }

    /// Access grant for the reconciler: the newest active job of this user
    /// and method carries the grant used to decrypt its object keys.
    pub async fn access_grant_for(
        &self,
        user_id: &str,
        method: Method,
    ) -> StoreResult<String> {
        let methods: Vec<String> = if method.is_database() {
            vec![
                Method::PsqlDatabase.to_string(),
                Method::MysqlDatabase.to_string(),
                Method::Database.to_string(),
            ]
        } else {
            vec![method.to_string()]
        };
        let token: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT storx_token FROM cron_job_listing_dbs
            WHERE user_id = $1 AND method = ANY($2)
              AND storx_token != '' AND deleted_at IS NULL
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(&methods)
        .fetch_optional(self.pool())
        .await?;
        token
            .map(|(t,)| t)
            .ok_or_else(|| StoreError::NotFound(format!("access grant for {user_id}/{method}")))
    }
}

/// Store the monthly day without leading zeroes and weekday names in
/// lowercase, so the scheduler's string comparison is exact.
fn canonical_on(interval: Interval, on_day: &str) -> String {
    match interval {
        Interval::Monthly => on_day
            .trim()
            .parse::<u32>()
            .map(|day| day.to_string())
            .unwrap_or_else(|_| on_day.to_string()),
        Interval::Weekly => on_day.trim().to_lowercase(),
        _ => on_day.to_string(),
    }
}

/// A job may only go active once everything a run needs is present.
fn validate_activation(job: &Job) -> StoreResult<()> {
    if job.storx_token.is_empty() {
        return Err(StoreError::Validation("storx_token is required".into()));
    }
    if job.interval != Interval::OneTime && job.on_day.is_empty() {
        return Err(StoreError::Validation("'on' is required".into()));
    }
    job.interval
        .validate_on(&job.on_day)
        .map_err(StoreError::Validation)?;

    let data = &job.input_data.0;
    match job.method {
        m if m.is_oauth() => {
            let ok = data
                .get("refresh_token")
                .and_then(Value::as_str)
                .is_some_and(|s| !s.is_empty());
            if !ok {
                return Err(StoreError::Validation("refresh_token is required".into()));
            }
        }
        m if m.is_database() => {
            for field in ["host", "port", "username", "password", "database_name"] {
                let ok = data
                    .get(field)
                    .and_then(Value::as_str)
                    .is_some_and(|s| !s.is_empty());
                if !ok {
                    return Err(StoreError::Validation(format!("{field} is required")));
                }
            }
        }
        _ => {
            let ok = data
                .get("access_token")
                .or_else(|| data.get("token"))
                .and_then(Value::as_str)
                .is_some_and(|s| !s.is_empty());
            if !ok {
                return Err(StoreError::Validation("access token is required".into()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_with(method: Method, input: Value) -> Job {
        Job {
            id: 1,
            user_id: "u1".into(),
            login_id: "a@x".into(),
            name: "a@x".into(),
            method,
            interval: Interval::Daily,
            on_day: "12am".into(),
            last_run: None,
            input_data: Json(input),
            storx_token: "grant".into(),
            active: false,
            status: JobStatus::Created,
            message: String::new(),
            message_status: MessageStatus::Info,
            task_memory: None,
            sync_type: SyncType::Daily,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn oauth_activation_needs_refresh_token() {
        let job = job_with(Method::Gmail, json!({}));
        assert!(validate_activation(&job).is_err());

        let job = job_with(Method::Gmail, json!({"refresh_token": "r1"}));
        assert!(validate_activation(&job).is_ok());
    }

    #[test]
    fn database_activation_needs_all_connection_fields() {
        let partial = json!({
            "host": "db", "port": "5432", "username": "u", "password": "p"
        });
        let job = job_with(Method::PsqlDatabase, partial);
        assert!(validate_activation(&job).is_err());

        let full = json!({
            "host": "db", "port": "5432", "username": "u",
            "password": "p", "database_name": "app"
        });
        let job = job_with(Method::PsqlDatabase, full);
        assert!(validate_activation(&job).is_ok());
    }

    #[test]
    fn activation_needs_storx_token() {
        let mut job = job_with(Method::Gmail, json!({"refresh_token": "r1"}));
        job.storx_token = String::new();
        assert!(validate_activation(&job).is_err());
    }
}
