use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storx_backup_lib::consts::{MAX_RETRY_COUNT, STUCK_AFTER};
use utoipa::ToSchema;

use crate::{
    error::{StoreError, StoreResult},
    Store,
};

/// One execution attempt of a job.
#[derive(
    PartialEq, Eq, Clone, Copy, Debug, Deserialize, Serialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pushed,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct Task {
    pub id: i64,
    pub cron_job_id: i64,
    pub status: TaskStatus,
    pub message: String,
    pub start_time: Option<DateTime<Utc>>,
    /// Elapsed seconds of the last run.
    pub execution: f64,
    pub retry_count: i32,
    pub last_heart_beat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Partial task update. Setting `status = failed` consumes a retry.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub message: Option<String>,
    pub execution: Option<f64>,
}

impl Store {
    /// Insert a fresh `pushed` task for the job and move the job to
    /// `in_queue` in the same transaction. Refuses while the job already
    /// has an open task, so no job ever runs twice concurrently.
    pub async fn create_task(&self, job_id: i64) -> StoreResult<Task> {
        let mut tx = self.pool().begin().await?;
        let open: (i64,) = sqlx::query_as(
            r#"
            SELECT count(*) FROM task_listing_dbs
            WHERE cron_job_id = $1 AND deleted_at IS NULL
              AND status IN ('pushed', 'running')
            "#,
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;
        if open.0 > 0 {
            return Err(StoreError::Conflict(format!(
                "job {job_id} already has a task in flight"
            )));
        }

        let task = sqlx::query_as::<_, Task>(
            "INSERT INTO task_listing_dbs (cron_job_id) VALUES ($1) RETURNING *",
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;
        let updated = sqlx::query(
            r#"
            UPDATE cron_job_listing_dbs
            SET status = 'in_queue', updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("job {job_id}")));
        }
        tx.commit().await?;
        Ok(task)
    }

    /// The claim hot path. One transaction: grab the oldest claimable task
    /// under `FOR UPDATE SKIP LOCKED`, move it to `running` with a fresh
    /// heartbeat, and move its job to `in_progress`. Returns `None` when
    /// the queue is empty.
    pub async fn claim_next_task(&self) -> StoreResult<Option<Task>> {
        let mut tx = self.pool().begin().await?;
        let candidate = sqlx::query_as::<_, Task>(
            r#"
            SELECT t.* FROM task_listing_dbs t
            JOIN cron_job_listing_dbs j ON j.id = t.cron_job_id
            WHERE j.active = TRUE
              AND j.deleted_at IS NULL
              AND t.deleted_at IS NULL
              AND (t.status = 'pushed'
                   OR (t.status = 'failed' AND t.retry_count < $1))
            ORDER BY t.created_at ASC, t.id ASC
            LIMIT 1
            FOR UPDATE OF t SKIP LOCKED
            "#,
        )
        .bind(MAX_RETRY_COUNT)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(candidate) = candidate else {
            return Ok(None);
        };

        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE task_listing_dbs
            SET status = 'running', start_time = now(), last_heart_beat = now(),
                message = 'Automatic backup started', updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(candidate.id)
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            UPDATE cron_job_listing_dbs
            SET status = 'in_progress', message_status = 'info', updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(task.cron_job_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(task))
    }

    pub async fn task_by_id(&self, id: i64) -> StoreResult<Task> {
        let task = sqlx::query_as::<_, Task>(
            "SELECT * FROM task_listing_dbs WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        Ok(task)
    }

    /// Partial task update. A transition into `failed` atomically bumps
    /// `retry_count`.
    pub async fn update_task(&self, id: i64, update: TaskUpdate) -> StoreResult<Task> {
        let failing = update.status == Some(TaskStatus::Failed);
        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE task_listing_dbs
            SET status = COALESCE($2, status),
                message = COALESCE($3, message),
                execution = COALESCE($4, execution),
                retry_count = retry_count + CASE WHEN $5 THEN 1 ELSE 0 END,
                updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.status)
        .bind(update.message)
        .bind(update.execution)
        .bind(failing)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        Ok(task)
    }

    /// Refresh the heartbeat of a running task. Errors when the row is no
    /// longer `running`, which is how a reaped or cancelled task stops its
    /// processor at the next checkpoint.
    pub async fn heartbeat(&self, id: i64) -> StoreResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE task_listing_dbs
            SET last_heart_beat = now()
            WHERE id = $1 AND status = 'running' AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("task {id} is not running")));
        }
        Ok(())
    }

    /// Promote every running task with a stale (or absent) heartbeat to
    /// `failed`, charge a retry, and fail the owning job with a matching
    /// message. Task rows are locked before their jobs. Returns the number
    /// of tasks reaped.
    pub async fn reap_stuck_tasks(&self) -> StoreResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::seconds(STUCK_AFTER.as_secs() as i64);
        let mut tx = self.pool().begin().await?;
        let stuck = sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM task_listing_dbs
            WHERE status = 'running' AND deleted_at IS NULL
              AND (last_heart_beat IS NULL OR last_heart_beat < $1)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        for task in &stuck {
            sqlx::query(
                r#"
                UPDATE task_listing_dbs
                SET status = 'failed', message = 'process got stuck',
                    execution = COALESCE(extract(epoch FROM now() - start_time), 0),
                    retry_count = retry_count + 1, updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(task.id)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                r#"
                UPDATE cron_job_listing_dbs
                SET status = 'failed', message = 'process got stuck',
                    message_status = 'error', updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(task.cron_job_id)
            .execute(&mut *tx)
            .await?;
            tracing::warn!(task_id = task.id, job_id = task.cron_job_id, "task reaped");
        }
        tx.commit().await?;
        Ok(stuck.len() as u64)
    }

    pub async fn list_tasks_by_job(
        &self,
        job_id: i64,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM task_listing_dbs
            WHERE cron_job_id = $1 AND deleted_at IS NULL
            ORDER BY id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(job_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;
        Ok(tasks)
    }
}
