use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use storx_backup_lib::consts::STUCK_AFTER;
use storx_backup_lib::{Memory, Method};
use utoipa::ToSchema;

use crate::{
    error::{StoreError, StoreResult},
    Store,
};

/// Lifecycle of a one-shot, list-oriented backup.
#[derive(
    PartialEq, Eq, Clone, Copy, Debug, Deserialize, Serialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "scheduled_task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScheduledTaskStatus {
    Created,
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
}

/// A one-shot backup over an explicit cohort of item ids. The cohort and
/// its per-item progress live in `memory`, so a crashed run resumes where
/// it stopped.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct ScheduledTask {
    pub id: i64,
    pub user_id: String,
    pub login_id: String,
    #[sqlx(try_from = "String")]
    #[schema(value_type = String)]
    pub method: Method,
    #[serde(skip_serializing)]
    pub storx_token: String,
    pub status: ScheduledTaskStatus,
    #[schema(value_type = Object)]
    pub input_data: Json<Value>,
    #[schema(value_type = Object)]
    pub memory: Json<Memory>,
    pub start_time: Option<DateTime<Utc>>,
    pub execution: f64,
    pub success_count: i32,
    pub failed_count: i32,
    pub errors: Vec<String>,
    pub heart_beat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Progress snapshot written back after (and during) a run.
#[derive(Debug, Clone, Default)]
pub struct ScheduledTaskUpdate {
    pub status: Option<ScheduledTaskStatus>,
    pub memory: Option<Memory>,
    pub execution: Option<f64>,
    pub success_count: Option<i32>,
    pub failed_count: Option<i32>,
    pub errors: Option<Vec<String>>,
}

impl Store {
    pub async fn create_scheduled_task(
        &self,
        user_id: &str,
        login_id: &str,
        method: Method,
        storx_token: &str,
        input_data: Value,
        item_ids: Vec<String>,
    ) -> StoreResult<ScheduledTask> {
        if item_ids.is_empty() {
            return Err(StoreError::Validation("no item ids supplied".into()));
        }
        let memory = Memory::with_pending(item_ids);
        let task = sqlx::query_as::<_, ScheduledTask>(
            r#"
            INSERT INTO scheduled_tasks
                (user_id, login_id, method, storx_token, input_data, memory)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(login_id)
        .bind(method.to_string())
        .bind(storx_token)
        .bind(Json(input_data))
        .bind(Json(memory))
        .fetch_one(self.pool())
        .await?;
        Ok(task)
    }

    /// Claim the oldest `created` scheduled task, moving it to `running`
    /// with a fresh heartbeat.
    pub async fn claim_next_scheduled_task(&self) -> StoreResult<Option<ScheduledTask>> {
        let mut tx = self.pool().begin().await?;
        let candidate: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM scheduled_tasks
            WHERE status = 'created'
            ORDER BY id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;
        let Some((id,)) = candidate else {
            return Ok(None);
        };
        let task = sqlx::query_as::<_, ScheduledTask>(
            r#"
            UPDATE scheduled_tasks
            SET status = 'running', start_time = now(), heart_beat = now(),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(task))
    }

    pub async fn scheduled_task_by_id(&self, id: i64) -> StoreResult<ScheduledTask> {
        let task = sqlx::query_as::<_, ScheduledTask>(
            "SELECT * FROM scheduled_tasks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("scheduled task {id}")))?;
        Ok(task)
    }

    pub async fn update_scheduled_task(
        &self,
        id: i64,
        update: ScheduledTaskUpdate,
    ) -> StoreResult<ScheduledTask> {
        let memory = match update.memory {
            Some(m) => Some(Json(m)),
            None => None,
        };
        let task = sqlx::query_as::<_, ScheduledTask>(
            r#"
            UPDATE scheduled_tasks
            SET status = COALESCE($2, status),
                memory = COALESCE($3, memory),
                execution = COALESCE($4, execution),
                success_count = COALESCE($5, success_count),
                failed_count = COALESCE($6, failed_count),
                errors = COALESCE($7, errors),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.status)
        .bind(memory)
        .bind(update.execution)
        .bind(update.success_count)
        .bind(update.failed_count)
        .bind(update.errors)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("scheduled task {id}")))?;
        Ok(task)
    }

    /// Heartbeat for a running scheduled task; errors once the row left
    /// `running`.
    pub async fn scheduled_heartbeat(&self, id: i64) -> StoreResult<()> {
        let updated = sqlx::query(
            "UPDATE scheduled_tasks SET heart_beat = now() WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "scheduled task {id} is not running"
            )));
        }
        Ok(())
    }

    /// Fail running scheduled tasks whose heartbeat went stale. Same
    /// threshold as the recurring-task reaper.
    pub async fn reap_stuck_scheduled_tasks(&self) -> StoreResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::seconds(STUCK_AFTER.as_secs() as i64);
        let updated = sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET status = 'failed', errors = array_append(errors, 'process got stuck'),
                execution = COALESCE(extract(epoch FROM now() - start_time), 0),
                updated_at = now()
            WHERE status = 'running'
              AND (heart_beat IS NULL OR heart_beat < $1)
            "#,
        )
        .bind(cutoff)
        .execute(self.pool())
        .await?;
        Ok(updated.rows_affected())
    }
}
