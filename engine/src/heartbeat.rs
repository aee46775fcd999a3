use async_trait::async_trait;
use storx_backup_lib::{ProcessorError, ProcessorResult};
use storx_backup_providers::Heartbeat;
use storx_backup_store::{Store, StoreError};

/// Heartbeat bound to one recurring task row. Each beat refreshes
/// `last_heart_beat` and fails as soon as the row is no longer `running`,
/// which is how a reaped or externally cancelled task stops its processor
/// at the next checkpoint.
pub struct TaskHeartbeat {
    store: Store,
    task_id: i64,
}

impl TaskHeartbeat {
    pub fn new(store: Store, task_id: i64) -> Self {
        Self { store, task_id }
    }
}

#[async_trait]
impl Heartbeat for TaskHeartbeat {
    async fn beat(&self) -> ProcessorResult<()> {
        self.store.heartbeat(self.task_id).await.map_err(|e| match e {
            StoreError::Conflict(msg) => ProcessorError::Cancelled(msg),
            other => ProcessorError::Internal(other.to_string()),
        })
    }
}

/// Same contract for scheduled tasks, which track their own `heart_beat`
/// column.
pub struct ScheduledTaskHeartbeat {
    store: Store,
    task_id: i64,
}

impl ScheduledTaskHeartbeat {
    pub fn new(store: Store, task_id: i64) -> Self {
        Self { store, task_id }
    }
}

#[async_trait]
impl Heartbeat for ScheduledTaskHeartbeat {
    async fn beat(&self) -> ProcessorResult<()> {
        self.store
            .scheduled_heartbeat(self.task_id)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(msg) => ProcessorError::Cancelled(msg),
                other => ProcessorError::Internal(other.to_string()),
            })
    }
}
