use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use utoipa::ToSchema;

use crate::{error::StoreResult, Store};

/// Processing state of a stored table-change event. Ratchets forward only:
/// a `processed` or `failed` event is never picked up again.
#[derive(
    PartialEq, Eq, Clone, Copy, Debug, Deserialize, Serialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "webhook_event_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Received,
    Processed,
    Failed,
}

/// Raw envelope of a table-change event pushed by the satellite.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct WebhookEvent {
    pub id: i64,
    pub operation: String,
    pub table_name: String,
    pub event_time: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub data: Option<Json<Value>>,
    #[schema(value_type = Object)]
    pub old_data: Option<Json<Value>>,
    pub status: EventStatus,
    pub error_msg: String,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub operation: String,
    pub table_name: String,
    pub event_time: DateTime<Utc>,
    pub data: Option<Value>,
    pub old_data: Option<Value>,
}

impl Store {
    pub async fn create_webhook_event(&self, new: NewWebhookEvent) -> StoreResult<WebhookEvent> {
        let event = sqlx::query_as::<_, WebhookEvent>(
            r#"
            INSERT INTO webhook_events (operation, table_name, event_time, data, old_data)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&new.operation)
        .bind(&new.table_name)
        .bind(new.event_time)
        .bind(new.data.map(Json))
        .bind(new.old_data.map(Json))
        .fetch_one(self.pool())
        .await?;
        Ok(event)
    }

    /// Move an event forward. Only `received` events can transition, which
    /// makes processing at-most-once even with concurrent drainers.
    pub async fn update_event_status(
        &self,
        id: i64,
        status: EventStatus,
        error_msg: &str,
    ) -> StoreResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = $2, error_msg = $3, processed_at = now()
            WHERE id = $1 AND status = 'received'
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error_msg)
        .execute(self.pool())
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    pub async fn webhook_events(
        &self,
        limit: i64,
        offset: i64,
        table_name: Option<&str>,
        status: Option<EventStatus>,
    ) -> StoreResult<Vec<WebhookEvent>> {
        let events = sqlx::query_as::<_, WebhookEvent>(
            r#"
            SELECT * FROM webhook_events
            WHERE ($3::text IS NULL OR table_name = $3)
              AND ($4::webhook_event_status IS NULL OR status = $4)
            ORDER BY id ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .bind(table_name)
        .bind(status)
        .fetch_all(self.pool())
        .await?;
        Ok(events)
    }
}
