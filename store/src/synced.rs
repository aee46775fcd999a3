use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{error::StoreResult, Store};

/// Authoritative record that an object is believed present in the
/// satellite. Created on successful upload, removed by restore flows or by
/// the webhook reconciler when the satellite reports a delete.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct SyncedObject {
    pub id: i64,
    pub user_id: String,
    pub bucket_name: String,
    pub object_key: String,
    pub source: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub object_type: String,
    pub synced_at: DateTime<Utc>,
}

impl Store {
    /// Find-or-create by the `(user, bucket, key)` triple; repeated uploads
    /// of the same object refresh `synced_at` instead of duplicating rows.
    pub async fn create_synced_object(
        &self,
        user_id: &str,
        bucket_name: &str,
        object_key: &str,
        source: &str,
        object_type: &str,
    ) -> StoreResult<SyncedObject> {
        let row = sqlx::query_as::<_, SyncedObject>(
            r#"
            INSERT INTO synced_objects
                (user_id, bucket_name, object_key, source, "type")
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, bucket_name, object_key)
            DO UPDATE SET synced_at = now()
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(bucket_name)
        .bind(object_key)
        .bind(source)
        .bind(object_type)
        .fetch_one(self.pool())
        .await?;
        Ok(row)
    }

    pub async fn synced_objects_by_user_bucket(
        &self,
        user_id: &str,
        bucket_name: &str,
        source: Option<&str>,
        object_type: Option<&str>,
    ) -> StoreResult<Vec<SyncedObject>> {
        let rows = sqlx::query_as::<_, SyncedObject>(
            r#"
            SELECT * FROM synced_objects
            WHERE user_id = $1 AND bucket_name = $2
              AND ($3::text IS NULL OR source = $3)
              AND ($4::text IS NULL OR "type" = $4)
            ORDER BY object_key
            "#,
        )
        .bind(user_id)
        .bind(bucket_name)
        .bind(source)
        .bind(object_type)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Delete the ledger row for `(bucket, key)`. Returns whether a row
    /// actually went away, so the reconciler can log misses.
    pub async fn delete_synced_object(
        &self,
        bucket_name: &str,
        object_key: &str,
    ) -> StoreResult<bool> {
        let deleted = sqlx::query(
            "DELETE FROM synced_objects WHERE bucket_name = $1 AND object_key = $2",
        )
        .bind(bucket_name)
        .bind(object_key)
        .execute(self.pool())
        .await?;
        Ok(deleted.rows_affected() > 0)
    }
}
