use std::time::Duration;

use serde_json::Value;
use storx_backup_lib::Method;
use storx_backup_satellite::{decode_field, normalize_uuid, AccessGrant, PathCipher};
use storx_backup_store::{EventStatus, Store, StoreResult, WebhookEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const DRAIN_INTERVAL: Duration = Duration::from_secs(30);
const DRAIN_BATCH: i64 = 50;

/// Periodic reconciler: drains `received` webhook events and folds object
/// deletions back into the sync ledger. Listing endpoints also call
/// [`drain_webhook_events`] opportunistically.
pub(crate) async fn reconciler_loop(store: Store, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(DRAIN_INTERVAL) => {
                match drain_webhook_events(&store, DRAIN_BATCH).await {
                    Ok(0) => {}
                    Ok(drained) => info!(drained, "webhook events reconciled"),
                    Err(e) => error!("webhook drain failed: {e:?}"),
                }
            }
        }
    }
    info!("reconciler stopped");
}

/// Process up to `limit` pending events. Every event ends `processed`
/// after one attempt: reconciliation is best-effort and a failure is
/// recorded on the event instead of retried.
pub async fn drain_webhook_events(store: &Store, limit: i64) -> StoreResult<u64> {
    let events = store
        .webhook_events(limit, 0, None, Some(EventStatus::Received))
        .await?;
    let mut drained = 0;
    for event in events {
        let note = match reconcile_event(store, &event).await {
            Ok(note) => note,
            Err(note) => note,
        };
        if store
            .update_event_status(event.id, EventStatus::Processed, &note)
            .await?
        {
            drained += 1;
        }
    }
    Ok(drained)
}

/// Handle one event. `Ok` carries a benign note, `Err` a short failure
/// message; both end up on the event row.
async fn reconcile_event(store: &Store, event: &WebhookEvent) -> Result<String, String> {
    if event.operation != "DELETE" || event.table_name != "objects" {
        return Ok(String::new());
    }
    let data = event
        .data
        .as_ref()
        .map(|d| &d.0)
        .ok_or_else(|| "event has no data payload".to_string())?;

    let bucket = decode_field(str_field(data, "bucket_name")?.as_str());
    let sealed_key = decode_field(str_field(data, "object_key")?.as_str());
    let project = str_field(data, "project_id")
        .or_else(|_| str_field(data, "user_id"))
        .map_err(|_| "event names no project or user".to_string())?;
    let user_id =
        normalize_uuid(&project).ok_or_else(|| format!("unparseable project id {project}"))?;

    let method = Method::from_bucket(&bucket)
        .ok_or_else(|| format!("no backup method for bucket {bucket}"))?;
    let grant = store
        .access_grant_for(&user_id, method)
        .await
        .map_err(|e| format!("no access grant: {e}"))?;
    let grant = AccessGrant::parse(&grant).map_err(|e| format!("bad access grant: {e}"))?;

    let cipher = PathCipher::new(&grant, &bucket).map_err(|e| e.to_string())?;
    let object_key = cipher
        .decrypt_path(&sealed_key)
        .map_err(|e| format!("object key did not decrypt: {e}"))?;

    let deleted = store
        .delete_synced_object(&bucket, &object_key)
        .await
        .map_err(|e| e.to_string())?;
    if deleted {
        debug!(bucket, object_key, "ledger row removed for deleted object");
    } else {
        debug!(bucket, object_key, "delete event for unknown ledger row");
    }
    Ok(String::new())
}

fn str_field(data: &Value, field: &str) -> Result<String, String> {
    data.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| format!("missing {field}"))
}
