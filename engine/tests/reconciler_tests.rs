//! Reconciler integration tests against a live Postgres; skipped unless
//! `TEST_POSTGRES_DSN` is set.

use chrono::Utc;
use serde_json::json;
use storx_backup_engine::drain_webhook_events;
use storx_backup_lib::{Interval, Method, SyncType};
use storx_backup_satellite::{AccessGrant, PathCipher};
use storx_backup_store::{EventStatus, JobUpdate, NewJob, NewWebhookEvent, Store};

async fn test_store() -> Option<Store> {
    let dsn = match std::env::var("TEST_POSTGRES_DSN") {
        Ok(dsn) => dsn,
        Err(_) => {
            eprintln!("skipping: TEST_POSTGRES_DSN is not set");
            return None;
        }
    };
    Some(Store::open(&dsn).await.expect("store opens"))
}

fn grant_for(project_id: &str) -> AccessGrant {
    AccessGrant {
        satellite: "https://gateway.storx.example".to_string(),
        access_key_id: "ak".to_string(),
        secret_access_key: "sk".to_string(),
        root_secret: format!("root-{project_id}"),
        project_id: project_id.to_string(),
    }
}

async fn gmail_job(store: &Store, user_id: &str, storx_token: &str) {
    let job = store
        .create_job(NewJob {
            user_id: user_id.to_string(),
            login_id: "a@x".to_string(),
            name: format!("a-{user_id}@x"),
            method: Method::Gmail,
            interval: Interval::Daily,
            on_day: "12am".to_string(),
            sync_type: SyncType::Daily,
            input_data: json!({ "refresh_token": "r1" }),
            storx_token: storx_token.to_string(),
        })
        .await
        .expect("job creates");
    store
        .update_job(
            job.id,
            JobUpdate {
                active: Some(true),
                ..Default::default()
            },
        )
        .await
        .expect("job activates");
}

#[tokio::test]
async fn delete_event_removes_the_ledger_row() {
    let Some(store) = test_store().await else { return };
    let user_id = uuid::Uuid::new_v4().to_string();
    let grant = grant_for(&user_id);
    let serialized = grant.serialize().unwrap();
    gmail_job(&store, &user_id, &serialized).await;

    let object_key = "a@x/hello_m1.json";
    store
        .create_synced_object(&user_id, "gmail", object_key, "google", "gmail")
        .await
        .unwrap();

    let cipher = PathCipher::new(&grant, "gmail").unwrap();
    let sealed = cipher.encrypt_path(object_key).unwrap();

    let event = store
        .create_webhook_event(NewWebhookEvent {
            operation: "DELETE".to_string(),
            table_name: "objects".to_string(),
            event_time: Utc::now(),
            data: Some(json!({
                "bucket_name": "gmail",
                "object_key": sealed,
                "project_id": user_id,
            })),
            old_data: None,
        })
        .await
        .unwrap();

    let drained = drain_webhook_events(&store, 500).await.unwrap();
    assert!(drained >= 1);

    let events = store
        .webhook_events(500, 0, Some("objects"), Some(EventStatus::Processed))
        .await
        .unwrap();
    let ours = events.iter().find(|e| e.id == event.id).expect("processed");
    assert!(ours.error_msg.is_empty());

    let rows = store
        .synced_objects_by_user_bucket(&user_id, "gmail", None, None)
        .await
        .unwrap();
    assert!(rows.iter().all(|row| row.object_key != object_key));
}

#[tokio::test]
async fn non_delete_events_are_processed_benignly() {
    let Some(store) = test_store().await else { return };
    let event = store
        .create_webhook_event(NewWebhookEvent {
            operation: "INSERT".to_string(),
            table_name: "objects".to_string(),
            event_time: Utc::now(),
            data: Some(json!({ "bucket_name": "gmail" })),
            old_data: None,
        })
        .await
        .unwrap();

    drain_webhook_events(&store, 500).await.unwrap();

    let events = store
        .webhook_events(500, 0, Some("objects"), Some(EventStatus::Processed))
        .await
        .unwrap();
    let ours = events.iter().find(|e| e.id == event.id).expect("processed");
    assert!(ours.error_msg.is_empty());
}

#[tokio::test]
async fn delete_event_without_grant_records_the_failure() {
    let Some(store) = test_store().await else { return };
    let orphan_user = uuid::Uuid::new_v4().to_string();
    let event = store
        .create_webhook_event(NewWebhookEvent {
            operation: "DELETE".to_string(),
            table_name: "objects".to_string(),
            event_time: Utc::now(),
            data: Some(json!({
                "bucket_name": "gmail",
                "object_key": "opaque",
                "project_id": orphan_user,
            })),
            old_data: None,
        })
        .await
        .unwrap();

    drain_webhook_events(&store, 500).await.unwrap();

    let events = store
        .webhook_events(500, 0, Some("objects"), Some(EventStatus::Processed))
        .await
        .unwrap();
    let ours = events.iter().find(|e| e.id == event.id).expect("processed");
    assert!(ours.error_msg.contains("no access grant"));
}
