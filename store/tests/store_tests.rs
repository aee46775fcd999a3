//! Integration tests against a live Postgres. They are skipped unless
//! `TEST_POSTGRES_DSN` points at a database the suite may write to.

use std::sync::{Mutex, MutexGuard, OnceLock};

use chrono::{Datelike, NaiveDate, Utc};
use serde_json::json;
use storx_backup_lib::{Interval, Method, SyncType};
use storx_backup_store::{
    EventStatus, JobStatus, JobUpdate, NewJob, NewWebhookEvent, Store, StoreError, TaskStatus,
    TaskUpdate,
};

// the claim and reap paths operate on the whole queue, so the suite runs
// one test at a time against the shared database
static DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn db_lock() -> MutexGuard<'static, ()> {
    DB_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn test_store() -> Option<(Store, sqlx::PgPool)> {
    let dsn = match std::env::var("TEST_POSTGRES_DSN") {
        Ok(dsn) => dsn,
        Err(_) => {
            eprintln!("skipping: TEST_POSTGRES_DSN is not set");
            return None;
        }
    };
    let store = Store::open(&dsn).await.expect("store opens");
    let pool = sqlx::PgPool::connect(&dsn).await.expect("pool opens");
    Some((store, pool))
}

fn unique_user() -> String {
    format!("u-{:016x}", rand::random::<u64>())
}

fn new_job(user_id: &str, name: &str, interval: Interval, on_day: &str) -> NewJob {
    NewJob {
        user_id: user_id.to_string(),
        login_id: format!("{name}@example.com"),
        name: name.to_string(),
        method: Method::Gmail,
        interval,
        on_day: on_day.to_string(),
        sync_type: SyncType::Daily,
        input_data: json!({ "refresh_token": "r1" }),
        storx_token: "grant".to_string(),
    }
}

async fn active_job(store: &Store, user_id: &str, name: &str) -> storx_backup_store::Job {
    let job = store
        .create_job(new_job(user_id, name, Interval::Daily, "12am"))
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
        .expect("job activates")
}

#[tokio::test]
async fn duplicate_job_name_is_rejected() {
    let _guard = db_lock();
    let Some((store, _)) = test_store().await else { return };
    let user = unique_user();
    store
        .create_job(new_job(&user, "a", Interval::Daily, "12am"))
        .await
        .unwrap();
    let duplicate = store
        .create_job(new_job(&user, "a", Interval::Daily, "12am"))
        .await;
    assert!(matches!(duplicate, Err(StoreError::DuplicateKey(_))));
}

#[tokio::test]
async fn activation_requires_credentials() {
    let _guard = db_lock();
    let Some((store, _)) = test_store().await else { return };
    let user = unique_user();
    let mut job = new_job(&user, "noauth", Interval::Daily, "12am");
    job.input_data = json!({});
    let job = store.create_job(job).await.unwrap();
    let result = store
        .update_job(
            job.id,
            JobUpdate {
                active: Some(true),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(StoreError::Validation(_))));
}

#[tokio::test]
async fn daily_job_is_enqueued_once_per_day() {
    let _guard = db_lock();
    let Some((store, _)) = test_store().await else { return };
    let user = unique_user();
    let job = active_job(&store, &user, "daily").await;
    let today = Utc::now().date_naive();

    let first = store.enqueue_due_jobs(today, 10).await.unwrap();
    assert!(first.contains(&job.id));

    // queued message plus the open task both block a second enqueue
    let second = store.enqueue_due_jobs(today, 10).await.unwrap();
    assert!(!second.contains(&job.id));

    let tasks = store.list_tasks_by_job(job.id, 10, 0).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Pushed);

    let job = store.job_by_id(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::InQueue);
    assert_eq!(job.message, "push to queue");
}

#[tokio::test]
async fn monthly_job_fires_only_on_its_day() {
    let _guard = db_lock();
    let Some((store, _)) = test_store().await else { return };
    let user = unique_user();
    let job = store
        .create_job(new_job(&user, "monthly", Interval::Monthly, "15"))
        .await
        .unwrap();
    store
        .update_job(
            job.id,
            JobUpdate {
                active: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let fifteenth = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
    let sixteenth = NaiveDate::from_ymd_opt(2026, 7, 16).unwrap();

    let off_day = store.enqueue_due_jobs(sixteenth, 10).await.unwrap();
    assert!(!off_day.contains(&job.id));

    let on_day = store.enqueue_due_jobs(fifteenth, 10).await.unwrap();
    assert!(on_day.contains(&job.id));
}

#[tokio::test]
async fn scheduler_sql_agrees_with_interval_is_due() {
    let _guard = db_lock();
    let Some((store, _)) = test_store().await else { return };

    // 2026-07-17 is a Friday
    let thursday = NaiveDate::from_ymd_opt(2026, 7, 16).unwrap();
    let friday = NaiveDate::from_ymd_opt(2026, 7, 17).unwrap();
    let fifteenth = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
    let thirty_first = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
    let june_thirtieth = NaiveDate::from_ymd_opt(2026, 6, 30).unwrap();

    // one fresh job per probe: enqueueing mutates the row, so a fired job
    // cannot be probed again
    let probes = [
        (Interval::Daily, "12am", thursday),
        (Interval::Daily, "12am", friday),
        (Interval::Weekly, "friday", thursday),
        (Interval::Weekly, "friday", friday),
        (Interval::Monthly, "15", fifteenth),
        (Interval::Monthly, "15", friday),
        (Interval::Monthly, "31", thirty_first),
        (Interval::Monthly, "31", june_thirtieth),
        (Interval::OneTime, "", friday),
    ];

    for (interval, on, date) in probes {
        let user = unique_user();
        let job = store
            .create_job(new_job(&user, "agree", interval, on))
            .await
            .unwrap();
        store
            .update_job(
                job.id,
                JobUpdate {
                    active: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let enqueued = store.enqueue_due_jobs(date, 1000).await.unwrap();
        assert_eq!(
            enqueued.contains(&job.id),
            interval.is_due(on, date),
            "SQL and Interval::is_due disagree for {interval} on={on} at {date}"
        );
    }
}

#[tokio::test]
async fn claim_moves_task_and_job_forward_together() {
    let _guard = db_lock();
    let Some((store, _)) = test_store().await else { return };
    let user = unique_user();
    let job = active_job(&store, &user, "claim").await;
    let task = store.create_task(job.id).await.unwrap();

    // a second open task for the same job is refused
    assert!(matches!(
        store.create_task(job.id).await,
        Err(StoreError::Conflict(_))
    ));

    // claim until our task comes up; other tests may be queueing too
    let claimed = loop {
        match store.claim_next_task().await.unwrap() {
            Some(t) if t.id == task.id => break t,
            Some(_) => continue,
            None => panic!("queue drained without our task"),
        }
    };
    assert_eq!(claimed.status, TaskStatus::Running);
    assert_eq!(claimed.message, "Automatic backup started");
    assert!(claimed.last_heart_beat.is_some());

    let job = store.job_by_id(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::InProgress);

    store.heartbeat(task.id).await.unwrap();

    store
        .update_task(
            task.id,
            TaskUpdate {
                status: Some(TaskStatus::Success),
                message: Some("backup completed".to_string()),
                execution: Some(1.5),
            },
        )
        .await
        .unwrap();
    // a finished task no longer accepts heartbeats
    assert!(store.heartbeat(task.id).await.is_err());
}

#[tokio::test]
async fn failed_task_consumes_retries_up_to_the_bound() {
    let _guard = db_lock();
    let Some((store, pool)) = test_store().await else { return };
    let user = unique_user();
    let job = active_job(&store, &user, "retries").await;
    let task = store.create_task(job.id).await.unwrap();

    for expected in 1..=3 {
        let failed = store
            .update_task(
                task.id,
                TaskUpdate {
                    status: Some(TaskStatus::Failed),
                    message: Some("boom".to_string()),
                    execution: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(failed.retry_count, expected);
    }

    // at the bound the task is invisible to the claim query
    let claimable: (i64,) = sqlx::query_as(
        r#"
        SELECT count(*) FROM task_listing_dbs
        WHERE id = $1 AND status = 'failed' AND retry_count < 3
        "#,
    )
    .bind(task.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(claimable.0, 0);
}

#[tokio::test]
async fn reaper_fails_stuck_tasks_and_their_jobs() {
    let _guard = db_lock();
    let Some((store, pool)) = test_store().await else { return };
    let user = unique_user();
    let job = active_job(&store, &user, "stuck").await;
    let task = store.create_task(job.id).await.unwrap();
    let claimed = loop {
        match store.claim_next_task().await.unwrap() {
            Some(t) if t.id == task.id => break t,
            Some(_) => continue,
            None => panic!("queue drained without our task"),
        }
    };

    sqlx::query(
        "UPDATE task_listing_dbs SET last_heart_beat = now() - interval '11 minutes' WHERE id = $1",
    )
    .bind(claimed.id)
    .execute(&pool)
    .await
    .unwrap();

    let reaped = store.reap_stuck_tasks().await.unwrap();
    assert!(reaped >= 1);

    let task = store.task_by_id(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.message, "process got stuck");
    assert_eq!(task.retry_count, 1);

    let job = store.job_by_id(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.message_status, storx_backup_store::MessageStatus::Error);
}

#[tokio::test]
async fn webhook_event_processes_at_most_once() {
    let _guard = db_lock();
    let Some((store, _)) = test_store().await else { return };
    let event = store
        .create_webhook_event(NewWebhookEvent {
            operation: "DELETE".to_string(),
            table_name: "objects".to_string(),
            event_time: Utc::now(),
            data: Some(json!({ "bucket_name": "gmail" })),
            old_data: None,
        })
        .await
        .unwrap();
    assert_eq!(event.status, EventStatus::Received);

    let first = store
        .update_event_status(event.id, EventStatus::Processed, "")
        .await
        .unwrap();
    let second = store
        .update_event_status(event.id, EventStatus::Processed, "again")
        .await
        .unwrap();
    assert!(first);
    assert!(!second);
}

#[tokio::test]
async fn synced_object_rows_are_find_or_create() {
    let _guard = db_lock();
    let Some((store, _)) = test_store().await else { return };
    let user = unique_user();
    let a = store
        .create_synced_object(&user, "gmail", "a@x/m1.json", "google", "gmail")
        .await
        .unwrap();
    let b = store
        .create_synced_object(&user, "gmail", "a@x/m1.json", "google", "gmail")
        .await
        .unwrap();
    assert_eq!(a.id, b.id);

    let rows = store
        .synced_objects_by_user_bucket(&user, "gmail", Some("google"), None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    assert!(store
        .delete_synced_object("gmail", "a@x/m1.json")
        .await
        .unwrap());
    assert!(!store
        .delete_synced_object("gmail", "a@x/m1.json")
        .await
        .unwrap());
}

#[tokio::test]
async fn scheduled_task_claim_transitions_to_running() {
    let _guard = db_lock();
    let Some((store, _)) = test_store().await else { return };
    let user = unique_user();
    let created = store
        .create_scheduled_task(
            &user,
            "a@x",
            Method::GooglePhotos,
            "grant",
            json!({ "refresh_token": "r1" }),
            vec!["p1".to_string(), "p2".to_string()],
        )
        .await
        .unwrap();

    let claimed = loop {
        match store.claim_next_scheduled_task().await.unwrap() {
            Some(t) if t.id == created.id => break t,
            Some(_) => continue,
            None => panic!("queue drained without our scheduled task"),
        }
    };
    assert_eq!(
        claimed.status,
        storx_backup_store::ScheduledTaskStatus::Running
    );
    assert!(claimed.heart_beat.is_some());
    store.scheduled_heartbeat(claimed.id).await.unwrap();
}

#[tokio::test]
async fn weekly_job_enqueues_on_its_weekday() {
    let _guard = db_lock();
    let Some((store, _)) = test_store().await else { return };
    let user = unique_user();
    // 2026-07-17 is a Friday
    let friday = NaiveDate::from_ymd_opt(2026, 7, 17).unwrap();
    assert_eq!(friday.weekday(), chrono::Weekday::Fri);

    let job = store
        .create_job(new_job(&user, "weekly", Interval::Weekly, "friday"))
        .await
        .unwrap();
    store
        .update_job(
            job.id,
            JobUpdate {
                active: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let thursday = NaiveDate::from_ymd_opt(2026, 7, 16).unwrap();
    let off_day = store.enqueue_due_jobs(thursday, 10).await.unwrap();
    assert!(!off_day.contains(&job.id));

    let on_day = store.enqueue_due_jobs(friday, 10).await.unwrap();
    assert!(on_day.contains(&job.id));
}
