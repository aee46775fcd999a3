use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use storx_backup_lib::{ItemState, Memory, Method, ProcessorError, ProcessorResult};
use storx_backup_providers::{
    backup::BackupProcessor, run_scheduled_with, FetchedItem, Heartbeat, ItemPage, NoopHeartbeat,
    Processor, ProcessorDeps, ProcessorInput, ProcessorStore, ProviderKeys, SourceAdapter,
    SourceItem, UserIdentity,
};
use storx_backup_satellite::{ObjectMeta, ObjectStore, SatelliteError, SatelliteResult};
use storx_backup_store::{ScheduledTask, ScheduledTaskStatus, ScheduledTaskUpdate};

#[derive(Default)]
struct FakeStore {
    ledger: Mutex<HashMap<(String, String), HashSet<String>>>,
    fail_writes: bool,
    progress: Mutex<Vec<ScheduledTaskUpdate>>,
}

#[async_trait]
impl ProcessorStore for FakeStore {
    async fn synced_keys(&self, user_id: &str, bucket: &str) -> ProcessorResult<HashSet<String>> {
        let ledger = self.ledger.lock().unwrap();
        Ok(ledger
            .get(&(user_id.to_string(), bucket.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn record_synced(
        &self,
        user_id: &str,
        bucket: &str,
        key: &str,
        _source: &str,
        _object_type: &str,
    ) -> ProcessorResult<()> {
        if self.fail_writes {
            return Err(ProcessorError::Internal("ledger is down".to_string()));
        }
        self.ledger
            .lock()
            .unwrap()
            .entry((user_id.to_string(), bucket.to_string()))
            .or_default()
            .insert(key.to_string());
        Ok(())
    }

    async fn save_scheduled_progress(
        &self,
        _id: i64,
        update: ScheduledTaskUpdate,
    ) -> ProcessorResult<()> {
        self.progress.lock().unwrap().push(update);
        Ok(())
    }
}

#[derive(Default)]
struct FakeGateway {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    uploads: AtomicUsize,
    fail_uploads: bool,
}

#[async_trait]
impl ObjectStore for FakeGateway {
    async fn upload(
        &self,
        _access_grant: &str,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> SatelliteResult<()> {
        if self.fail_uploads && !key.ends_with(".file_placeholder") {
            return Err(SatelliteError::Storage("satellite is down".to_string()));
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), bytes);
        Ok(())
    }

    async fn download(
        &self,
        _access_grant: &str,
        bucket: &str,
        key: &str,
    ) -> SatelliteResult<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| SatelliteError::NotFound(format!("{bucket}/{key}")))
    }

    async fn delete(&self, _access_grant: &str, bucket: &str, key: &str) -> SatelliteResult<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn list(
        &self,
        _access_grant: &str,
        bucket: &str,
        prefix: &str,
    ) -> SatelliteResult<HashSet<String>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn list_recursive(
        &self,
        _access_grant: &str,
        bucket: &str,
    ) -> SatelliteResult<Vec<ObjectMeta>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((b, _), _)| b == bucket)
            .map(|((_, k), v)| ObjectMeta {
                key: k.clone(),
                size: v.len() as i64,
                modified: None,
            })
            .collect())
    }
}

impl FakeGateway {
    fn has(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }
}

struct FakeAdapter {
    items: Vec<SourceItem>,
    page_size: usize,
    fail_fetch: HashSet<String>,
    fetches: AtomicUsize,
}

impl FakeAdapter {
    fn new(items: Vec<SourceItem>) -> Self {
        Self {
            items,
            page_size: 2,
            fail_fetch: HashSet::new(),
            fetches: AtomicUsize::new(0),
        }
    }

    fn failing_on(mut self, ids: &[&str]) -> Self {
        self.fail_fetch = ids.iter().map(|s| s.to_string()).collect();
        self
    }
}

fn item(id: &str, name: &str) -> SourceItem {
    SourceItem {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: None,
        meta: json!({ "id": id, "name": name }),
    }
}

#[async_trait]
impl SourceAdapter for FakeAdapter {
    async fn user_identity(&self) -> ProcessorResult<UserIdentity> {
        Ok(UserIdentity {
            email: "a@x".to_string(),
            display_name: "A".to_string(),
        })
    }

    async fn enumerate(
        &self,
        page_token: Option<&str>,
        _filter: Option<&str>,
        _limit: usize,
    ) -> ProcessorResult<ItemPage> {
        let start: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(self.items.len());
        let items = self.items[start..end].to_vec();
        let next_page_token = (end < self.items.len()).then(|| end.to_string());
        Ok(ItemPage {
            items,
            next_page_token,
        })
    }

    async fn fetch(&self, item_id: &str) -> ProcessorResult<FetchedItem> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.contains(item_id) {
            return Err(ProcessorError::Internal("source returned 404".to_string()));
        }
        Ok(FetchedItem {
            bytes: format!("bytes of {item_id}").into_bytes(),
            content_type: "application/octet-stream".to_string(),
            meta: json!({ "id": item_id, "name": format!("{item_id}.bin"),
                          "subject": format!("subject {item_id}"),
                          "filename": format!("{item_id}.jpg") }),
        })
    }

    async fn insert(&self, _payload: &[u8], name: &str) -> ProcessorResult<String> {
        Ok(name.to_string())
    }
}

/// Heartbeat that starts failing after N beats, like a reaped task row.
struct TrippingHeartbeat {
    beats_left: AtomicUsize,
}

#[async_trait]
impl Heartbeat for TrippingHeartbeat {
    async fn beat(&self) -> ProcessorResult<()> {
        if self.beats_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            return Err(ProcessorError::Cancelled("task is not running".to_string()));
        }
        Ok(())
    }
}

fn deps_with(store: Arc<FakeStore>, gateway: Arc<FakeGateway>) -> ProcessorDeps {
    ProcessorDeps {
        store,
        gateway,
        keys: ProviderKeys::default(),
    }
}

struct RunHarness {
    store: Arc<FakeStore>,
    gateway: Arc<FakeGateway>,
    memory: Memory,
}

impl RunHarness {
    fn new() -> Self {
        Self {
            store: Arc::new(FakeStore::default()),
            gateway: Arc::new(FakeGateway::default()),
            memory: Memory::default(),
        }
    }

    async fn run(
        &mut self,
        method: Method,
        adapter: Arc<dyn SourceAdapter>,
    ) -> ProcessorResult<storx_backup_providers::RunReport> {
        let deps = deps_with(self.store.clone(), self.gateway.clone());
        let processor = BackupProcessor::with_adapter(method, adapter);
        let mut input = ProcessorInput {
            user_id: "u1",
            login_id: "a@x",
            access_grant: "grant",
            method,
            input_data: &json!({}),
            memory: &mut self.memory,
            filter: None,
            heartbeat: Arc::new(NoopHeartbeat),
            deps: &deps,
        };
        processor.run(&mut input).await
    }
}

#[tokio::test]
async fn first_run_uploads_every_item() {
    let adapter = Arc::new(FakeAdapter::new(vec![
        item("f1", "one.txt"),
        item("f2", "two.txt"),
        item("f3", "three.txt"),
    ]));
    let mut harness = RunHarness::new();
    let report = harness.run(Method::Dropbox, adapter).await.unwrap();

    assert_eq!(report.success_count, 3);
    assert_eq!(report.failed_count, 0);
    assert!(harness.gateway.has("dropbox", "a@x/.file_placeholder"));
    assert!(harness.gateway.has("dropbox", "a@x/f1_one.txt"));
    assert!(harness.gateway.has("dropbox", "a@x/f3_three.txt"));

    let ledger = harness
        .store
        .synced_keys("u1", "dropbox")
        .await
        .unwrap();
    assert!(ledger.contains("a@x/f1_one.txt"));
    assert_eq!(ledger.len(), 3);
}

#[tokio::test]
async fn rerun_with_same_memory_skips_everything() {
    let items = vec![item("f1", "one.txt"), item("f2", "two.txt")];
    let mut harness = RunHarness::new();
    harness
        .run(Method::Dropbox, Arc::new(FakeAdapter::new(items.clone())))
        .await
        .unwrap();
    let memory_after_first = harness.memory.clone();

    let second = Arc::new(FakeAdapter::new(items));
    let report = harness.run(Method::Dropbox, second.clone()).await.unwrap();

    // everything skipped, nothing fetched again, memory stable
    assert_eq!(report.success_count, 2);
    assert_eq!(second.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(harness.memory.tally(), memory_after_first.tally());
}

#[tokio::test]
async fn per_item_failures_accumulate_without_failing_the_run() {
    let adapter = Arc::new(
        FakeAdapter::new(vec![
            item("f1", "one.txt"),
            item("f2", "two.txt"),
            item("f3", "three.txt"),
        ])
        .failing_on(&["f2"]),
    );
    let mut harness = RunHarness::new();
    let report = harness.run(Method::Dropbox, adapter).await.unwrap();

    assert_eq!(report.success_count, 2);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("f2: "));
    assert!(!harness.gateway.has("dropbox", "a@x/f2_two.txt"));
}

#[tokio::test]
async fn run_with_no_successes_is_fatal() {
    let adapter = Arc::new(
        FakeAdapter::new(vec![item("f1", "one.txt"), item("f2", "two.txt")])
            .failing_on(&["f1", "f2"]),
    );
    let mut harness = RunHarness::new();
    let error = harness.run(Method::Dropbox, adapter).await.unwrap_err();
    assert!(error.to_string().contains("all 2 items failed"));
}

#[tokio::test]
async fn upload_failures_are_per_item_errors() {
    let adapter = Arc::new(FakeAdapter::new(vec![item("f1", "one.txt")]));
    let mut harness = RunHarness::new();
    Arc::get_mut(&mut harness.gateway).unwrap().fail_uploads = true;

    let error = harness.run(Method::Dropbox, adapter).await.unwrap_err();
    // single item, so the failed upload escalates to a fatal all-failed run
    assert!(error.to_string().contains("satellite is down"));
    let (_, failed) = harness.memory.tally();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn ledger_write_failure_does_not_fail_the_item() {
    let adapter = Arc::new(FakeAdapter::new(vec![item("f1", "one.txt")]));
    let mut harness = RunHarness::new();
    Arc::get_mut(&mut harness.store).unwrap().fail_writes = true;

    let report = harness.run(Method::Dropbox, adapter).await.unwrap();
    assert_eq!(report.success_count, 1);
    assert!(harness.gateway.has("dropbox", "a@x/f1_one.txt"));
}

#[tokio::test]
async fn mail_items_use_subject_and_id_keys() {
    let adapter = Arc::new(FakeAdapter::new(vec![item("m1", "Invoice: March")]));
    let mut harness = RunHarness::new();
    harness.run(Method::Gmail, adapter).await.unwrap();
    assert!(harness.gateway.has("gmail", "a@x/Invoice_ March_m1.json"));
}

#[tokio::test]
async fn drive_items_carry_a_metadata_sidecar() {
    let adapter = Arc::new(FakeAdapter::new(vec![item("d1", "report.pdf")]));
    let mut harness = RunHarness::new();
    harness.run(Method::GoogleDrive, adapter).await.unwrap();
    assert!(harness.gateway.has("google-drive", "a@x/d1_report.pdf"));
    assert!(harness
        .gateway
        .has("google-drive", "a@x/d1_report.pdf.metadata.json"));
}

#[tokio::test]
async fn cancelled_heartbeat_stops_the_run_promptly() {
    let adapter = Arc::new(FakeAdapter::new(vec![
        item("f1", "one.txt"),
        item("f2", "two.txt"),
        item("f3", "three.txt"),
    ]));
    let store = Arc::new(FakeStore::default());
    let gateway = Arc::new(FakeGateway::default());
    let deps = deps_with(store, gateway);
    let processor = BackupProcessor::with_adapter(Method::Dropbox, adapter);
    let mut memory = Memory::default();
    let mut input = ProcessorInput {
        user_id: "u1",
        login_id: "a@x",
        access_grant: "grant",
        method: Method::Dropbox,
        input_data: &json!({}),
        memory: &mut memory,
        filter: None,
        heartbeat: Arc::new(TrippingHeartbeat {
            beats_left: AtomicUsize::new(2),
        }),
        deps: &deps,
    };
    let error = processor.run(&mut input).await.unwrap_err();
    assert!(matches!(error, ProcessorError::Cancelled(_)));
}

fn scheduled_task(method: Method, ids: &[&str]) -> ScheduledTask {
    ScheduledTask {
        id: 7,
        user_id: "u1".to_string(),
        login_id: "a@x".to_string(),
        method,
        storx_token: "grant".to_string(),
        status: ScheduledTaskStatus::Running,
        input_data: sqlx_json(json!({})),
        memory: sqlx_json_memory(Memory::with_pending(
            ids.iter().map(|s| s.to_string()),
        )),
        start_time: None,
        execution: 0.0,
        success_count: 0,
        failed_count: 0,
        errors: Vec::new(),
        heart_beat: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

fn sqlx_json(value: Value) -> sqlx::types::Json<Value> {
    sqlx::types::Json(value)
}

fn sqlx_json_memory(memory: Memory) -> sqlx::types::Json<Memory> {
    sqlx::types::Json(memory)
}

#[tokio::test]
async fn scheduled_cohort_with_partial_failures_is_partially_completed() {
    let adapter = Arc::new(
        FakeAdapter::new(
            ["i1", "i2", "i3", "i4", "i5"]
                .iter()
                .map(|id| item(id, &format!("{id}.bin")))
                .collect(),
        )
        .failing_on(&["i2", "i4"]),
    );
    let store = Arc::new(FakeStore::default());
    let gateway = Arc::new(FakeGateway::default());
    let deps = deps_with(store.clone(), gateway.clone());
    let task = scheduled_task(Method::Dropbox, &["i1", "i2", "i3", "i4", "i5"]);

    run_scheduled_with(&deps, &task, Arc::new(NoopHeartbeat), adapter, None)
        .await
        .unwrap();

    let progress = store.progress.lock().unwrap();
    let last = progress.last().expect("a final status update");
    assert_eq!(last.status, Some(ScheduledTaskStatus::PartiallyCompleted));
    assert_eq!(last.success_count, Some(3));
    assert_eq!(last.failed_count, Some(2));
    assert!(last.errors.as_ref().unwrap().len() >= 2);
}

#[tokio::test]
async fn scheduled_cohort_deduplicates_ids() {
    let adapter = Arc::new(FakeAdapter::new(vec![item("i1", "i1.bin")]));
    let store = Arc::new(FakeStore::default());
    let gateway = Arc::new(FakeGateway::default());
    let deps = deps_with(store.clone(), gateway.clone());
    let task = scheduled_task(Method::Dropbox, &["i1", "i1", "i1"]);

    run_scheduled_with(&deps, &task, Arc::new(NoopHeartbeat), adapter.clone(), None)
        .await
        .unwrap();

    assert_eq!(adapter.fetches.load(Ordering::SeqCst), 1);
    let progress = store.progress.lock().unwrap();
    let last = progress.last().unwrap();
    assert_eq!(last.status, Some(ScheduledTaskStatus::Completed));
    assert_eq!(last.success_count, Some(1));
}
