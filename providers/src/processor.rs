use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use storx_backup_lib::{
    method::source_and_type,
    path::placeholder_key,
    Memory, Method, ProcessorError, ProcessorResult,
};
use storx_backup_satellite::ObjectStore;
use storx_backup_store::{ScheduledTaskUpdate, Store};
use tracing::{debug, warn};

use crate::config::ProviderKeys;

/// The slice of the store processors actually touch, behind a trait so
/// runs can be exercised against an in-memory fake.
#[async_trait]
pub trait ProcessorStore: Send + Sync {
    /// All object keys the ledger holds for this user and bucket.
    async fn synced_keys(&self, user_id: &str, bucket: &str) -> ProcessorResult<HashSet<String>>;

    /// Record one uploaded object in the ledger.
    async fn record_synced(
        &self,
        user_id: &str,
        bucket: &str,
        key: &str,
        source: &str,
        object_type: &str,
    ) -> ProcessorResult<()>;

    /// Write back a scheduled task's progress snapshot.
    async fn save_scheduled_progress(
        &self,
        id: i64,
        update: ScheduledTaskUpdate,
    ) -> ProcessorResult<()>;
}

#[async_trait]
impl ProcessorStore for Store {
    async fn synced_keys(&self, user_id: &str, bucket: &str) -> ProcessorResult<HashSet<String>> {
        let rows = self
            .synced_objects_by_user_bucket(user_id, bucket, None, None)
            .await
            .map_err(|e| ProcessorError::DestinationList(e.to_string()))?;
        Ok(rows.into_iter().map(|row| row.object_key).collect())
    }

    async fn record_synced(
        &self,
        user_id: &str,
        bucket: &str,
        key: &str,
        source: &str,
        object_type: &str,
    ) -> ProcessorResult<()> {
        self.create_synced_object(user_id, bucket, key, source, object_type)
            .await
            .map(|_| ())
            .map_err(|e| ProcessorError::Internal(e.to_string()))
    }

    async fn save_scheduled_progress(
        &self,
        id: i64,
        update: ScheduledTaskUpdate,
    ) -> ProcessorResult<()> {
        self.update_scheduled_task(id, update)
            .await
            .map(|_| ())
            .map_err(|e| ProcessorError::Internal(e.to_string()))
    }
}

/// Cancellation checkpoint injected by the dispatcher. Reloads the task
/// row, fails when the task is no longer running, and refreshes the
/// liveness timestamp otherwise. Processors call it before every unit of
/// work.
#[async_trait]
pub trait Heartbeat: Send + Sync {
    async fn beat(&self) -> ProcessorResult<()>;
}

/// A heartbeat that never cancels; test and restore flows.
pub struct NoopHeartbeat;

#[async_trait]
impl Heartbeat for NoopHeartbeat {
    async fn beat(&self) -> ProcessorResult<()> {
        Ok(())
    }
}

/// Shared collaborators handed to every processor run.
#[derive(Clone)]
pub struct ProcessorDeps {
    pub store: Arc<dyn ProcessorStore>,
    pub gateway: Arc<dyn ObjectStore>,
    pub keys: ProviderKeys,
}

/// Everything one run needs: the job's credentials, its resumable memory,
/// and the injected heartbeat.
pub struct ProcessorInput<'a> {
    pub user_id: &'a str,
    pub login_id: &'a str,
    pub access_grant: &'a str,
    pub method: Method,
    pub input_data: &'a Value,
    pub memory: &'a mut Memory,
    pub filter: Option<String>,
    pub heartbeat: Arc<dyn Heartbeat>,
    pub deps: &'a ProcessorDeps,
}

/// One backup method's execution engine. `run` returns `Ok` when the run
/// as a whole held up, even if individual items failed; those accumulate
/// in the memory and the error slice.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn run(&self, input: &mut ProcessorInput<'_>) -> ProcessorResult<RunReport>;
}

/// What a finished run reports back to the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub success_count: u32,
    pub failed_count: u32,
    pub errors: Vec<String>,
}

/// Upload an object and record it in the sync ledger. The ledger write is
/// best-effort: once the bytes are in the satellite a later listing or
/// reconciliation can repair a missing row, so only the upload itself is
/// fatal.
pub async fn upload_object_and_sync(
    deps: &ProcessorDeps,
    user_id: &str,
    access_grant: &str,
    bucket: &str,
    key: &str,
    bytes: Vec<u8>,
) -> ProcessorResult<()> {
    deps.gateway
        .upload(access_grant, bucket, key, bytes)
        .await
        .map_err(|e| ProcessorError::Storage(e.to_string()))?;

    let (source, object_type) = source_and_type(bucket);
    if let Err(e) = deps
        .store
        .record_synced(user_id, bucket, key, &source, &object_type)
        .await
    {
        warn!(bucket, key, error = %e, "object uploaded but ledger write failed");
    }
    Ok(())
}

/// The shared run scaffolding: placeholder upload, synced-set loading and
/// failure accounting. Concrete processors start by calling
/// [`BaseProcessor::prepare`] and funnel every item through it.
pub struct BaseProcessor<'a> {
    deps: &'a ProcessorDeps,
    user_id: String,
    access_grant: String,
    bucket: &'static str,
    synced: HashSet<String>,
    pub errors: Vec<String>,
    pub success_count: u32,
    pub failed_count: u32,
}

impl<'a> BaseProcessor<'a> {
    /// Drop the `.file_placeholder` marker under the user's prefix and
    /// load the set of already-synced keys: from the ledger when it has
    /// rows, else from a live listing of the destination.
    pub async fn prepare(
        input: &ProcessorInput<'a>,
    ) -> ProcessorResult<BaseProcessor<'a>> {
        let bucket = input.method.bucket();
        let deps = input.deps;

        deps.gateway
            .upload(
                input.access_grant,
                bucket,
                &placeholder_key(input.login_id),
                Vec::new(),
            )
            .await
            .map_err(|e| ProcessorError::Storage(format!("placeholder: {e}")))?;

        let ledger = deps.store.synced_keys(input.user_id, bucket).await?;
        let synced: HashSet<String> = if ledger.is_empty() {
            deps.gateway
                .list(input.access_grant, bucket, &format!("{}/", input.login_id))
                .await
                .map_err(|e| ProcessorError::DestinationList(e.to_string()))?
        } else {
            ledger
        };
        debug!(bucket, known = synced.len(), "synced set loaded");

        Ok(BaseProcessor {
            deps,
            user_id: input.user_id.to_string(),
            access_grant: input.access_grant.to_string(),
            bucket,
            synced,
            errors: Vec::new(),
            success_count: 0,
            failed_count: 0,
        })
    }

    pub fn bucket(&self) -> &'static str {
        self.bucket
    }

    /// Whether the destination already holds this key; skipped items count
    /// as successes.
    pub fn already_synced(&self, key: &str) -> bool {
        self.synced.contains(key)
    }

    /// Item-level upload. Failures are returned as plain strings for the
    /// `"{item id}: {error}"` accumulation contract instead of aborting
    /// the run.
    pub async fn upload_item(&self, key: &str, bytes: Vec<u8>) -> Result<(), String> {
        upload_object_and_sync(
            self.deps,
            &self.user_id,
            &self.access_grant,
            self.bucket,
            key,
            bytes,
        )
        .await
        .map_err(|e| e.to_string())
    }

    pub fn record_success(&mut self) {
        self.success_count += 1;
    }

    pub fn record_failure(&mut self, item_id: &str, error: impl std::fmt::Display) {
        self.failed_count += 1;
        self.errors.push(format!("{item_id}: {error}"));
    }

    pub fn into_report(self) -> RunReport {
        RunReport {
            success_count: self.success_count,
            failed_count: self.failed_count,
            errors: self.errors,
        }
    }
}
