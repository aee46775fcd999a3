use std::sync::Arc;

use async_trait::async_trait;
use storx_backup_lib::{
    consts::FAN_OUT_LIMIT,
    path::{item_object_key, mail_object_key},
    ItemState, Method, ProcessorError, ProcessorResult,
};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, info};

use crate::{
    adapter::{SourceAdapter, SourceItem},
    connect_adapter,
    processor::{
        upload_object_and_sync, BaseProcessor, Processor, ProcessorDeps, ProcessorInput,
        RunReport,
    },
};

const PAGE_SIZE: usize = 100;

/// How a method's items map to destination keys and extra artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackupFlavor {
    /// Mail message: key from sanitized subject + message id, body JSON.
    Mail,
    /// Drive file: key from id + name, plus a `.metadata.json` sidecar.
    Drive,
    /// Any other itemized source: key from id + name.
    Items,
}

/// The processor behind every adapter-backed method. Walks the source
/// page by page, skips what the destination already holds, and fans out
/// fetch+upload over a bounded set of workers.
pub struct BackupProcessor {
    flavor: BackupFlavor,
    adapter: Option<Arc<dyn SourceAdapter>>,
}

impl BackupProcessor {
    pub fn for_method(method: Method) -> Self {
        let flavor = match method {
            Method::Gmail | Method::Outlook => BackupFlavor::Mail,
            Method::GoogleDrive => BackupFlavor::Drive,
            _ => BackupFlavor::Items,
        };
        Self {
            flavor,
            adapter: None,
        }
    }

    /// Bring-your-own client: skip the credential exchange and run against
    /// an already-authenticated adapter.
    pub fn with_adapter(method: Method, adapter: Arc<dyn SourceAdapter>) -> Self {
        let mut processor = Self::for_method(method);
        processor.adapter = Some(adapter);
        processor
    }

    fn object_key(&self, login_id: &str, item: &SourceItem) -> String {
        match self.flavor {
            BackupFlavor::Mail => mail_object_key(login_id, &item.name, &item.id),
            BackupFlavor::Drive | BackupFlavor::Items => {
                item_object_key(login_id, &item.id, &item.name)
            }
        }
    }
}

#[async_trait]
impl Processor for BackupProcessor {
    async fn run(&self, input: &mut ProcessorInput<'_>) -> ProcessorResult<RunReport> {
        let heartbeat = input.heartbeat.clone();
        heartbeat.beat().await?;

        let adapter = match &self.adapter {
            Some(adapter) => adapter.clone(),
            None => connect_adapter(input.method, &input.deps.keys, input.input_data).await?,
        };
        let mut base = BaseProcessor::prepare(input).await?;
        let settled = input.memory.settled();
        let with_sidecar = self.flavor == BackupFlavor::Drive;

        let semaphore = Arc::new(Semaphore::new(FAN_OUT_LIMIT));
        let mut page_token: Option<String> = None;
        loop {
            heartbeat.beat().await?;
            let page = adapter
                .enumerate(page_token.as_deref(), input.filter.as_deref(), PAGE_SIZE)
                .await?;
            debug!(items = page.items.len(), "page enumerated");

            let mut in_flight: JoinSet<(String, Result<(), String>)> = JoinSet::new();
            for item in page.items {
                heartbeat.beat().await?;
                let key = self.object_key(input.login_id, &item);
                if settled.contains(&item.id) || base.already_synced(&key) {
                    input.memory.mark(&item.id, ItemState::Skipped);
                    base.record_success();
                    continue;
                }

                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| ProcessorError::Internal(e.to_string()))?;
                let adapter = adapter.clone();
                let deps = input.deps.clone();
                let user_id = input.user_id.to_string();
                let access_grant = input.access_grant.to_string();
                let bucket = base.bucket();
                in_flight.spawn(async move {
                    let _permit = permit;
                    let outcome = fetch_and_upload(
                        &deps,
                        adapter,
                        &user_id,
                        &access_grant,
                        bucket,
                        &key,
                        &item,
                        with_sidecar,
                    )
                    .await;
                    (item.id, outcome)
                });
            }

            while let Some(joined) = in_flight.join_next().await {
                let (item_id, outcome) = joined
                    .map_err(|e| ProcessorError::Internal(format!("worker panicked: {e}")))?;
                match outcome {
                    Ok(()) => {
                        input.memory.mark(&item_id, ItemState::Synced);
                        base.record_success();
                    }
                    Err(error) => {
                        input.memory.mark(&item_id, ItemState::Error);
                        base.record_failure(&item_id, error);
                    }
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        let report = base.into_report();
        info!(
            success = report.success_count,
            failed = report.failed_count,
            "backup run finished"
        );
        if report.success_count == 0 && report.failed_count > 0 {
            return Err(ProcessorError::Internal(format!(
                "all {} items failed, first error: {}",
                report.failed_count,
                report.errors.first().map(String::as_str).unwrap_or("?")
            )));
        }
        Ok(report)
    }
}

/// One item's journey: fetch from the source, upload content (and the
/// Drive metadata sidecar), record it in the ledger. Errors come back as
/// strings so they land in the run's failure slice rather than killing
/// the task.
#[allow(clippy::too_many_arguments)]
async fn fetch_and_upload(
    deps: &ProcessorDeps,
    adapter: Arc<dyn SourceAdapter>,
    user_id: &str,
    access_grant: &str,
    bucket: &'static str,
    key: &str,
    item: &SourceItem,
    with_sidecar: bool,
) -> Result<(), String> {
    let fetched = adapter.fetch(&item.id).await.map_err(|e| e.to_string())?;
    upload_object_and_sync(deps, user_id, access_grant, bucket, key, fetched.bytes)
        .await
        .map_err(|e| e.to_string())?;

    if with_sidecar {
        let sidecar = serde_json::to_vec_pretty(&item.meta).map_err(|e| e.to_string())?;
        upload_object_and_sync(
            deps,
            user_id,
            access_grant,
            bucket,
            &format!("{key}.metadata.json"),
            sidecar,
        )
        .await
        .map_err(|e| e.to_string())?;
    }
    Ok(())
}
