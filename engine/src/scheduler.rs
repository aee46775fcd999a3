use chrono::Utc;
use storx_backup_lib::consts::{SCHEDULER_BATCH, SCHEDULER_TICK};
use storx_backup_store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The periodic tick: every 30 seconds, enqueue a task for each due job.
/// All eligibility logic lives in the store's single transactional query;
/// this loop only supplies the clock.
pub(crate) async fn scheduler_loop(store: Store, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(SCHEDULER_TICK) => {
                let today = Utc::now().date_naive();
                match store.enqueue_due_jobs(today, SCHEDULER_BATCH).await {
                    Ok(enqueued) if !enqueued.is_empty() => {
                        info!(jobs = ?enqueued, "scheduler enqueued due jobs");
                    }
                    Ok(_) => {}
                    Err(e) => error!("scheduler tick failed: {e:?}"),
                }
            }
        }
    }
    info!("scheduler stopped");
}
