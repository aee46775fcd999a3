use storx_backup_lib::consts::REAPER_INTERVAL;
use storx_backup_store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Sweeps for running tasks whose heartbeat went silent and fails them so
/// their slot frees up and the claim loop can retry them.
pub(crate) async fn reaper_loop(store: Store, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(REAPER_INTERVAL) => {
                match store.reap_stuck_tasks().await {
                    Ok(0) => {}
                    Ok(reaped) => info!(reaped, "stuck tasks reaped"),
                    Err(e) => error!("task reap failed: {e:?}"),
                }
                match store.reap_stuck_scheduled_tasks().await {
                    Ok(0) => {}
                    Ok(reaped) => info!(reaped, "stuck scheduled tasks reaped"),
                    Err(e) => error!("scheduled reap failed: {e:?}"),
                }
            }
        }
    }
    info!("reaper stopped");
}
