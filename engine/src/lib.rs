mod dispatcher;
mod heartbeat;
mod mailer;
mod reaper;
mod reconciler;
mod scheduler;

use std::sync::Arc;

use storx_backup_providers::ProcessorDeps;
use storx_backup_satellite::ObjectStore;
use storx_backup_store::Store;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use heartbeat::{ScheduledTaskHeartbeat, TaskHeartbeat};
pub use mailer::{Mailer, MailerConfig};
pub use reconciler::drain_webhook_events;

/// The background half of the service: scheduler tick, dispatch workers,
/// the scheduled-task worker, the reaper and the webhook reconciler, all
/// tied to one cancellation token.
pub struct Engine {
    store: Store,
    deps: ProcessorDeps,
    mailer: Option<Arc<Mailer>>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        store: Store,
        gateway: Arc<dyn ObjectStore>,
        keys: storx_backup_providers::ProviderKeys,
        mailer: Option<Mailer>,
    ) -> Self {
        let deps = ProcessorDeps {
            store: Arc::new(store.clone()),
            gateway,
            keys,
        };
        Self {
            store,
            deps,
            mailer: mailer.map(Arc::new),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn every loop. `workers` defaults to the core count when zero.
    pub fn start(&self, workers: usize) -> Vec<JoinHandle<()>> {
        let workers = if workers == 0 { num_cpus::get() } else { workers };
        info!(workers, "engine starting");

        let mut handles = Vec::with_capacity(workers + 4);
        handles.push(tokio::spawn(scheduler::scheduler_loop(
            self.store.clone(),
            self.cancel.clone(),
        )));
        for worker in 0..workers {
            handles.push(tokio::spawn(dispatcher::dispatch_worker(
                self.store.clone(),
                self.deps.clone(),
                self.mailer.clone(),
                self.cancel.clone(),
                worker,
            )));
        }
        handles.push(tokio::spawn(dispatcher::scheduled_worker(
            self.store.clone(),
            self.deps.clone(),
            self.cancel.clone(),
        )));
        handles.push(tokio::spawn(reaper::reaper_loop(
            self.store.clone(),
            self.cancel.clone(),
        )));
        handles.push(tokio::spawn(reconciler::reconciler_loop(
            self.store.clone(),
            self.cancel.clone(),
        )));
        handles
    }

    /// Signal every loop to wind down after its current unit of work.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
