use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use storx_backup_lib::{consts::MAX_RETRY_COUNT, Memory, ProcessorError, ProcessorResult};
use storx_backup_providers::{
    processor_for, run_scheduled_task, ProcessorDeps, ProcessorInput, RunReport,
};
use storx_backup_store::{
    Job, JobStatus, JobUpdate, MessageStatus, ScheduledTaskStatus, ScheduledTaskUpdate, Store,
    Task, TaskStatus, TaskUpdate,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    heartbeat::{ScheduledTaskHeartbeat, TaskHeartbeat},
    mailer::Mailer,
};

const IDLE_POLL: Duration = Duration::from_secs(2);

/// One dispatch worker: claim, run, persist the terminal state, repeat.
/// Runs until cancelled; an empty queue backs off for a couple of seconds.
pub(crate) async fn dispatch_worker(
    store: Store,
    deps: ProcessorDeps,
    mailer: Option<Arc<Mailer>>,
    cancel: CancellationToken,
    worker: usize,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match store.claim_next_task().await {
            Ok(Some(task)) => {
                info!(worker, task_id = task.id, "task claimed");
                run_task(&store, &deps, mailer.as_deref(), task).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                }
            }
            Err(e) => {
                error!(worker, "claim failed: {e:?}");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                }
            }
        }
    }
    info!(worker, "dispatch worker stopped");
}

/// Execute one claimed task end to end and persist the outcome on both the
/// task and its job. Panics inside the processor are recovered here and
/// surfaced as "internal error".
async fn run_task(store: &Store, deps: &ProcessorDeps, mailer: Option<&Mailer>, task: Task) {
    let started = Instant::now();
    let job = match store.job_by_id(task.cron_job_id).await {
        Ok(job) => job,
        Err(e) => {
            warn!(task_id = task.id, "job vanished under running task: {e:?}");
            let _ = store
                .update_task(
                    task.id,
                    TaskUpdate {
                        status: Some(TaskStatus::Failed),
                        message: Some("job no longer exists".to_string()),
                        execution: Some(started.elapsed().as_secs_f64()),
                    },
                )
                .await;
            return;
        }
    };

    let (outcome, memory) = execute(store.clone(), deps.clone(), &job, task.id).await;

    // the memory survives the run regardless of how it ended
    let mut job_update = JobUpdate {
        task_memory: Some(memory),
        ..Default::default()
    };

    match outcome {
        Ok(report) => {
            let _ = store
                .update_task(
                    task.id,
                    TaskUpdate {
                        status: Some(TaskStatus::Success),
                        message: Some("backup completed".to_string()),
                        execution: Some(started.elapsed().as_secs_f64()),
                    },
                )
                .await;
            job_update.status = Some(JobStatus::Success);
            job_update.message = Some("backup completed".to_string());
            job_update.message_status = Some(MessageStatus::Info);
            job_update.last_run = Some(Utc::now().date_naive());
            if let Err(e) = store.update_job(job.id, job_update).await {
                error!(job_id = job.id, "failed to persist job success: {e:?}");
            }
            info!(
                task_id = task.id,
                job_id = job.id,
                success = report.success_count,
                failed = report.failed_count,
                "task succeeded"
            );
        }
        Err(e) => {
            let failed = store
                .update_task(
                    task.id,
                    TaskUpdate {
                        status: Some(TaskStatus::Failed),
                        message: Some(e.to_string()),
                        execution: Some(started.elapsed().as_secs_f64()),
                    },
                )
                .await;
            let out_of_retries = failed
                .as_ref()
                .map(|t| t.retry_count >= MAX_RETRY_COUNT)
                .unwrap_or(true);
            // a retryable failure surfaces on the job only once the retry
            // budget is spent; auth failures surface right away
            if !e.is_retryable() || out_of_retries {
                job_update.status = Some(JobStatus::Failed);
                job_update.message = Some(e.to_string());
                job_update.message_status = Some(MessageStatus::Error);
            }
            if let Err(err) = store.update_job(job.id, job_update).await {
                error!(job_id = job.id, "failed to persist job failure: {err:?}");
            }
            if matches!(e, ProcessorError::AuthExpired) {
                if let Some(mailer) = mailer {
                    mailer.send_token_expired(&job.login_id, &job.name).await;
                }
                warn!(task_id = task.id, job_id = job.id, "source token expired");
            } else {
                warn!(task_id = task.id, job_id = job.id, "task failed: {e}");
            }
        }
    }
}

/// Run the method's processor inside its own tokio task so a panic is
/// contained and reported instead of taking the worker down.
async fn execute(
    store: Store,
    deps: ProcessorDeps,
    job: &Job,
    task_id: i64,
) -> (ProcessorResult<RunReport>, Memory) {
    let job = job.clone();
    let handle = tokio::spawn(async move {
        let heartbeat = Arc::new(TaskHeartbeat::new(store, task_id));
        let mut memory = job
            .task_memory
            .as_ref()
            .map(|m| m.0.clone())
            .unwrap_or_default();
        let processor = processor_for(job.method);
        let mut input = ProcessorInput {
            user_id: &job.user_id,
            login_id: &job.login_id,
            access_grant: &job.storx_token,
            method: job.method,
            input_data: &job.input_data.0,
            memory: &mut memory,
            filter: None,
            heartbeat,
            deps: &deps,
        };
        let result = processor.run(&mut input).await;
        (result, memory)
    });

    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            error!(task_id, "processor panicked: {e:?}");
            (
                Err(ProcessorError::Internal("internal error".to_string())),
                Memory::default(),
            )
        }
        Err(e) => (
            Err(ProcessorError::Internal(format!("join error: {e}"))),
            Memory::default(),
        ),
    }
}

/// The scheduled-task counterpart of [`dispatch_worker`].
pub(crate) async fn scheduled_worker(
    store: Store,
    deps: ProcessorDeps,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match store.claim_next_scheduled_task().await {
            Ok(Some(task)) => {
                info!(task_id = task.id, method = %task.method, "scheduled task claimed");
                let heartbeat = Arc::new(ScheduledTaskHeartbeat::new(store.clone(), task.id));
                let deps_ = deps.clone();
                let task_id = task.id;
                let handle =
                    tokio::spawn(
                        async move { run_scheduled_task(&deps_, &task, heartbeat).await },
                    );
                let outcome = match handle.await {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => {
                        Err(ProcessorError::Internal("internal error".to_string()))
                    }
                    Err(e) => Err(ProcessorError::Internal(format!("join error: {e}"))),
                };
                if let Err(e) = outcome {
                    warn!(task_id, "scheduled task failed: {e}");
                    let _ = store
                        .update_scheduled_task(
                            task_id,
                            ScheduledTaskUpdate {
                                status: Some(ScheduledTaskStatus::Failed),
                                ..Default::default()
                            },
                        )
                        .await;
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                }
            }
            Err(e) => {
                error!("scheduled claim failed: {e:?}");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                }
            }
        }
    }
    info!("scheduled worker stopped");
}
