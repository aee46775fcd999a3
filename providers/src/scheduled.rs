use std::collections::HashMap;
use std::sync::Arc;

use storx_backup_lib::{
    memory::terminal_status,
    path::{album_object_key, item_object_key, mail_object_key, placeholder_key},
    ItemState, Memory, Method, ProcessorError, ProcessorResult,
};
use storx_backup_store::{ScheduledTask, ScheduledTaskStatus, ScheduledTaskUpdate};
use tracing::{debug, info, warn};

use crate::{
    adapter::FetchedItem,
    connect_adapter,
    google::{gmail::subject_of, photos::PhotosAdapter},
    processor::{upload_object_and_sync, Heartbeat, ProcessorDeps},
};

/// Executes one claimed scheduled task: drain the pending cohort, expand
/// photo albums into their children, upload everything that is not
/// already in the destination, and derive the terminal status from the
/// memory tally. Progress is written back after every item so a crashed
/// run resumes mid-cohort.
pub async fn run_scheduled_task(
    deps: &ProcessorDeps,
    task: &ScheduledTask,
    heartbeat: Arc<dyn Heartbeat>,
) -> ProcessorResult<()> {
    let adapter = connect_adapter(task.method, &deps.keys, &task.input_data.0).await?;
    // album expansion needs the concrete photos client
    let photos = match task.method {
        Method::GooglePhotos => {
            Some(PhotosAdapter::connect(&deps.keys.google, &task.input_data.0).await?)
        }
        _ => None,
    };
    run_scheduled_with(deps, task, heartbeat, adapter, photos).await
}

/// The cohort loop itself, with the authenticated clients supplied by the
/// caller.
pub async fn run_scheduled_with(
    deps: &ProcessorDeps,
    task: &ScheduledTask,
    heartbeat: Arc<dyn Heartbeat>,
    adapter: Arc<dyn crate::adapter::SourceAdapter>,
    photos: Option<PhotosAdapter>,
) -> ProcessorResult<()> {
    let started = std::time::Instant::now();
    heartbeat.beat().await?;

    let bucket = task.method.bucket();
    deps.gateway
        .upload(
            &task.storx_token,
            bucket,
            &placeholder_key(&task.login_id),
            Vec::new(),
        )
        .await
        .map_err(|e| ProcessorError::Storage(format!("placeholder: {e}")))?;

    let synced = deps.store.synced_keys(&task.user_id, bucket).await?;

    let mut memory: Memory = task.memory.0.clone();
    let mut errors = task.errors.clone();
    let mut album_of: HashMap<String, (String, String)> = HashMap::new();

    while let Some(id) = memory.pop_pending() {
        heartbeat.beat().await?;

        // a pending id may name an album; its children join the queue
        if let Some(photos) = &photos {
            if !album_of.contains_key(&id) {
                if let Some(album) = photos.album(&id).await? {
                    let children = photos.album_media_ids(&album.id).await?;
                    debug!(album = %album.title, children = children.len(), "album expanded");
                    for child in children {
                        album_of.insert(child.clone(), (album.id.clone(), album.title.clone()));
                        memory.push_pending(child);
                    }
                    persist_progress(deps, task, &memory, &errors).await;
                    continue;
                }
            }
        }

        match adapter.fetch(&id).await {
            Ok(fetched) => {
                let name = display_name(task.method, &id, &fetched);
                let key = match album_of.get(&id) {
                    Some((album_id, album_title)) => {
                        album_object_key(&task.login_id, album_id, album_title, &id, &name)
                    }
                    None => match task.method {
                        Method::Gmail | Method::Outlook => {
                            mail_object_key(&task.login_id, &name, &id)
                        }
                        _ => item_object_key(&task.login_id, &id, &name),
                    },
                };
                if synced.contains(&key) {
                    memory.mark(&id, ItemState::Skipped);
                } else {
                    match upload_object_and_sync(
                        deps,
                        &task.user_id,
                        &task.storx_token,
                        bucket,
                        &key,
                        fetched.bytes,
                    )
                    .await
                    {
                        Ok(()) => memory.mark(&id, ItemState::Synced),
                        Err(e) => {
                            errors.push(format!("{id}: {e}"));
                            memory.mark(&id, ItemState::Error);
                        }
                    }
                }
            }
            Err(ProcessorError::AuthExpired) => return Err(ProcessorError::AuthExpired),
            Err(e) => {
                errors.push(format!("{id}: {e}"));
                memory.mark(&id, ItemState::Error);
            }
        }
        persist_progress(deps, task, &memory, &errors).await;
    }

    let (success, failed) = memory.tally();
    let status = match terminal_status(success, failed) {
        "completed" => ScheduledTaskStatus::Completed,
        "failed" => ScheduledTaskStatus::Failed,
        _ => ScheduledTaskStatus::PartiallyCompleted,
    };
    deps.store
        .save_scheduled_progress(
            task.id,
            ScheduledTaskUpdate {
                status: Some(status),
                memory: Some(memory),
                execution: Some(started.elapsed().as_secs_f64()),
                success_count: Some(success as i32),
                failed_count: Some(failed as i32),
                errors: Some(errors),
            },
        )
        .await?;
    info!(task_id = task.id, success, failed, ?status, "scheduled task finished");
    Ok(())
}

/// Mid-run snapshot; failures only warn, the next snapshot will catch up.
async fn persist_progress(
    deps: &ProcessorDeps,
    task: &ScheduledTask,
    memory: &Memory,
    errors: &[String],
) {
    let (success, failed) = memory.tally();
    let update = ScheduledTaskUpdate {
        memory: Some(memory.clone()),
        success_count: Some(success as i32),
        failed_count: Some(failed as i32),
        errors: Some(errors.to_vec()),
        ..Default::default()
    };
    if let Err(e) = deps.store.save_scheduled_progress(task.id, update).await {
        warn!(task_id = task.id, error = %e, "progress snapshot failed");
    }
}

fn display_name(method: Method, id: &str, fetched: &FetchedItem) -> String {
    match method {
        Method::Gmail => subject_of(&fetched.meta),
        Method::Outlook => fetched.meta["subject"].as_str().unwrap_or("").to_string(),
        Method::GooglePhotos => fetched.meta["filename"].as_str().unwrap_or("media").to_string(),
        Method::GoogleDrive => fetched.meta["name"].as_str().unwrap_or("file").to_string(),
        _ => id.rsplit('/').next().unwrap_or(id).to_string(),
    }
}
