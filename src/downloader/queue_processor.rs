//! Queue processor — admits enqueued requests in arrival order under the concurrency cap.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::Downloader;
use super::download_task::{CancelSignal, DownloadTaskContext};
use crate::types::{Command, DownloadRequest, TaskId};

impl Downloader {
    /// Start the queue processor task
    ///
    /// This method spawns a background task that continuously:
    /// 1. Receives the next `Enqueue` command in publish order
    /// 2. Acquires a permit from the concurrency limiter (respects max_concurrent_downloads)
    /// 3. Spawns a download task for that request
    /// 4. Repeats until shutdown
    ///
    /// Commands published before the processor starts are kept and admitted once it runs.
    ///
    /// # Single-flight admission
    ///
    /// At most one execution runs per identifier. An `Enqueue` for an identifier that is
    /// already executing is not admitted again; instead the running slot re-reads the
    /// record once its current execution ends and runs the newer attempt if it is still
    /// enqueued.
    ///
    /// Only the first call starts a processor; later calls return a finished handle.
    pub fn start_queue_processor(&self) -> tokio::task::JoinHandle<()> {
        let rx = match self.queue_state.commands.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(mut rx) = rx else {
            tracing::warn!("Queue processor already started");
            return tokio::spawn(async {});
        };

        let downloader = self.clone();
        let token = self.queue_state.dispatcher_token.clone();

        tokio::spawn(async move {
            tracing::info!("Queue processor started");
            loop {
                let command = tokio::select! {
                    _ = token.cancelled() => break,
                    command = rx.recv() => command,
                };

                match command {
                    Some(Command::Enqueue(request)) => {
                        if !downloader.admit(request, &token).await {
                            break;
                        }
                    }
                    // Cancellation is handled by each pipeline's own subscription
                    Some(Command::Cancel(_)) | Some(Command::CancelAll) => {}
                    None => break,
                }
            }
            tracing::info!("Queue processor stopped");
        })
    }

    /// Admit one request, waiting for a free slot. Returns false when the processor must stop.
    async fn admit(&self, request: DownloadRequest, token: &CancellationToken) -> bool {
        let id = request.id.clone();

        {
            let mut active = self.queue_state.active_downloads.lock().await;
            if let Some(rerun) = active.get_mut(&id) {
                tracing::debug!(task_id = %id, "Task already executing, scheduling rerun");
                *rerun = true;
                return true;
            }
        }

        let permit = tokio::select! {
            _ = token.cancelled() => return false,
            permit = self.queue_state.concurrent_limit.clone().acquire_owned() => permit,
        };
        let Ok(permit) = permit else {
            tracing::warn!("Concurrency limiter closed, stopping queue processor");
            return false;
        };

        // Re-check: the slot wait may have raced a previous execution of this id
        {
            let mut active = self.queue_state.active_downloads.lock().await;
            if let Some(rerun) = active.get_mut(&id) {
                *rerun = true;
                return true;
            }
            active.insert(id.clone(), false);
        }

        let downloader = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            loop {
                // Subscribe before the pipeline reads the record
                let cancel = CancelSignal::new(id.clone(), downloader.bus.subscribe());
                let ctx = downloader.task_context(request.clone());
                super::download_task::run_download_task(ctx, cancel).await;

                if !take_rerun(&downloader.queue_state.active_downloads, &id).await {
                    break;
                }
                tracing::debug!(task_id = %id, "Re-running task after newer enqueue");
            }
        });

        true
    }

    pub(crate) fn task_context(&self, request: DownloadRequest) -> DownloadTaskContext {
        DownloadTaskContext {
            id: request.id.clone(),
            request,
            db: Arc::clone(&self.db),
            transport: Arc::clone(&self.transport),
            result_tx: self.result_tx.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

/// Clear a pending rerun for `id`, or release its slot if none is pending
async fn take_rerun(active: &Mutex<HashMap<TaskId, bool>>, id: &TaskId) -> bool {
    let mut active = active.lock().await;
    match active.get_mut(id) {
        Some(rerun) if *rerun => {
            *rerun = false;
            true
        }
        _ => {
            active.remove(id);
            false
        }
    }
}
