//! Download task orchestration — top-level lifecycle for a single download.

use futures::StreamExt;
use std::sync::Arc;
use tokio::time::Instant;

use crate::error::Error;
use crate::throttle::ProgressThrottle;
use crate::transport::ProgressStream;
use crate::types::{DownloadResult, Progress, TaskState};
use crate::utils;

use super::context::{CancelSignal, DownloadTaskContext, WriteOutcome};
use super::finalization::finalize_download;

/// How the transfer phase ended
pub(super) enum Terminal {
    /// The body was fully written and moved into place
    Finished,
    /// The transfer failed
    Failed(Error),
    /// A cancel command aborted the transfer
    Aborted,
    /// A progress write found the task cancelled or removed
    Interrupted,
    /// A newer enqueue replaced the record
    Superseded,
    /// A progress write failed in the store
    StoreFailed(Error),
}

/// Core download task -- drives one enqueued request to a terminal result.
///
/// Phases:
/// 1. Re-read the record; abandon silently if it is gone, cancelled or already executed
/// 2. Start the transfer, racing it against the cancel signal
/// 3. Persist throttled, deduplicated progress
/// 4. Persist the terminal state and emit exactly one result
///
/// `cancel` must have subscribed to the command bus before this is called.
pub(crate) async fn run_download_task(ctx: DownloadTaskContext, mut cancel: CancelSignal) {
    let id = ctx.id.clone();

    // Phase 1: eligibility against the store, never against in-memory assumptions
    let record = match ctx.db.get_optional(&id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::debug!(task_id = %id, "Task no longer exists, skipping");
            return;
        }
        Err(e) => {
            tracing::error!(task_id = %id, error = %e, "Failed to read task before download");
            ctx.emit(DownloadResult::Failure(ctx.request.clone(), Arc::new(e)));
            return;
        }
    };

    if !record.state.can_download() {
        tracing::debug!(task_id = %id, state = %record.state, "Task not downloadable, skipping");
        return;
    }
    // Every admission follows an enqueue; anything past `Enqueued` was already picked up
    if matches!(
        record.state,
        TaskState::Downloading(_) | TaskState::Completed | TaskState::Failed
    ) {
        tracing::debug!(task_id = %id, state = %record.state, attempt = record.attempt, "Attempt already executed, skipping");
        return;
    }

    let attempt = record.attempt;
    let request = record.request;
    let staging = utils::staging_path(&ctx.config.download.temp_dir, &id, attempt);
    tracing::info!(task_id = %id, attempt, url = %request.url, "Download started");

    // Phase 2: start the transfer
    let started = tokio::select! {
        biased;
        _ = cancel.fired() => None,
        result = ctx.transport.fetch(&request, &staging) => Some(result),
    };

    // Phase 3: progress
    let terminal = match started {
        None => Terminal::Aborted,
        Some(Err(e)) => Terminal::Failed(e),
        Some(Ok(progress)) => stream_progress(&ctx, &mut cancel, attempt, progress).await,
    };

    // Phase 4: terminal state and result
    finalize_download(&ctx, &mut cancel, request, attempt, terminal).await;
}

/// Consume transfer progress until it ends, is cancelled, or the store says stop.
///
/// Returning drops `progress`, which aborts the transfer. A value still held back by the
/// throttle is dropped; the terminal state replaces it.
async fn stream_progress(
    ctx: &DownloadTaskContext,
    cancel: &mut CancelSignal,
    attempt: i64,
    mut progress: ProgressStream,
) -> Terminal {
    let mut throttle = ProgressThrottle::new(ctx.config.download.progress_throttle);
    let mut last_written: Option<Progress> = None;

    let terminal = loop {
        let deadline = throttle.deadline();
        let due = tokio::select! {
            biased;
            _ = cancel.fired() => break Terminal::Aborted,
            _ = sleep_until(deadline) => throttle.take_due(Instant::now()),
            item = progress.next() => match item {
                Some(Ok(value)) => throttle.offer(value, Instant::now()),
                Some(Err(e)) => break Terminal::Failed(e),
                None => break Terminal::Finished,
            },
        };

        let Some(value) = due else { continue };
        if last_written == Some(value) {
            continue;
        }
        match ctx.write(attempt, TaskState::Downloading(value)).await {
            WriteOutcome::Applied => last_written = Some(value),
            WriteOutcome::Interrupted => break Terminal::Interrupted,
            WriteOutcome::Superseded => break Terminal::Superseded,
            WriteOutcome::Failed(e) => break Terminal::StoreFailed(e),
        }
    };

    if let Some(dropped) = throttle.discard_pending() {
        tracing::debug!(
            task_id = %ctx.id,
            bytes_written = dropped.bytes_written,
            total_bytes = dropped.total_bytes,
            "Pending progress dropped at termination"
        );
    }
    terminal
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
