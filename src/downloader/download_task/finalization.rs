//! Download finalization — persist the terminal state and emit the result.

use std::sync::Arc;

use crate::types::{DownloadRequest, DownloadResult, TaskState};

use super::context::{CancelSignal, DownloadTaskContext, WriteOutcome};
use super::orchestration::Terminal;

/// Settle a finished transfer phase.
///
/// The result follows what the store accepted: a natural finish that loses the race
/// against a cancel reports `Cancelled`, and an execution superseded before any cancel
/// reached it reports nothing.
pub(super) async fn finalize_download(
    ctx: &DownloadTaskContext,
    cancel: &mut CancelSignal,
    request: DownloadRequest,
    attempt: i64,
    terminal: Terminal,
) {
    let id = &ctx.id;
    let cancelled = DownloadResult::Cancelled(request.clone());

    let result = match terminal {
        Terminal::Finished => match ctx.write(attempt, TaskState::Completed).await {
            WriteOutcome::Applied => {
                tracing::info!(task_id = %id, destination = %request.destination.display(), "Download complete");
                Some(DownloadResult::Success(request))
            }
            WriteOutcome::Interrupted => Some(DownloadResult::Cancelled(request)),
            WriteOutcome::Superseded => None,
            WriteOutcome::Failed(e) => {
                tracing::error!(task_id = %id, error = %e, "Failed to record completed download");
                ctx.mark_failed(attempt).await;
                Some(DownloadResult::Failure(request, Arc::new(e)))
            }
        },

        Terminal::Failed(error) => match ctx.write(attempt, TaskState::Failed).await {
            WriteOutcome::Applied => {
                tracing::error!(task_id = %id, error = %error, "Download failed");
                Some(DownloadResult::Failure(request, Arc::new(error)))
            }
            WriteOutcome::Interrupted => Some(DownloadResult::Cancelled(request)),
            WriteOutcome::Superseded => None,
            WriteOutcome::Failed(store_error) => {
                tracing::error!(
                    task_id = %id,
                    error = %error,
                    store_error = %store_error,
                    "Download failed and the failure could not be recorded"
                );
                Some(DownloadResult::Failure(request, Arc::new(error)))
            }
        },

        // The canceller normally wrote `Cancelled` already; this write only matters for
        // records that were still active. A cancel command ended this execution, so it
        // reports `Cancelled` even when a newer enqueue has replaced the record since.
        Terminal::Aborted => {
            match ctx.write(attempt, TaskState::Cancelled).await {
                WriteOutcome::Superseded => {
                    tracing::debug!(task_id = %id, attempt, "Cancelled execution already replaced by a newer enqueue");
                }
                WriteOutcome::Failed(e) => {
                    tracing::warn!(task_id = %id, error = %e, "Failed to record cancelled download");
                }
                WriteOutcome::Applied | WriteOutcome::Interrupted => {}
            }
            Some(DownloadResult::Cancelled(request))
        }

        Terminal::Interrupted => Some(DownloadResult::Cancelled(request)),

        Terminal::Superseded => None,

        Terminal::StoreFailed(e) => {
            tracing::error!(task_id = %id, error = %e, "Progress write failed, aborting download");
            ctx.mark_failed(attempt).await;
            Some(DownloadResult::Failure(request, Arc::new(e)))
        }
    };

    // A cancel published before the newer enqueue still belongs to this execution
    let result = match result {
        None if cancel.try_fired() => Some(cancelled),
        other => other,
    };

    match result {
        Some(result) => {
            if matches!(result, DownloadResult::Cancelled(_)) {
                tracing::info!(task_id = %id, "Download cancelled");
            }
            ctx.emit(result);
        }
        None => {
            tracing::warn!(task_id = %id, attempt, "Execution superseded by a newer enqueue");
        }
    }
}
