//! Download task context — shared state, cancellation signal, and fenced store writes.

use crate::config::Config;
use crate::db::{Database, StateUpdate};
use crate::error::Error;
use crate::transport::HttpTransport;
use crate::types::{Command, DownloadRequest, DownloadResult, TaskId, TaskState};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Cancellation watcher for one task, filtered from a command bus subscription.
///
/// The subscription must be taken before the task record is read: any cancel applied to
/// the store after that read is then guaranteed to show up here.
pub(crate) struct CancelSignal {
    id: TaskId,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl CancelSignal {
    pub(crate) fn new(id: TaskId, rx: mpsc::UnboundedReceiver<Command>) -> Self {
        Self { id, rx }
    }

    /// Resolves on the first `Cancel(id)` or `CancelAll`; never resolves once the bus is gone.
    ///
    /// Cancel-safe, so it can sit in a `select!` loop.
    pub(crate) async fn fired(&mut self) {
        while let Some(command) = self.rx.recv().await {
            if command.cancels(&self.id) {
                return;
            }
        }
        std::future::pending::<()>().await
    }

    /// Whether a matching cancel is already queued, without waiting
    pub(crate) fn try_fired(&mut self) -> bool {
        while let Ok(command) = self.rx.try_recv() {
            if command.cancels(&self.id) {
                return true;
            }
        }
        false
    }
}

/// How a pipeline write landed in the store
pub(super) enum WriteOutcome {
    /// State written
    Applied,
    /// The task was cancelled or removed underneath the download
    Interrupted,
    /// A newer enqueue replaced the record; this execution must stop quietly
    Superseded,
    /// The store itself failed
    Failed(Error),
}

/// Shared context for a single download task, reducing parameter passing between helpers.
pub(crate) struct DownloadTaskContext {
    pub(crate) id: TaskId,
    /// Request carried by the admitting command; the stored record takes precedence
    pub(crate) request: DownloadRequest,
    pub(crate) db: Arc<Database>,
    pub(crate) transport: Arc<dyn HttpTransport>,
    pub(crate) result_tx: broadcast::Sender<DownloadResult>,
    pub(crate) config: Arc<Config>,
}

impl DownloadTaskContext {
    /// Write `state` for the execution of `attempt`
    pub(super) async fn write(&self, attempt: i64, state: TaskState) -> WriteOutcome {
        match self
            .db
            .update_state_for_attempt(&self.id, attempt, state)
            .await
        {
            Ok(StateUpdate::Applied) => WriteOutcome::Applied,
            Ok(StateUpdate::Ignored { .. }) => WriteOutcome::Interrupted,
            Ok(StateUpdate::Superseded) => WriteOutcome::Superseded,
            Err(Error::NotFound(_)) | Err(Error::CannotCancel(_)) => WriteOutcome::Interrupted,
            Err(e) => WriteOutcome::Failed(e),
        }
    }

    /// Best-effort `Failed` write after the store already failed once
    pub(super) async fn mark_failed(&self, attempt: i64) {
        if let WriteOutcome::Failed(e) = self.write(attempt, TaskState::Failed).await {
            tracing::error!(task_id = %self.id, error = %e, "Failed to record task failure");
        }
    }

    /// Broadcast the terminal result of this execution
    pub(super) fn emit(&self, result: DownloadResult) {
        // No subscribers is fine; results are not retained
        self.result_tx.send(result).ok();
    }
}
