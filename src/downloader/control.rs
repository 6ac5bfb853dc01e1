//! Task control — enqueue, cancel, remove.
//!
//! Every operation writes the store first and publishes its command afterwards, so a
//! pipeline that reacts to a command always finds the store already updated.

use crate::db::StateUpdate;
use crate::error::{Error, Result};
use crate::types::{Command, DownloadRequest, DownloadTask, TaskId, TaskState};
use crate::utils;
use std::sync::atomic::Ordering;

use super::Downloader;

impl Downloader {
    /// Enqueue a download
    ///
    /// Persists the request in state `Enqueued`, replacing any existing task with the same
    /// identifier (including its state), and hands it to the queue processor. Downloads
    /// start in arrival order as slots free up.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] once [`Downloader::shutdown`] has begun
    /// - storage errors from the insert
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use http_dl::*;
    /// # async fn example(downloader: Downloader) -> Result<()> {
    /// let url = url::Url::parse("https://example.com/big.iso").unwrap();
    /// downloader
    ///     .enqueue(DownloadRequest::in_directory("iso", url, "/data", "big.iso"))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn enqueue(&self, request: DownloadRequest) -> Result<()> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let record = self
            .db
            .insert_or_replace(&request, TaskState::Enqueued)
            .await?;
        // Shutdown may have swept active tasks between the check above and the insert
        self.withdraw_if_shutting_down(&request.id).await?;
        tracing::info!(task_id = %request.id, attempt = record.attempt, url = %request.url, "Task enqueued");

        self.bus.publish(Command::Enqueue(request));
        Ok(())
    }

    /// Cancel a just-inserted task if shutdown has begun, failing with `ShuttingDown`
    pub(super) async fn withdraw_if_shutting_down(&self, id: &TaskId) -> Result<()> {
        if self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Ok(());
        }

        match self.db.update_state(id, TaskState::Cancelled).await {
            Ok(_) | Err(Error::NotFound(_)) | Err(Error::CannotCancel(_)) => {}
            Err(e) => {
                tracing::error!(task_id = %id, error = %e, "Failed to withdraw task enqueued during shutdown");
            }
        }
        tracing::warn!(task_id = %id, "Enqueue raced shutdown, task withdrawn");
        Err(Error::ShuttingDown)
    }

    /// Cancel a task that is enqueued or downloading
    ///
    /// A running download is aborted and its partial file discarded. The task stays in the
    /// store as `Cancelled` until removed or re-enqueued.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no task has this identifier
    /// - [`Error::CannotCancel`] if the task is completed, failed, cancelled or undefined;
    ///   this includes losing a race against the download finishing
    pub async fn cancel(&self, id: &TaskId) -> Result<()> {
        let record = self.db.get(id).await?;
        if !record.state.can_cancel() {
            return Err(Error::CannotCancel(id.clone()));
        }

        match self.db.update_state(id, TaskState::Cancelled).await? {
            StateUpdate::Applied => {}
            StateUpdate::Ignored { .. } | StateUpdate::Superseded => {
                return Err(Error::CannotCancel(id.clone()));
            }
        }
        tracing::info!(task_id = %id, "Task cancelled");

        self.bus.publish(Command::Cancel(id.clone()));
        Ok(())
    }

    /// Cancel every enqueued or downloading task
    ///
    /// Returns the identifiers that were cancelled.
    pub async fn cancel_all(&self) -> Result<Vec<TaskId>> {
        let cancelled = self.db.cancel_all_active().await?;
        tracing::info!(count = cancelled.len(), "Cancelled all active tasks");

        self.bus.publish(Command::CancelAll);
        Ok(cancelled)
    }

    /// Remove a task, aborting it if it is running
    ///
    /// The destination file is deleted when `should_delete_file` returns true for the removed
    /// task and the file exists.
    ///
    /// # Returns
    ///
    /// The snapshot of the task as it was when removed.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no task has this identifier
    /// - [`Error::FileDeletion`] if the file exists but could not be deleted; the record
    ///   is removed regardless
    pub async fn remove<F>(&self, id: &TaskId, should_delete_file: F) -> Result<DownloadTask>
    where
        F: Fn(&DownloadTask) -> bool,
    {
        let task = DownloadTask::from(self.db.remove(id).await?);
        self.bus.publish(Command::Cancel(id.clone()));

        if should_delete_file(&task) {
            let deleted = utils::delete_file_if_exists(&task.request.destination).await?;
            tracing::debug!(task_id = %id, deleted, "Destination file handled on removal");
        }

        tracing::info!(task_id = %id, "Task removed");
        Ok(task)
    }

    /// Remove a task and delete its downloaded file
    pub async fn remove_and_delete_file(&self, id: &TaskId) -> Result<DownloadTask> {
        self.remove(id, |_| true).await
    }

    /// Remove every task, aborting running downloads
    ///
    /// File deletion is best-effort across the whole set: a failure on one file does not
    /// stop the others. The first failure is returned after all records were processed.
    pub async fn remove_all<F>(&self, should_delete_file: F) -> Result<Vec<DownloadTask>>
    where
        F: Fn(&DownloadTask) -> bool,
    {
        let tasks: Vec<DownloadTask> = self
            .db
            .remove_all()
            .await?
            .into_iter()
            .map(DownloadTask::from)
            .collect();
        self.bus.publish(Command::CancelAll);

        let mut first_error = None;
        for task in tasks.iter().filter(|task| should_delete_file(task)) {
            if let Err(e) = utils::delete_file_if_exists(&task.request.destination).await {
                tracing::warn!(task_id = %task.id(), error = %e, "Failed to delete file of removed task");
                first_error.get_or_insert(e);
            }
        }

        tracing::info!(count = tasks.len(), "Removed all tasks");
        match first_error {
            Some(e) => Err(e),
            None => Ok(tasks),
        }
    }

    /// Remove every task and delete all downloaded files
    pub async fn remove_all_and_delete_files(&self) -> Result<Vec<DownloadTask>> {
        self.remove_all(|_| true).await
    }
}
