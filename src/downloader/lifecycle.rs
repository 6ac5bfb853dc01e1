//! Startup recovery, the termination guard, and shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::db::Database;
use crate::error::Result;
use crate::types::Command;
use crate::utils;

use super::Downloader;

/// Poll interval while waiting for in-flight pipelines to drain
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl Downloader {
    /// Cancel tasks left active by a session that never reached `shutdown()`
    ///
    /// Downloads are not resumed across sessions, so an `Enqueued` or `Downloading` record
    /// from a crashed session would otherwise stay active forever.
    pub(crate) async fn recover_unclean_shutdown(db: &Database) -> Result<()> {
        if !db.was_unclean_shutdown().await? {
            return Ok(());
        }

        let cancelled = db.cancel_all_active().await?;
        tracing::warn!(
            count = cancelled.len(),
            "Previous session did not shut down cleanly, cancelled orphaned tasks"
        );
        Ok(())
    }

    /// Termination guard: cancel every active task and purge the scratch directory
    ///
    /// Each step is bounded by `shutdown_timeout`; failures are logged and never returned.
    /// The purge runs only after in-flight pipelines stopped writing staging files (or the
    /// wait timed out).
    pub async fn run_lifecycle_guard(&self) {
        let timeout = self.config.shutdown_timeout;

        match tokio::time::timeout(timeout, self.db.cancel_all_active()).await {
            Ok(Ok(cancelled)) => {
                tracing::info!(count = cancelled.len(), "Cancelled active tasks");
            }
            Ok(Err(e)) => tracing::error!(error = %e, "Failed to cancel active tasks"),
            Err(_) => tracing::warn!("Timed out cancelling active tasks"),
        }

        self.bus.publish(Command::CancelAll);

        if tokio::time::timeout(timeout, self.wait_for_active_downloads())
            .await
            .is_err()
        {
            tracing::warn!("Timeout waiting for downloads to stop, purging anyway");
        }

        let temp_dir = &self.config.download.temp_dir;
        match tokio::time::timeout(timeout, utils::purge_directory(temp_dir)).await {
            Ok(Ok(removed)) => {
                tracing::info!(removed, temp_dir = %temp_dir.display(), "Purged temporary downloads");
            }
            Ok(Err(e)) => tracing::error!(error = %e, "Failed to purge temporary downloads"),
            Err(_) => tracing::warn!("Timed out purging temporary downloads"),
        }
    }

    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new downloads ([`Downloader::enqueue`] fails with `ShuttingDown`)
    /// 2. Runs the termination guard: cancels active tasks, aborts running downloads and
    ///    waits for them (bounded by `shutdown_timeout`), purges the temp directory
    /// 3. Marks a clean shutdown in the database
    /// 4. Stops the queue processor
    ///
    /// # Errors
    ///
    /// The method completes as much of the sequence as possible; step failures are logged
    /// rather than returned.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new downloads
        self.queue_state.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new downloads");

        // 2. Cancel and clean up
        self.run_lifecycle_guard().await;

        // 3. Mark clean shutdown in database
        if let Err(e) = self.db.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
        } else {
            tracing::info!("Marked clean shutdown in database");
        }

        // 4. Stop admitting
        self.queue_state.dispatcher_token.cancel();

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Number of identifiers with an execution in flight
    pub async fn active_count(&self) -> usize {
        self.queue_state.active_downloads.lock().await.len()
    }

    /// Wait for all active downloads to end
    async fn wait_for_active_downloads(&self) {
        loop {
            let active_count = self.active_count().await;
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for active downloads to stop");
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}
