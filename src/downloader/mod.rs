//! Core downloader implementation split into focused submodules.
//!
//! The `Downloader` struct and its methods are organized by domain:
//! - [`control`] - Public task operations (enqueue/cancel/remove)
//! - [`observe`] - Live snapshots and terminal results
//! - [`queue_processor`] - Admission of enqueued requests under the concurrency cap
//! - [`download_task`] - Execution of a single download
//! - [`lifecycle`] - Startup recovery, termination guard and shutdown

mod control;
mod download_task;
mod lifecycle;
mod observe;
mod queue_processor;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::bus::CommandBus;
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::types::{Command, DownloadResult, TaskId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, Semaphore, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Buffer of the result broadcast; slower subscribers observe `Lagged`
const RESULT_CHANNEL_CAPACITY: usize = 1000;

/// Admission and execution bookkeeping
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Semaphore to limit concurrent downloads (respects max_concurrent_downloads config)
    pub(crate) concurrent_limit: Arc<Semaphore>,
    /// Identifiers with an execution in flight, mapped to "run again when done"
    pub(crate) active_downloads: Arc<Mutex<HashMap<TaskId, bool>>>,
    /// Flag to indicate whether new downloads are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Dispatcher subscription, created up front so no early command is lost; taken on start
    pub(crate) commands: Arc<std::sync::Mutex<Option<mpsc::UnboundedReceiver<Command>>>>,
    /// Stops the queue processor
    pub(crate) dispatcher_token: CancellationToken,
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Downloader {
    /// Task record store (wrapped in Arc for sharing across tasks)
    /// Public for integration tests to query task records
    pub db: Arc<Database>,
    /// Ordered command channel between the public operations and the pipelines
    pub(crate) bus: CommandBus,
    /// Terminal result broadcast (multiple subscribers supported)
    pub(crate) result_tx: broadcast::Sender<DownloadResult>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// HTTP client boundary
    pub(crate) transport: Arc<dyn HttpTransport>,
    /// Queue and download state management
    pub(crate) queue_state: QueueState,
}

impl Downloader {
    /// Create a new Downloader using the reqwest transport
    ///
    /// This initializes all core components:
    /// - Validates the configuration
    /// - Opens/creates the SQLite database and runs migrations
    /// - Cancels tasks left active by an unclean previous shutdown
    /// - Sets up the command bus and the result broadcast channel
    ///
    /// Call [`Downloader::start_queue_processor`] to begin executing downloads.
    pub async fn new(config: Config) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config.http)?);
        Self::with_transport(config, transport).await
    }

    /// Create a new Downloader with a custom [`HttpTransport`]
    pub async fn with_transport(config: Config, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.temp_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create temp directory '{}': {}",
                        config.download.temp_dir.display(),
                        e
                    ),
                ))
            })?;

        let db = Database::new(&config.persistence.database_path).await?;

        // Recover before marking the new session as started
        Self::recover_unclean_shutdown(&db).await?;
        db.set_clean_start().await?;

        let (result_tx, _rx) = broadcast::channel(RESULT_CHANNEL_CAPACITY);

        let bus = CommandBus::new();
        let commands = bus.subscribe();

        let queue_state = QueueState {
            concurrent_limit: Arc::new(Semaphore::new(config.download.max_concurrent_downloads)),
            active_downloads: Arc::new(Mutex::new(HashMap::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
            commands: Arc::new(std::sync::Mutex::new(Some(commands))),
            dispatcher_token: CancellationToken::new(),
        };

        tracing::info!(
            max_concurrent = config.download.max_concurrent_downloads,
            progress_throttle_ms = config.download.progress_throttle.as_millis() as u64,
            "Downloader initialized"
        );

        Ok(Self {
            db: Arc::new(db),
            bus,
            result_tx,
            config: Arc::new(config),
            transport,
            queue_state,
        })
    }

    /// Get the current configuration
    ///
    /// The configuration is wrapped in an Arc, so this is a cheap clone operation.
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }
}
