//! # http-dl
//!
//! Persistent background HTTP download manager for embedding in applications.
//!
//! ## Design
//!
//! - **Persistent** - every task lives in a SQLite store and survives restarts
//! - **Bounded** - at most `max_concurrent_downloads` transfers run at once, admitted in
//!   arrival order
//! - **Observable** - live task snapshots and a broadcast of terminal results, no polling
//! - **Library-first** - no CLI or UI, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use http_dl::{Config, DownloadRequest, DownloadResult, Downloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = Downloader::new(Config::default()).await?;
//!     downloader.start_queue_processor();
//!
//!     let mut results = downloader.results();
//!
//!     let url = url::Url::parse("https://example.com/archive.tar.gz")?;
//!     downloader
//!         .enqueue(DownloadRequest::in_directory("archive", url, "downloads", "archive.tar.gz"))
//!         .await?;
//!
//!     match results.recv().await? {
//!         DownloadResult::Success(request) => println!("saved to {}", request.destination.display()),
//!         other => println!("ended: {:?}", other),
//!     }
//!
//!     downloader.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Command bus between public operations and running downloads
pub mod bus;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Core downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Task state machine
pub mod state;
/// Keep-latest progress throttling
pub mod throttle;
/// HTTP client boundary
pub mod transport;
/// Core task types
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, HttpConfig, PersistenceConfig};
pub use db::{Database, StateUpdate, StoreChange};
pub use downloader::Downloader;
pub use error::{DatabaseError, DownloadError, Error, Result};
pub use transport::{HttpTransport, ProgressStream, ReqwestTransport};
pub use types::{
    Command, DownloadRequest, DownloadResult, DownloadTask, Progress, StateKind, TaskId,
    TaskRecord, TaskState,
};

/// Run the downloader until a termination signal, then shut it down gracefully.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// The queue processor must already be started.
///
/// # Example
///
/// ```no_run
/// use http_dl::{Config, Downloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = Downloader::new(Config::default()).await?;
///     downloader.start_queue_processor();
///
///     run_with_shutdown(downloader).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: Downloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
                _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
            }
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM, shutting down");
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT, shutting down");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
