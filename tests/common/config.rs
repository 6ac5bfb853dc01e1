//! Test configuration helpers for creating downloaders on temporary directories

use std::time::Duration;
use tempfile::TempDir;
use http_dl::config::{DownloadConfig, PersistenceConfig};
use http_dl::{Config, Downloader};

/// Configuration rooted in `temp_dir` with a short progress throttle
pub fn test_config(temp_dir: &TempDir, max_concurrent_downloads: usize) -> Config {
    Config {
        download: DownloadConfig {
            max_concurrent_downloads,
            progress_throttle: Duration::from_millis(10),
            temp_dir: temp_dir.path().join("temp"),
        },
        persistence: PersistenceConfig {
            database_path: temp_dir.path().join("http-dl.db"),
        },
        shutdown_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Create a downloader with a running queue processor
///
/// Returns the downloader and the temp directory (which must be kept alive).
pub async fn create_test_downloader(max_concurrent_downloads: usize) -> (Downloader, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = test_config(&temp_dir, max_concurrent_downloads);

    let downloader = Downloader::new(config)
        .await
        .expect("Failed to create downloader");
    downloader.start_queue_processor();

    (downloader, temp_dir)
}
