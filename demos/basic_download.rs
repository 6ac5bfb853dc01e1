//! Basic download example
//!
//! This example demonstrates the core functionality of http-dl:
//! - Creating a downloader instance
//! - Watching a task's progress
//! - Enqueueing downloads given on the command line
//! - Waiting for terminal results, then shutting down
//!
//! ```bash
//! cargo run --example basic_download -- https://example.com/a.iso https://example.com/b.iso
//! ```

use futures::StreamExt;
use http_dl::config::{Config, DownloadConfig};
use http_dl::{DownloadRequest, DownloadResult, Downloader, TaskState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging (optional)
    // Uncomment if you add tracing-subscriber to your dependencies:
    // tracing_subscriber::fmt::init();

    let urls: Vec<url::Url> = std::env::args()
        .skip(1)
        .map(|arg| url::Url::parse(&arg))
        .collect::<Result<_, _>>()?;
    if urls.is_empty() {
        eprintln!("usage: basic_download <url>...");
        return Ok(());
    }

    let config = Config {
        download: DownloadConfig {
            temp_dir: "temp".into(),
            max_concurrent_downloads: 2,
            ..Default::default()
        },
        ..Default::default()
    };

    let downloader = Downloader::new(config).await?;
    downloader.start_queue_processor();
    let mut results = downloader.results();

    for (index, url) in urls.iter().enumerate() {
        let file_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("download-{}", index));
        let request = DownloadRequest::in_directory(
            format!("task-{}", index),
            url.clone(),
            "downloads",
            &file_name,
        );

        // Print each task's state changes
        let mut snapshots = downloader.observe(&request.id);
        tokio::spawn(async move {
            while let Some(Ok(Some(task))) = snapshots.next().await {
                match task.state {
                    TaskState::Downloading(progress) => {
                        println!("⬇ {}: {}%", task.request.id, progress.percentage());
                    }
                    state => println!("• {}: {}", task.request.id, state),
                }
                if task.state.is_terminal() {
                    break;
                }
            }
        });

        downloader.enqueue(request).await?;
    }

    for _ in 0..urls.len() {
        match results.recv().await? {
            DownloadResult::Success(request) => {
                println!("✓ {} saved to {}", request.id, request.destination.display());
            }
            DownloadResult::Cancelled(request) => println!("✗ {} cancelled", request.id),
            DownloadResult::Failure(request, error) => {
                println!("✗ {} failed: {}", request.id, error);
            }
        }
    }

    downloader.shutdown().await?;
    Ok(())
}
