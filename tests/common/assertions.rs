//! Custom test assertions for E2E tests

use futures::StreamExt;
use http_dl::{DownloadResult, Downloader, TaskId, TaskState};
use std::time::Duration;
use tokio::sync::broadcast;

/// Wait for the next terminal result of `id`, skipping results of other tasks
///
/// Returns `None` on timeout or when the channel closes.
pub async fn wait_for_result(
    results: &mut broadcast::Receiver<DownloadResult>,
    id: &str,
    timeout: Duration,
) -> Option<DownloadResult> {
    tokio::time::timeout(timeout, async {
        loop {
            match results.recv().await {
                Ok(result) if result.request().id.as_str() == id => return Some(result),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Wait until no further result arrives within `window`
pub async fn assert_no_more_results(
    results: &mut broadcast::Receiver<DownloadResult>,
    window: Duration,
) {
    if let Ok(Ok(result)) = tokio::time::timeout(window, results.recv()).await {
        panic!("unexpected extra result: {:?}", result);
    }
}

/// Observe `id` until a snapshot satisfies `done`, returning every state seen
///
/// Missing-record snapshots are skipped.
pub async fn collect_states_until<F>(
    downloader: &Downloader,
    id: &str,
    timeout: Duration,
    done: F,
) -> Vec<TaskState>
where
    F: Fn(&TaskState) -> bool,
{
    let mut snapshots = downloader.observe(&TaskId::from(id));
    let mut seen = Vec::new();

    let outcome = tokio::time::timeout(timeout, async {
        while let Some(item) = snapshots.next().await {
            let Some(task) = item.expect("snapshot query failed") else {
                continue;
            };
            seen.push(task.state);
            if done(&task.state) {
                return;
            }
        }
    })
    .await;

    assert!(outcome.is_ok(), "timed out observing {}; saw {:?}", id, seen);
    seen
}
