//! Shared test helpers for creating Downloader instances in tests.

use crate::config::Config;
use crate::downloader::Downloader;
use crate::error::{DownloadError, Error, Result};
use crate::transport::{HttpTransport, ProgressStream};
use crate::types::{DownloadRequest, DownloadResult, Progress, TaskId, TaskState};
use futures::StreamExt;
use futures::stream;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio::sync::broadcast;

/// How a [`ScriptedTransport`] answers one fetch
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// `chunks` progress steps `interval` apart, then `total` bytes land at the destination
    Succeed {
        total: i64,
        chunks: i64,
        interval: Duration,
    },
    /// First progress, then a transfer error after `after`
    FailMidway { total: i64, after: Duration },
    /// Error before any progress
    Refuse { status: u16 },
    /// First progress, then nothing until the stream is dropped
    Stall { total: i64 },
    /// `chunks` progress steps back to back, then nothing until the stream is dropped
    Burst { total: i64, chunks: i64 },
}

impl Script {
    /// Quick two-chunk success
    pub(crate) fn quick(total: i64) -> Self {
        Script::Succeed {
            total,
            chunks: 2,
            interval: Duration::from_millis(5),
        }
    }
}

enum Step {
    Wait(Duration),
    Emit(Progress),
    WriteBody(PathBuf, i64),
    Fail(Error),
    Stall,
}

/// Counts open transfers and remembers the highest count seen
struct InFlight {
    current: Arc<AtomicUsize>,
}

impl InFlight {
    fn enter(current: Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { current }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory [`HttpTransport`] answering each task id with a [`Script`]
pub(crate) struct ScriptedTransport {
    scripts: std::sync::Mutex<HashMap<TaskId, Script>>,
    fallback: Script,
    fetches: std::sync::Mutex<Vec<TaskId>>,
    in_flight: Arc<AtomicUsize>,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new(fallback: Script) -> Self {
        Self {
            scripts: std::sync::Mutex::new(HashMap::new()),
            fallback,
            fetches: std::sync::Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
        }
    }

    /// Use `script` for every fetch of `id`
    pub(crate) fn script(&self, id: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(TaskId::from(id), script);
    }

    /// Ids in fetch order
    pub(crate) fn fetches(&self) -> Vec<TaskId> {
        self.fetches.lock().unwrap().clone()
    }

    pub(crate) fn fetch_count(&self, id: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|fetched| fetched.as_str() == id)
            .count()
    }

    /// Transfers open right now
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Most transfers ever open at once
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl HttpTransport for ScriptedTransport {
    async fn fetch(&self, request: &DownloadRequest, _staging: &Path) -> Result<ProgressStream> {
        self.fetches.lock().unwrap().push(request.id.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&request.id)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());

        let url = request.url.to_string();
        let steps = match script {
            Script::Refuse { status } => {
                return Err(DownloadError::HttpStatus { status, url }.into());
            }
            Script::Succeed {
                total,
                chunks,
                interval,
            } => {
                let mut steps = vec![Step::Emit(Progress::new(0, total))];
                for chunk in 1..=chunks {
                    steps.push(Step::Wait(interval));
                    if chunk == chunks {
                        steps.push(Step::WriteBody(request.destination.clone(), total));
                    }
                    steps.push(Step::Emit(Progress::new(total * chunk / chunks, total)));
                }
                steps
            }
            Script::FailMidway { total, after } => vec![
                Step::Emit(Progress::new(0, total)),
                Step::Wait(after),
                Step::Fail(
                    DownloadError::Transfer {
                        url,
                        reason: "connection reset".to_string(),
                    }
                    .into(),
                ),
            ],
            Script::Stall { total } => vec![Step::Emit(Progress::new(0, total)), Step::Stall],
            Script::Burst { total, chunks } => {
                let mut steps: Vec<Step> = (0..=chunks)
                    .map(|chunk| Step::Emit(Progress::new(total * chunk / chunks.max(1), total)))
                    .collect();
                steps.push(Step::Stall);
                steps
            }
        };

        let guard = InFlight::enter(Arc::clone(&self.in_flight), &self.peak);
        Ok(stream::unfold((steps.into_iter(), guard), |(mut steps, guard)| async move {
            loop {
                match steps.next()? {
                    Step::Wait(duration) => tokio::time::sleep(duration).await,
                    Step::Emit(progress) => return Some((Ok(progress), (steps, guard))),
                    Step::WriteBody(path, len) => {
                        if let Some(parent) = path.parent() {
                            tokio::fs::create_dir_all(parent).await.ok();
                        }
                        let body = vec![0u8; usize::try_from(len).unwrap_or(0)];
                        if let Err(e) = tokio::fs::write(&path, body).await {
                            return Some((Err(e.into()), (steps, guard)));
                        }
                    }
                    Step::Fail(e) => return Some((Err(e), (steps, guard))),
                    Step::Stall => std::future::pending::<()>().await,
                }
            }
        })
        .boxed())
    }
}

/// Config rooted in `dir`, with a short throttle so tests see progress quickly
pub(crate) fn test_config(dir: &Path, max_concurrent: usize) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("test.db");
    config.download.temp_dir = dir.join("temp");
    config.download.max_concurrent_downloads = max_concurrent;
    config.download.progress_throttle = Duration::from_millis(10);
    config.shutdown_timeout = Duration::from_secs(5);
    config
}

/// Helper to create a test Downloader instance with a persistent database.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader() -> (Downloader, TempDir) {
    let (downloader, _transport, temp_dir) =
        create_test_downloader_with(Script::quick(1000), 3).await;
    (downloader, temp_dir)
}

/// Like [`create_test_downloader`] with a scripted transport and concurrency cap
pub(crate) async fn create_test_downloader_with(
    fallback: Script,
    max_concurrent: usize,
) -> (Downloader, Arc<ScriptedTransport>, TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path(), max_concurrent);
    let transport = Arc::new(ScriptedTransport::new(fallback));
    let downloader = Downloader::with_transport(config, transport.clone())
        .await
        .unwrap();
    (downloader, transport, temp_dir)
}

/// Like [`create_test_downloader_with`] with a custom progress throttle window
pub(crate) async fn create_throttled_downloader(
    fallback: Script,
    window: Duration,
) -> (Downloader, TempDir) {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(temp_dir.path(), 2);
    config.download.progress_throttle = window;
    let transport = Arc::new(ScriptedTransport::new(fallback));
    let downloader = Downloader::with_transport(config, transport).await.unwrap();
    (downloader, temp_dir)
}

/// Request for `http://example.com/<id>.bin` saved under `dir/downloads`
pub(crate) fn request_in(dir: &Path, id: &str) -> DownloadRequest {
    let url = url::Url::parse(&format!("http://example.com/{}.bin", id)).unwrap();
    DownloadRequest::in_directory(id, url, dir.join("downloads"), &format!("{}.bin", id))
}

/// Next result, failing the test after five seconds
pub(crate) async fn next_result(results: &mut broadcast::Receiver<DownloadResult>) -> DownloadResult {
    tokio::time::timeout(Duration::from_secs(5), results.recv())
        .await
        .expect("timed out waiting for a result")
        .expect("result channel closed")
}

/// Poll the store until `id` satisfies `pred`, failing the test after five seconds
pub(crate) async fn wait_for_state<F>(downloader: &Downloader, id: &str, pred: F) -> TaskState
where
    F: Fn(&TaskState) -> bool,
{
    let id = TaskId::from(id);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(task) = downloader.task(&id).await.unwrap()
            && pred(&task.state)
        {
            return task.state;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for state of {}",
            id
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until no execution is in flight, failing the test after five seconds
pub(crate) async fn wait_until_idle(downloader: &Downloader) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while downloader.active_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("downloads did not settle");
}
