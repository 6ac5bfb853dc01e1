//! Observation — live task snapshots, point queries and terminal results.

use crate::error::Result;
use crate::types::{DownloadResult, DownloadTask, StateKind, TaskId};
use futures::future;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::collections::{HashMap, HashSet};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::Downloader;

impl Downloader {
    /// Watch one task
    ///
    /// Emits the current snapshot first (`None` while no task has this identifier) and then
    /// every committed change. Consecutive identical snapshots are collapsed. The stream is
    /// cold: each call starts its own query when first polled.
    pub fn observe(&self, id: &TaskId) -> BoxStream<'static, Result<Option<DownloadTask>>> {
        let snapshots = self
            .db
            .watch(id)
            .map(|item| item.map(|record| record.map(DownloadTask::from)))
            .boxed();
        distinct_until_changed(snapshots)
    }

    /// Watch a set of tasks
    ///
    /// Each emission maps only the identifiers that currently exist; missing tasks are
    /// absent keys. Consecutive identical maps are collapsed.
    pub fn observe_many<I>(&self, ids: I) -> BoxStream<'static, Result<HashMap<TaskId, DownloadTask>>>
    where
        I: IntoIterator<Item = TaskId>,
    {
        let ids: HashSet<TaskId> = ids.into_iter().collect();
        let snapshots = self
            .db
            .watch_many(ids)
            .map(|item| {
                item.map(|records| {
                    records
                        .into_iter()
                        .map(|record| (record.id().clone(), DownloadTask::from(record)))
                        .collect::<HashMap<_, _>>()
                })
            })
            .boxed();
        distinct_until_changed(snapshots)
    }

    /// Current snapshot of a task, `None` if absent
    pub async fn task(&self, id: &TaskId) -> Result<Option<DownloadTask>> {
        Ok(self.db.get_optional(id).await?.map(DownloadTask::from))
    }

    /// Snapshots of all tasks in the given state
    pub async fn tasks_with_state(&self, kind: StateKind) -> Result<Vec<DownloadTask>> {
        Ok(self
            .db
            .list_by_state(kind)
            .await?
            .into_iter()
            .map(DownloadTask::from)
            .collect())
    }

    /// Subscribe to terminal results
    ///
    /// Multiple subscribers are supported. Each receives every result emitted after it
    /// subscribed. Results are buffered, but a subscriber falling behind by more than the
    /// buffer receives `RecvError::Lagged`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use http_dl::{Config, Downloader, DownloadResult};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = Downloader::new(Config::default()).await?;
    ///
    ///     let mut results = downloader.results();
    ///     tokio::spawn(async move {
    ///         while let Ok(result) = results.recv().await {
    ///             match result {
    ///                 DownloadResult::Success(request) => println!("done: {}", request.id),
    ///                 other => println!("ended: {:?}", other),
    ///             }
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn results(&self) -> broadcast::Receiver<DownloadResult> {
        self.result_tx.subscribe()
    }

    /// [`Downloader::results`] as a stream; results missed by lagging are skipped
    pub fn result_stream(&self) -> impl Stream<Item = DownloadResult> + Send + 'static {
        BroadcastStream::new(self.result_tx.subscribe()).filter_map(|item| {
            future::ready(match item {
                Ok(result) => Some(result),
                Err(e) => {
                    tracing::warn!(error = %e, "Result subscriber lagged");
                    None
                }
            })
        })
    }
}

/// Drop values equal to the previously emitted one; errors always pass through
fn distinct_until_changed<T>(stream: BoxStream<'static, Result<T>>) -> BoxStream<'static, Result<T>>
where
    T: PartialEq + Clone + Send + 'static,
{
    stream
        .scan(None::<T>, |last, item| {
            let out = match item {
                Ok(value) if last.as_ref() == Some(&value) => None,
                Ok(value) => {
                    *last = Some(value.clone());
                    Some(Ok(value))
                }
                Err(e) => Some(Err(e)),
            };
            future::ready(Some(out))
        })
        .filter_map(future::ready)
        .boxed()
}
