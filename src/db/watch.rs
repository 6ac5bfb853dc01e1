//! Change-notified live queries over task records.
//!
//! A live query is cold: nothing happens until the stream is first polled. It then
//! subscribes to change notifications *before* running its initial query, so a write
//! committed in between is never missed, and re-runs the query after every committed
//! write that touches a watched identifier.

use crate::Result;
use crate::types::{TaskId, TaskRecord};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use tokio::sync::broadcast::{self, error::RecvError};

use super::tasks::{select_record, select_records};
use super::{Database, StoreChange};

impl Database {
    /// Publish a committed change to all watchers
    pub(super) fn notify(&self, change: StoreChange) {
        // No receivers just means nobody is watching
        let _ = self.changes.send(change);
    }

    /// Raw change notifications, one per committed write
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Watch one record: the current value, then the re-read value after every change to it
    ///
    /// Emits `None` while no record exists.
    pub fn watch(&self, id: &TaskId) -> BoxStream<'static, Result<Option<TaskRecord>>> {
        let pool = self.pool.clone();
        let id = id.clone();
        let scope = HashSet::from([id.clone()]);

        live_query(self.changes.clone(), scope, move || {
            let pool = pool.clone();
            let id = id.clone();
            async move { select_record(&pool, &id).await }
        })
    }

    /// Watch a set of records; each emission holds only the identifiers that exist
    pub fn watch_many(
        &self,
        ids: HashSet<TaskId>,
    ) -> BoxStream<'static, Result<Vec<TaskRecord>>> {
        let pool = self.pool.clone();
        let scope = ids.clone();

        live_query(self.changes.clone(), scope, move || {
            let pool = pool.clone();
            let ids = ids.clone();
            async move { select_records(&pool, &ids).await }
        })
    }
}

struct LiveQuery<F> {
    /// Taken on first poll to subscribe
    changes: Option<broadcast::Sender<StoreChange>>,
    rx: Option<broadcast::Receiver<StoreChange>>,
    scope: HashSet<TaskId>,
    query: F,
}

impl<F> LiveQuery<F> {
    /// Wait for the next change relevant to the scope; `false` once the store is gone
    async fn next_relevant_change(&mut self) -> bool {
        let Some(rx) = self.rx.as_mut() else {
            return false;
        };
        loop {
            match rx.recv().await {
                Ok(change) if change.touches(&self.scope) => return true,
                Ok(_) => continue,
                // Missed notifications may have touched us
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Live query lagged behind store changes");
                    return true;
                }
                Err(RecvError::Closed) => return false,
            }
        }
    }
}

fn live_query<T, F, Fut>(
    changes: broadcast::Sender<StoreChange>,
    scope: HashSet<TaskId>,
    query: F,
) -> BoxStream<'static, Result<T>>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let state = LiveQuery {
        changes: Some(changes),
        rx: None,
        scope,
        query,
    };

    stream::unfold(state, |mut state| async move {
        if let Some(changes) = state.changes.take() {
            state.rx = Some(changes.subscribe());
        } else if !state.next_relevant_change().await {
            return None;
        }
        let value = (state.query)().await;
        Some((value, state))
    })
    .boxed()
}
