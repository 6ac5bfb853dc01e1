//! Task record store for http-dl
//!
//! Persists one row per download task in SQLite, keyed by the caller-assigned identifier.
//! The store is the single source of truth for task state: the execution pipeline re-reads
//! it before doing anything and every mutation passes the task state machine first.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by concern:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`tasks`] — Task record queries and state-gated mutations
//! - [`watch`] — Change-notified live queries
//! - [`state`] — Runtime state (shutdown tracking)
//!
//! ## Writes
//!
//! All mutations take the writer lock, run inside one transaction and publish a
//! [`StoreChange`] after commit, while the lock is still held. Watchers therefore see
//! changes in commit order and never observe a partial write.

use crate::error::DatabaseError;
use crate::types::{DownloadRequest, Progress, StateKind, TaskId, TaskRecord, TaskState};
use crate::{Error, Result};
use chrono::{TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::{Mutex, broadcast};

mod migrations;
mod state;
mod tasks;
mod watch;

/// Capacity of the change-notification channel; slower watchers re-query after lagging
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Task record row from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Caller-assigned identifier (primary key)
    pub identifier: String,
    /// Source URL
    pub url: String,
    /// Destination file path
    pub destination: String,
    /// State code (see [`StateKind::to_i32`])
    pub state: i32,
    /// Bytes written, present only while downloading
    pub bytes_written: Option<i64>,
    /// Expected total, present only while downloading
    pub total_bytes: Option<i64>,
    /// Insert-or-replace generation of this identifier
    pub attempt: i64,
    /// Unix timestamp (milliseconds) of the last mutation
    pub updated_at: i64,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        let corrupt = |reason: String| {
            Error::Database(DatabaseError::Corrupt {
                id: row.identifier.clone(),
                reason,
            })
        };

        let url = url::Url::parse(&row.url).map_err(|e| corrupt(format!("bad url: {}", e)))?;
        let kind = StateKind::from_i32(row.state)
            .ok_or_else(|| corrupt(format!("unknown state code {}", row.state)))?;
        let progress = match (row.bytes_written, row.total_bytes) {
            (Some(written), Some(total)) => Some(Progress::new(written, total)),
            (None, None) => None,
            _ => return Err(corrupt("only one byte counter is set".to_string())),
        };
        let state = TaskState::from_parts(kind, progress)
            .ok_or_else(|| corrupt("downloading without byte counters".to_string()))?;
        let updated_at = Utc
            .timestamp_millis_opt(row.updated_at)
            .single()
            .unwrap_or_else(Utc::now);

        Ok(TaskRecord {
            request: DownloadRequest {
                id: TaskId(row.identifier),
                url,
                destination: PathBuf::from(row.destination),
            },
            state,
            attempt: row.attempt,
            updated_at,
        })
    }
}

/// Notification published after a committed write
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreChange {
    /// The write touched exactly these identifiers
    Tasks(Vec<TaskId>),
    /// The write may have touched any record
    All,
}

impl StoreChange {
    /// Whether this change may affect any of `ids`
    pub fn touches(&self, ids: &HashSet<TaskId>) -> bool {
        match self {
            StoreChange::All => true,
            StoreChange::Tasks(changed) => changed.iter().any(|id| ids.contains(id)),
        }
    }
}

/// Outcome of a state-gated update
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateUpdate {
    /// The new state was written
    Applied,
    /// The transition is illegal from `current`; nothing was written
    Ignored {
        /// State the record is in
        current: TaskState,
    },
    /// The record was replaced by a newer enqueue; nothing was written
    Superseded,
}

/// Database handle for http-dl
pub struct Database {
    pool: SqlitePool,
    /// Serializes all mutations (one write transaction in flight)
    writer: Mutex<()>,
    changes: broadcast::Sender<StoreChange>,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
