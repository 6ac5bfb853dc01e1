//! Task record queries and state-gated mutations.

use crate::error::DatabaseError;
use crate::types::{DownloadRequest, StateKind, TaskId, TaskRecord, TaskState};
use crate::{Error, Result};
use sqlx::sqlite::SqlitePool;
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor};
use std::collections::HashSet;

use super::{Database, StateUpdate, StoreChange, TaskRow};

const ACTIVE_STATES: [StateKind; 2] = [StateKind::Enqueued, StateKind::Downloading];

fn query_failed(what: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("{}: {}", what, e)))
}

async fn select_row<'e, E>(executor: E, id: &TaskId) -> Result<Option<TaskRow>>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT identifier, url, destination, state, bytes_written, total_bytes, attempt, updated_at
        FROM download_tasks
        WHERE identifier = ?
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await
    .map_err(|e| query_failed("Failed to get task", e))
}

/// Point query shared by [`Database::get_optional`] and live queries
pub(super) async fn select_record(pool: &SqlitePool, id: &TaskId) -> Result<Option<TaskRecord>> {
    select_row(pool, id).await?.map(TaskRecord::try_from).transpose()
}

/// Multi-get shared by [`Database::get_many`] and live queries
pub(super) async fn select_records(
    pool: &SqlitePool,
    ids: &HashSet<TaskId>,
) -> Result<Vec<TaskRecord>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT identifier, url, destination, state, bytes_written, total_bytes, attempt, updated_at \
         FROM download_tasks WHERE identifier IN (",
    );
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.as_str());
    }
    separated.push_unseparated(")");

    let rows = builder
        .build_query_as::<TaskRow>()
        .fetch_all(pool)
        .await
        .map_err(|e| query_failed("Failed to get tasks", e))?;

    rows.into_iter().map(TaskRecord::try_from).collect()
}

impl Database {
    /// Get a task record, failing with [`Error::NotFound`] if absent
    pub async fn get(&self, id: &TaskId) -> Result<TaskRecord> {
        self.get_optional(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    /// Get a task record, `None` if absent
    pub async fn get_optional(&self, id: &TaskId) -> Result<Option<TaskRecord>> {
        select_record(&self.pool, id).await
    }

    /// Get every existing record among `ids` (unordered)
    pub async fn get_many(&self, ids: &HashSet<TaskId>) -> Result<Vec<TaskRecord>> {
        select_records(&self.pool, ids).await
    }

    /// List records in the given state, oldest mutation first
    pub async fn list_by_state(&self, kind: StateKind) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT identifier, url, destination, state, bytes_written, total_bytes, attempt, updated_at
            FROM download_tasks
            WHERE state = ?
            ORDER BY updated_at ASC, identifier ASC
            "#,
        )
        .bind(kind.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to list tasks by state", e))?;

        rows.into_iter().map(TaskRecord::try_from).collect()
    }

    /// List all records
    pub async fn list_all(&self) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT identifier, url, destination, state, bytes_written, total_bytes, attempt, updated_at
            FROM download_tasks
            ORDER BY updated_at ASC, identifier ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to list tasks", e))?;

        rows.into_iter().map(TaskRecord::try_from).collect()
    }

    /// Insert a record for `request`, replacing any existing record with the same identifier
    ///
    /// Replacing overwrites the prior state unconditionally and increments `attempt`, which
    /// fences off writes from any execution still running against the old record.
    pub async fn insert_or_replace(
        &self,
        request: &DownloadRequest,
        state: TaskState,
    ) -> Result<TaskRecord> {
        let _writer = self.writer.lock().await;
        let now = chrono::Utc::now().timestamp_millis();
        let progress = state.progress();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("Failed to begin transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO download_tasks (
                identifier, url, destination, state, bytes_written, total_bytes, attempt, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 1, ?)
            ON CONFLICT(identifier) DO UPDATE SET
                url = excluded.url,
                destination = excluded.destination,
                state = excluded.state,
                bytes_written = excluded.bytes_written,
                total_bytes = excluded.total_bytes,
                attempt = download_tasks.attempt + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&request.id)
        .bind(request.url.as_str())
        .bind(request.destination.to_string_lossy().into_owned())
        .bind(state.kind().to_i32())
        .bind(progress.map(|p| p.bytes_written))
        .bind(progress.map(|p| p.total_bytes))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("Failed to insert task", e))?;

        let row = select_row(&mut *tx, &request.id)
            .await?
            .ok_or_else(|| Error::NotFound(request.id.clone()))?;

        tx.commit()
            .await
            .map_err(|e| query_failed("Failed to commit task insert", e))?;
        self.notify(StoreChange::Tasks(vec![request.id.clone()]));

        TaskRecord::try_from(row)
    }

    /// Move a task to `next`, consulting the task state machine
    ///
    /// - fails with [`Error::NotFound`] if the record is absent
    /// - returns [`StateUpdate::Ignored`] without writing if the transition is illegal
    /// - fails with [`Error::CannotCancel`] if `next` is cancelled and the current state is
    ///   not cancellable
    pub async fn update_state(&self, id: &TaskId, next: TaskState) -> Result<StateUpdate> {
        self.apply_state(id, None, next).await
    }

    /// [`Database::update_state`] fenced on an attempt
    ///
    /// Returns [`StateUpdate::Superseded`] without writing when the record has been
    /// replaced since `attempt` was read.
    pub async fn update_state_for_attempt(
        &self,
        id: &TaskId,
        attempt: i64,
        next: TaskState,
    ) -> Result<StateUpdate> {
        self.apply_state(id, Some(attempt), next).await
    }

    async fn apply_state(
        &self,
        id: &TaskId,
        attempt: Option<i64>,
        next: TaskState,
    ) -> Result<StateUpdate> {
        let _writer = self.writer.lock().await;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("Failed to begin transaction", e))?;

        let row = select_row(&mut *tx, id)
            .await?
            .ok_or_else(|| Error::NotFound(id.clone()))?;

        if attempt.is_some_and(|expected| expected != row.attempt) {
            tracing::debug!(task_id = %id, current_attempt = row.attempt, "Write from a superseded attempt skipped");
            return Ok(StateUpdate::Superseded);
        }

        let current = TaskRecord::try_from(row)?.state;
        if !current.can_transition_to(&next) {
            tracing::debug!(task_id = %id, from = %current, to = %next, "Illegal transition ignored");
            return Ok(StateUpdate::Ignored { current });
        }
        if next == TaskState::Cancelled && !current.can_cancel() {
            return Err(Error::CannotCancel(id.clone()));
        }

        let progress = next.progress();
        sqlx::query(
            r#"
            UPDATE download_tasks
            SET state = ?, bytes_written = ?, total_bytes = ?, updated_at = ?
            WHERE identifier = ?
            "#,
        )
        .bind(next.kind().to_i32())
        .bind(progress.map(|p| p.bytes_written))
        .bind(progress.map(|p| p.total_bytes))
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("Failed to update task state", e))?;

        tx.commit()
            .await
            .map_err(|e| query_failed("Failed to commit state update", e))?;
        self.notify(StoreChange::Tasks(vec![id.clone()]));

        Ok(StateUpdate::Applied)
    }

    /// Cancel every enqueued or downloading record in one transaction
    ///
    /// Returns the identifiers that were cancelled.
    pub async fn cancel_all_active(&self) -> Result<Vec<TaskId>> {
        let _writer = self.writer.lock().await;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("Failed to begin transaction", e))?;

        let ids: Vec<TaskId> = sqlx::query_scalar(
            "SELECT identifier FROM download_tasks WHERE state IN (?, ?) ORDER BY identifier",
        )
        .bind(ACTIVE_STATES[0].to_i32())
        .bind(ACTIVE_STATES[1].to_i32())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| query_failed("Failed to list active tasks", e))?;

        if ids.is_empty() {
            return Ok(ids);
        }

        sqlx::query(
            r#"
            UPDATE download_tasks
            SET state = ?, bytes_written = NULL, total_bytes = NULL, updated_at = ?
            WHERE state IN (?, ?)
            "#,
        )
        .bind(StateKind::Cancelled.to_i32())
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(ACTIVE_STATES[0].to_i32())
        .bind(ACTIVE_STATES[1].to_i32())
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("Failed to cancel active tasks", e))?;

        tx.commit()
            .await
            .map_err(|e| query_failed("Failed to commit cancel-all", e))?;
        self.notify(StoreChange::Tasks(ids.clone()));

        Ok(ids)
    }

    /// Delete a record and return it, failing with [`Error::NotFound`] if absent
    pub async fn remove(&self, id: &TaskId) -> Result<TaskRecord> {
        let _writer = self.writer.lock().await;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("Failed to begin transaction", e))?;

        let record = match select_row(&mut *tx, id).await? {
            Some(row) => TaskRecord::try_from(row)?,
            None => return Err(Error::NotFound(id.clone())),
        };

        sqlx::query("DELETE FROM download_tasks WHERE identifier = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_failed("Failed to delete task", e))?;

        tx.commit()
            .await
            .map_err(|e| query_failed("Failed to commit task removal", e))?;
        self.notify(StoreChange::Tasks(vec![id.clone()]));

        Ok(record)
    }

    /// Delete every record and return the prior snapshot
    ///
    /// Rows that can no longer be decoded are deleted too but left out of the snapshot.
    pub async fn remove_all(&self) -> Result<Vec<TaskRecord>> {
        let _writer = self.writer.lock().await;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("Failed to begin transaction", e))?;

        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT identifier, url, destination, state, bytes_written, total_bytes, attempt, updated_at
            FROM download_tasks
            ORDER BY updated_at ASC, identifier ASC
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| query_failed("Failed to list tasks", e))?;

        sqlx::query("DELETE FROM download_tasks")
            .execute(&mut *tx)
            .await
            .map_err(|e| query_failed("Failed to delete tasks", e))?;

        tx.commit()
            .await
            .map_err(|e| query_failed("Failed to commit bulk removal", e))?;
        self.notify(StoreChange::All);

        let records = rows
            .into_iter()
            .filter_map(|row| match TaskRecord::try_from(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(error = %e, "Removed undecodable task record");
                    None
                }
            })
            .collect();

        Ok(records)
    }
}
