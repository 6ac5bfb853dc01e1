use super::sample_request;
use crate::db::*;
use crate::types::{Progress, StateKind, TaskId, TaskState};
use std::collections::HashSet;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_insert_and_get_task() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let request = sample_request("a");
    let record = db
        .insert_or_replace(&request, TaskState::Enqueued)
        .await
        .unwrap();
    assert_eq!(record.request, request);
    assert_eq!(record.state, TaskState::Enqueued);
    assert_eq!(record.attempt, 1);

    let fetched = db.get(&request.id).await.unwrap();
    assert_eq!(fetched, record);

    db.pool().close().await;
}

#[tokio::test]
async fn test_get_missing_task() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let missing = TaskId::from("nope");
    let err = db.get(&missing).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(db.get_optional(&missing).await.unwrap().is_none());

    db.pool().close().await;
}

#[tokio::test]
async fn test_replace_overwrites_state_and_bumps_attempt() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let request = sample_request("a");
    db.insert_or_replace(&request, TaskState::Enqueued)
        .await
        .unwrap();
    db.update_state(&request.id, TaskState::Completed)
        .await
        .unwrap();

    let mut moved = request.clone();
    moved.destination = "/elsewhere/a.bin".into();
    let record = db
        .insert_or_replace(&moved, TaskState::Enqueued)
        .await
        .unwrap();

    assert_eq!(record.state, TaskState::Enqueued);
    assert_eq!(record.attempt, 2);
    assert_eq!(record.request.destination, moved.destination);

    db.pool().close().await;
}

#[tokio::test]
async fn test_get_many_returns_only_existing() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    for id in ["a", "b", "c"] {
        db.insert_or_replace(&sample_request(id), TaskState::Enqueued)
            .await
            .unwrap();
    }

    let ids: HashSet<TaskId> = ["a", "c", "zzz"].into_iter().map(TaskId::from).collect();
    let records = db.get_many(&ids).await.unwrap();
    let found: HashSet<TaskId> = records.iter().map(|r| r.id().clone()).collect();
    assert_eq!(found, ["a", "c"].into_iter().map(TaskId::from).collect());

    assert!(db.get_many(&HashSet::new()).await.unwrap().is_empty());

    db.pool().close().await;
}

#[tokio::test]
async fn test_progress_round_trips_through_store() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let request = sample_request("a");
    db.insert_or_replace(&request, TaskState::Enqueued)
        .await
        .unwrap();

    let downloading = TaskState::Downloading(Progress::new(50, 200));
    let outcome = db.update_state(&request.id, downloading).await.unwrap();
    assert_eq!(outcome, StateUpdate::Applied);

    let record = db.get(&request.id).await.unwrap();
    assert_eq!(record.state, downloading);
    assert_eq!(record.state.progress().unwrap().percentage(), 25);

    // Leaving the downloading state clears both counters
    db.update_state(&request.id, TaskState::Completed)
        .await
        .unwrap();
    let row: (Option<i64>, Option<i64>) = sqlx::query_as(
        "SELECT bytes_written, total_bytes FROM download_tasks WHERE identifier = ?",
    )
    .bind("a")
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(row, (None, None));

    db.pool().close().await;
}

#[tokio::test]
async fn test_update_state_bumps_updated_at() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let request = sample_request("a");
    let before = db
        .insert_or_replace(&request, TaskState::Enqueued)
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    db.update_state(&request.id, TaskState::Failed)
        .await
        .unwrap();

    let after = db.get(&request.id).await.unwrap();
    assert!(after.updated_at > before.updated_at);

    db.pool().close().await;
}

#[tokio::test]
async fn test_update_state_missing_is_not_found() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let err = db
        .update_state(&TaskId::from("ghost"), TaskState::Completed)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    db.pool().close().await;
}

#[tokio::test]
async fn test_cancelled_task_ignores_finishing_states() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let request = sample_request("a");
    db.insert_or_replace(&request, TaskState::Enqueued)
        .await
        .unwrap();
    db.update_state(&request.id, TaskState::Cancelled)
        .await
        .unwrap();

    for next in [
        TaskState::Completed,
        TaskState::Failed,
        TaskState::Downloading(Progress::new(1, 2)),
        TaskState::Cancelled,
    ] {
        let outcome = db.update_state(&request.id, next).await.unwrap();
        assert_eq!(
            outcome,
            StateUpdate::Ignored {
                current: TaskState::Cancelled
            }
        );
    }
    assert_eq!(
        db.get(&request.id).await.unwrap().state,
        TaskState::Cancelled
    );

    // Re-enqueue is the way back
    let outcome = db
        .update_state(&request.id, TaskState::Enqueued)
        .await
        .unwrap();
    assert_eq!(outcome, StateUpdate::Applied);

    db.pool().close().await;
}

#[tokio::test]
async fn test_cancel_finished_task_fails() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    for (id, finished) in [("done", TaskState::Completed), ("broken", TaskState::Failed)] {
        let request = sample_request(id);
        db.insert_or_replace(&request, TaskState::Enqueued)
            .await
            .unwrap();
        db.update_state(&request.id, finished).await.unwrap();

        let err = db
            .update_state(&request.id, TaskState::Cancelled)
            .await
            .unwrap_err();
        assert!(err.is_cannot_cancel(), "{id}: {err}");
        assert_eq!(db.get(&request.id).await.unwrap().state, finished);
    }

    db.pool().close().await;
}

#[tokio::test]
async fn test_fenced_update_from_old_attempt_is_superseded() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let request = sample_request("a");
    let first = db
        .insert_or_replace(&request, TaskState::Enqueued)
        .await
        .unwrap();
    let second = db
        .insert_or_replace(&request, TaskState::Enqueued)
        .await
        .unwrap();

    let stale = db
        .update_state_for_attempt(&request.id, first.attempt, TaskState::Completed)
        .await
        .unwrap();
    assert_eq!(stale, StateUpdate::Superseded);
    assert_eq!(db.get(&request.id).await.unwrap().state, TaskState::Enqueued);

    let current = db
        .update_state_for_attempt(&request.id, second.attempt, TaskState::Completed)
        .await
        .unwrap();
    assert_eq!(current, StateUpdate::Applied);

    db.pool().close().await;
}

#[tokio::test]
async fn test_list_by_state() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    for id in ["a", "b", "c"] {
        db.insert_or_replace(&sample_request(id), TaskState::Enqueued)
            .await
            .unwrap();
    }
    db.update_state(&TaskId::from("b"), TaskState::Completed)
        .await
        .unwrap();

    let enqueued = db.list_by_state(StateKind::Enqueued).await.unwrap();
    let ids: Vec<&str> = enqueued.iter().map(|r| r.id().as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"a") && ids.contains(&"c"));

    let completed = db.list_by_state(StateKind::Completed).await.unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id().as_str(), "b");

    assert!(
        db.list_by_state(StateKind::Failed)
            .await
            .unwrap()
            .is_empty()
    );

    db.pool().close().await;
}

#[tokio::test]
async fn test_cancel_all_active_leaves_finished_tasks() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    for id in ["queued", "running", "done", "broken"] {
        db.insert_or_replace(&sample_request(id), TaskState::Enqueued)
            .await
            .unwrap();
    }
    db.update_state(
        &TaskId::from("running"),
        TaskState::Downloading(Progress::new(10, 100)),
    )
    .await
    .unwrap();
    db.update_state(&TaskId::from("done"), TaskState::Completed)
        .await
        .unwrap();
    db.update_state(&TaskId::from("broken"), TaskState::Failed)
        .await
        .unwrap();

    let cancelled = db.cancel_all_active().await.unwrap();
    assert_eq!(
        cancelled,
        vec![TaskId::from("queued"), TaskId::from("running")]
    );

    let state_of = |id: &'static str| {
        let db = &db;
        async move { db.get(&TaskId::from(id)).await.unwrap().state }
    };
    assert_eq!(state_of("queued").await, TaskState::Cancelled);
    assert_eq!(state_of("running").await, TaskState::Cancelled);
    assert_eq!(state_of("done").await, TaskState::Completed);
    assert_eq!(state_of("broken").await, TaskState::Failed);

    // Nothing left to cancel
    assert!(db.cancel_all_active().await.unwrap().is_empty());

    db.pool().close().await;
}

#[tokio::test]
async fn test_remove_returns_prior_record() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let request = sample_request("a");
    db.insert_or_replace(&request, TaskState::Enqueued)
        .await
        .unwrap();

    let removed = db.remove(&request.id).await.unwrap();
    assert_eq!(removed.request, request);
    assert!(db.get(&request.id).await.unwrap_err().is_not_found());
    assert!(db.remove(&request.id).await.unwrap_err().is_not_found());

    db.pool().close().await;
}

#[tokio::test]
async fn test_remove_all_returns_snapshot() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    for id in ["a", "b"] {
        db.insert_or_replace(&sample_request(id), TaskState::Enqueued)
            .await
            .unwrap();
    }

    let removed = db.remove_all().await.unwrap();
    assert_eq!(removed.len(), 2);
    assert!(db.list_all().await.unwrap().is_empty());
    assert!(db.remove_all().await.unwrap().is_empty());

    db.pool().close().await;
}

#[tokio::test]
async fn test_half_set_counters_are_rejected_by_schema() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let result = sqlx::query(
        r#"
        INSERT INTO download_tasks (identifier, url, destination, state, bytes_written, total_bytes, attempt, updated_at)
        VALUES ('x', 'http://example.com/x', '/x', 2, 10, NULL, 1, 0)
        "#,
    )
    .execute(db.pool())
    .await;
    assert!(result.is_err(), "CHECK constraint should reject a lone counter");

    db.pool().close().await;
}

#[tokio::test]
async fn test_corrupt_state_code_is_reported() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    sqlx::query(
        r#"
        INSERT INTO download_tasks (identifier, url, destination, state, attempt, updated_at)
        VALUES ('x', 'http://example.com/x', '/x', 99, 1, 0)
        "#,
    )
    .execute(db.pool())
    .await
    .unwrap();

    let err = db.get(&TaskId::from("x")).await.unwrap_err();
    assert!(matches!(
        err,
        crate::Error::Database(crate::error::DatabaseError::Corrupt { .. })
    ));

    // Bulk removal still clears it
    assert!(db.remove_all().await.unwrap().is_empty());
    assert!(db.get_optional(&TaskId::from("x")).await.unwrap().is_none());

    db.pool().close().await;
}
