//! Core types for http-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

use crate::error::Error;

/// Caller-assigned unique identifier of a download task
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::borrow::Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Work to be enqueued: where to fetch from and where to save to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Unique identifier of the request
    pub id: TaskId,
    /// Source URL
    pub url: Url,
    /// Local file path the downloaded file is saved to
    pub destination: PathBuf,
}

impl DownloadRequest {
    /// Create a request saving to an explicit destination path
    pub fn new(id: impl Into<TaskId>, url: Url, destination: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            url,
            destination: destination.into(),
        }
    }

    /// Create a request from a URL string, failing with [`Error::InvalidUrl`] if it does
    /// not parse
    pub fn parse(
        id: impl Into<TaskId>,
        url: &str,
        destination: impl Into<PathBuf>,
    ) -> Result<Self, Error> {
        Ok(Self::new(id, Url::parse(url)?, destination))
    }

    /// Create a request saving `file_name` inside `directory`
    pub fn in_directory(
        id: impl Into<TaskId>,
        url: Url,
        directory: impl AsRef<Path>,
        file_name: &str,
    ) -> Self {
        Self::new(id, url, directory.as_ref().join(file_name))
    }
}

/// Byte counters of a running download.
///
/// Both counters always travel together; `total_bytes` is `-1` when the server did not
/// announce a length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Progress {
    /// Bytes written to disk so far
    pub bytes_written: i64,
    /// Expected total size in bytes (`<= 0` when unknown)
    pub total_bytes: i64,
}

impl Progress {
    /// Create a progress value
    pub fn new(bytes_written: i64, total_bytes: i64) -> Self {
        Self {
            bytes_written,
            total_bytes,
        }
    }

    /// Completion percentage, `floor(100 * bytes_written / total_bytes)`; `0` when the
    /// total is unknown
    pub fn percentage(&self) -> u32 {
        if self.total_bytes <= 0 || self.bytes_written <= 0 {
            return 0;
        }
        let percent = (self.bytes_written as i128 * 100) / self.total_bytes as i128;
        u32::try_from(percent).unwrap_or(u32::MAX)
    }
}

/// Lifecycle state of a download task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    /// No meaningful state
    #[default]
    Undefined,
    /// Waiting for a free slot
    Enqueued,
    /// Transfer in progress
    Downloading(Progress),
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled by the caller; will not run
    Cancelled,
}

/// Discriminant of [`TaskState`], used for filtered scans and persistence
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    /// [`TaskState::Undefined`]
    Undefined,
    /// [`TaskState::Enqueued`]
    Enqueued,
    /// [`TaskState::Downloading`]
    Downloading,
    /// [`TaskState::Completed`]
    Completed,
    /// [`TaskState::Failed`]
    Failed,
    /// [`TaskState::Cancelled`]
    Cancelled,
}

impl StateKind {
    /// Convert integer state code to StateKind, `None` for unknown codes
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(StateKind::Undefined),
            1 => Some(StateKind::Enqueued),
            2 => Some(StateKind::Downloading),
            3 => Some(StateKind::Completed),
            4 => Some(StateKind::Failed),
            5 => Some(StateKind::Cancelled),
            _ => None,
        }
    }

    /// Convert StateKind to integer state code
    pub fn to_i32(&self) -> i32 {
        match self {
            StateKind::Undefined => 0,
            StateKind::Enqueued => 1,
            StateKind::Downloading => 2,
            StateKind::Completed => 3,
            StateKind::Failed => 4,
            StateKind::Cancelled => 5,
        }
    }
}

impl TaskState {
    /// The discriminant of this state
    pub fn kind(&self) -> StateKind {
        match self {
            TaskState::Undefined => StateKind::Undefined,
            TaskState::Enqueued => StateKind::Enqueued,
            TaskState::Downloading(_) => StateKind::Downloading,
            TaskState::Completed => StateKind::Completed,
            TaskState::Failed => StateKind::Failed,
            TaskState::Cancelled => StateKind::Cancelled,
        }
    }

    /// Progress counters, present only while downloading
    pub fn progress(&self) -> Option<Progress> {
        match self {
            TaskState::Downloading(progress) => Some(*progress),
            _ => None,
        }
    }

    /// Rebuild a state from its persisted parts.
    ///
    /// Returns `None` when the counters do not match the kind (downloading without
    /// counters).
    pub fn from_parts(kind: StateKind, progress: Option<Progress>) -> Option<Self> {
        let state = match kind {
            StateKind::Undefined => TaskState::Undefined,
            StateKind::Enqueued => TaskState::Enqueued,
            StateKind::Downloading => TaskState::Downloading(progress?),
            StateKind::Completed => TaskState::Completed,
            StateKind::Failed => TaskState::Failed,
            StateKind::Cancelled => TaskState::Cancelled,
        };
        Some(state)
    }

    /// Whether this is a finishing state (completed, failed or cancelled)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Undefined => f.write_str("undefined"),
            TaskState::Enqueued => f.write_str("enqueued"),
            TaskState::Downloading(p) => write!(
                f,
                "downloading: {}% bytes_written={}, total_bytes={}",
                p.percentage(),
                p.bytes_written,
                p.total_bytes
            ),
            TaskState::Completed => f.write_str("completed"),
            TaskState::Failed => f.write_str("failed"),
            TaskState::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Externally observable snapshot of a task
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadTask {
    /// The request that created this task
    pub request: DownloadRequest,
    /// Latest persisted state
    pub state: TaskState,
}

impl DownloadTask {
    /// Identifier of the task
    pub fn id(&self) -> &TaskId {
        &self.request.id
    }
}

/// Persisted task record, as read back from the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskRecord {
    /// The request that created (or last replaced) this record
    pub request: DownloadRequest,
    /// Current state
    pub state: TaskState,
    /// Incremented by every insert-or-replace of the identifier
    pub attempt: i64,
    /// Time of the last mutation
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Identifier of the record
    pub fn id(&self) -> &TaskId {
        &self.request.id
    }

    /// Project the record into its externally observable snapshot
    pub fn to_task(&self) -> DownloadTask {
        DownloadTask {
            request: self.request.clone(),
            state: self.state,
        }
    }
}

impl From<TaskRecord> for DownloadTask {
    fn from(record: TaskRecord) -> Self {
        DownloadTask {
            request: record.request,
            state: record.state,
        }
    }
}

/// Terminal outcome of one execution, broadcast on [`crate::Downloader::results`]
#[derive(Clone, Debug)]
pub enum DownloadResult {
    /// The file was downloaded to its destination
    Success(DownloadRequest),
    /// The execution was aborted by a cancellation
    Cancelled(DownloadRequest),
    /// The execution failed
    Failure(DownloadRequest, Arc<Error>),
}

impl DownloadResult {
    /// The request this result belongs to
    pub fn request(&self) -> &DownloadRequest {
        match self {
            DownloadResult::Success(request)
            | DownloadResult::Cancelled(request)
            | DownloadResult::Failure(request, _) => request,
        }
    }

    /// The failure cause, `None` for success and cancellation
    pub fn error(&self) -> Option<&Error> {
        match self {
            DownloadResult::Failure(_, error) => Some(error.as_ref()),
            _ => None,
        }
    }
}

/// Intent travelling on the command bus
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the request
    Enqueue(DownloadRequest),
    /// Abort the task with this identifier
    Cancel(TaskId),
    /// Abort every running task
    CancelAll,
}

impl Command {
    /// Whether this command aborts the task `id`
    pub fn cancels(&self, id: &TaskId) -> bool {
        match self {
            Command::Cancel(target) => target == id,
            Command::CancelAll => true,
            Command::Enqueue(_) => false,
        }
    }
}
