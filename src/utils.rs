//! Utility functions for file operations and path manipulation

use crate::error::{Error, Result};
use crate::types::TaskId;
use std::path::{Path, PathBuf};

/// Characters of the identifier kept readable in staging file names
const STAGING_PREFIX_LEN: usize = 64;
/// Hex digits of the identifier digest appended to staging file names
const STAGING_DIGEST_LEN: usize = 16;

/// Delete the file at `path` if it exists
///
/// Returns `true` when a file was deleted, `false` when there was nothing to delete.
/// Any other failure is reported as [`Error::FileDeletion`].
pub async fn delete_file_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(Error::FileDeletion {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Delete everything inside `dir`, keeping the directory itself
///
/// A missing directory counts as empty. Deletion continues past individual failures;
/// the first one is returned after every entry has been attempted.
///
/// # Returns
///
/// The number of entries removed.
pub async fn purge_directory(dir: &Path) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(Error::Io(e)),
    };

    let mut removed = 0;
    let mut first_error = None;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        let outcome = if is_dir {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match outcome {
            Ok(()) => removed += 1,
            Err(source) => {
                tracing::warn!(path = %path.display(), error = %source, "Failed to purge entry");
                first_error.get_or_insert(Error::FileDeletion { path, source });
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(removed),
    }
}

/// Scratch file for one execution of a task inside `temp_dir`
///
/// Identifiers are caller-chosen, so anything outside `[A-Za-z0-9._-]` is replaced to keep
/// the result a single path component. The sanitized prefix is lossy; a digest of the raw
/// identifier keeps distinct tasks on distinct files.
pub fn staging_path(temp_dir: &Path, id: &TaskId, attempt: i64) -> PathBuf {
    use sha2::{Digest, Sha256};

    let safe: String = id
        .as_str()
        .chars()
        .take(STAGING_PREFIX_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(id.as_str().as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    temp_dir.join(format!(
        "{}-{}-{}.part",
        safe,
        &digest[..STAGING_DIGEST_LEN],
        attempt
    ))
}

/// Move `from` to `to`, replacing any existing file and creating parent directories
///
/// Falls back to copy-and-delete when a rename is not possible (e.g. across file systems).
pub async fn move_into_place(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_error) => {
            tracing::debug!(
                from = %from.display(),
                to = %to.display(),
                error = %rename_error,
                "Rename failed, copying instead"
            );
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}
