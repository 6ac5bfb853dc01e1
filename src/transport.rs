//! HTTP client boundary.
//!
//! [`HttpTransport`] issues one download and reports byte progress as a stream. The stream
//! ends with `None` once the file is in place at its destination and with an `Err` item on
//! failure. Dropping the stream (or the pending `fetch` future) aborts the transfer and
//! removes the partially written staging file.

use crate::config::HttpConfig;
use crate::error::{DownloadError, Error, Result};
use crate::types::{DownloadRequest, Progress};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Byte progress of one transfer: `(bytes_written, total_bytes)` after each write
pub type ProgressStream = BoxStream<'static, Result<Progress>>;

/// Abstraction over the HTTP client, enabling testability.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    /// Start downloading `request.url`
    ///
    /// Bytes are written to `staging` and moved to `request.destination` when the body
    /// is complete. Fails early (before any progress) on connection errors and non-success
    /// statuses.
    async fn fetch(&self, request: &DownloadRequest, staging: &Path) -> Result<ProgressStream>;
}

/// Production [`HttpTransport`] backed by reqwest.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client from the HTTP settings
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn fetch(&self, request: &DownloadRequest, staging: &Path) -> Result<ProgressStream> {
        let url = request.url.to_string();

        let response = self
            .client
            .get(request.url.clone())
            .send()
            .await
            .map_err(|e| DownloadError::Transfer {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                url,
            }
            .into());
        }

        let total = response
            .content_length()
            .and_then(|len| i64::try_from(len).ok())
            .unwrap_or(-1);

        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| write_error(staging, source))?;
        }
        let file = tokio::fs::File::create(staging)
            .await
            .map_err(|source| write_error(staging, source))?;

        tracing::debug!(task_id = %request.id, url = %url, total_bytes = total, "Transfer started");

        let transfer = Transfer {
            body: Box::pin(response.bytes_stream()),
            file: Some(file),
            staged: StagedFile::new(staging.to_path_buf()),
            destination: request.destination.clone(),
            url,
            written: 0,
            total,
            announced: false,
        };
        Ok(transfer.into_stream())
    }
}

fn write_error(path: &Path, source: std::io::Error) -> Error {
    DownloadError::Write {
        path: path.to_path_buf(),
        source,
    }
    .into()
}

/// Removes the staging file on drop unless it has been moved into place
struct StagedFile {
    path: PathBuf,
    armed: bool,
}

impl StagedFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove partial download");
            }
        }
    }
}

struct Transfer<S> {
    body: S,
    // Declared before `staged` so the handle closes before the file is removed
    file: Option<tokio::fs::File>,
    staged: StagedFile,
    destination: PathBuf,
    url: String,
    written: i64,
    total: i64,
    announced: bool,
}

impl<S, B> Transfer<S>
where
    S: Stream<Item = reqwest::Result<B>> + Unpin + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    fn into_stream(self) -> ProgressStream {
        stream::try_unfold(self, |mut t| async move {
            // Announce the length before the first chunk arrives
            if !t.announced {
                t.announced = true;
                return Ok(Some((Progress::new(0, t.total), t)));
            }
            let Some(file) = t.file.as_mut() else {
                return Ok(None);
            };

            match t.body.next().await {
                Some(Ok(chunk)) => {
                    let chunk = chunk.as_ref();
                    file.write_all(chunk)
                        .await
                        .map_err(|source| write_error(&t.staged.path, source))?;
                    t.written += chunk.len() as i64;
                    Ok(Some((Progress::new(t.written, t.total), t)))
                }
                Some(Err(e)) => Err(DownloadError::Transfer {
                    url: t.url.clone(),
                    reason: e.to_string(),
                }
                .into()),
                None => {
                    t.finish().await?;
                    Ok(None)
                }
            }
        })
        .boxed()
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|source| write_error(&self.staged.path, source))?;
        }
        if self.total >= 0 && self.written != self.total {
            return Err(DownloadError::Transfer {
                url: self.url.clone(),
                reason: format!(
                    "body ended after {} of {} bytes",
                    self.written, self.total
                ),
            }
            .into());
        }

        crate::utils::move_into_place(&self.staged.path, &self.destination)
            .await
            .map_err(|source| write_error(&self.destination, source))?;
        self.staged.disarm();

        tracing::debug!(url = %self.url, bytes = self.written, destination = %self.destination.display(), "Transfer complete");
        Ok(())
    }
}
