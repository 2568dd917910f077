//! Streaming asset downloads
//!
//! An attempt streams the response body into `<destination>.part` through a
//! fixed-capacity write buffer, so memory stays bounded by the chunk size no
//! matter how large the asset is. The part file is renamed to its final name
//! only after the whole body (and the declared length, when there is one) has
//! been written. A failed or interrupted attempt deletes the part file and the
//! next attempt starts again from byte zero.

use crate::config::{Config, RetryConfig};
use crate::error::{Error, Result};
use crate::progress::ProgressSender;
use crate::retry::execute_with_retry;
use crate::types::{DownloadProgress, DownloadTask, ProgressUpdate};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

/// Downloads assets under the download retry policy
pub struct StreamingDownloader {
    client: reqwest::Client,
    retry: RetryConfig,
    chunk_size: usize,
    read_timeout: Duration,
    progress_step: f64,
    progress: ProgressSender,
    cancel: CancellationToken,
}

impl StreamingDownloader {
    /// Create a downloader using the download settings of `config`
    pub fn new(
        client: reqwest::Client,
        config: &Config,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            retry: config.download_retry.clone(),
            chunk_size: config.chunk_size,
            read_timeout: config.request_timeout,
            progress_step: config.progress_step,
            progress,
            cancel,
        }
    }

    /// Download `task.source_url` to `task.destination_path`
    ///
    /// Returns the number of bytes written. After the retry budget is spent the
    /// error is [`Error::ExhaustedRetries`]; on cancellation it is
    /// [`Error::Interrupted`]. No partial file remains in either case.
    pub async fn download(&self, task: &DownloadTask) -> Result<u64> {
        let operation = format!("download {}", task.source_url);
        let result =
            execute_with_retry(&self.retry, &self.cancel, &operation, || self.attempt(task)).await;

        match &result {
            Ok(bytes) => {
                self.progress
                    .send(ProgressUpdate::Finished {
                        batch_id: task.batch_id.clone(),
                        file_name: display_name(&task.destination_path),
                        bytes: *bytes,
                    })
                    .await;
            }
            Err(e) if !e.is_interrupted() => {
                self.progress
                    .send(ProgressUpdate::Failed {
                        batch_id: task.batch_id.clone(),
                        url: task.source_url.clone(),
                        error: e.to_string(),
                    })
                    .await;
            }
            Err(_) => {}
        }
        result
    }

    /// One attempt: stream into the part file, then move it into place
    async fn attempt(&self, task: &DownloadTask) -> Result<u64> {
        let part = part_path(&task.destination_path);

        let bytes = match self.stream_to(task, &part).await {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&part).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&part, &task.destination_path).await {
            discard(&part).await;
            return Err(e.into());
        }
        Ok(bytes)
    }

    async fn stream_to(&self, task: &DownloadTask, part: &Path) -> Result<u64> {
        let mut response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Interrupted),
            sent = self.client.get(&task.source_url).send() => sent?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: task.source_url.clone(),
            });
        }

        let total_bytes = response.content_length();
        let file_name = display_name(&task.destination_path);
        self.progress
            .send(ProgressUpdate::Started {
                batch_id: task.batch_id.clone(),
                file_name: file_name.clone(),
                total_bytes,
            })
            .await;

        let file = tokio::fs::File::create(part).await?;
        let mut writer = BufWriter::with_capacity(self.chunk_size, file);
        let mut progress = DownloadProgress::new(total_bytes, self.progress_step);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Interrupted),
                read = tokio::time::timeout(self.read_timeout, response.chunk()) => match read {
                    Ok(chunk) => chunk?,
                    Err(_) => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            format!("no data from {} for {:?}", task.source_url, self.read_timeout),
                        )
                        .into());
                    }
                },
            };
            let Some(chunk) = chunk else {
                break;
            };

            writer.write_all(&chunk).await?;
            if let Some(fraction) = progress.advance(chunk.len() as u64) {
                self.progress
                    .send(ProgressUpdate::Fraction {
                        batch_id: task.batch_id.clone(),
                        file_name: file_name.clone(),
                        fraction,
                    })
                    .await;
            }
        }

        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        if let Some(expected) = total_bytes
            && progress.bytes_read != expected
        {
            return Err(Error::IncompleteDownload {
                expected,
                received: progress.bytes_read,
            });
        }
        Ok(progress.bytes_read)
    }
}

/// Temporary location used while an attempt is in flight
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

async fn discard(part: &Path) {
    match tokio::fs::remove_file(part).await {
        Ok(()) => tracing::debug!(path = %part.display(), "Discarded partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %part.display(), error = %e, "Failed to remove partial download")
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
