//! Progress reporting
//!
//! Downloads and workers never write progress themselves. They send
//! [`ProgressUpdate`] messages to one reporter task, which owns all progress
//! output (log lines) and rebroadcasts each update as an [`Event`] for
//! subscribers. Concurrent downloads therefore cannot interleave their output.

use crate::types::{Event, ProgressUpdate};
use tokio::sync::{broadcast, mpsc};

/// Buffer size for the progress channel
pub(crate) const PROGRESS_CHANNEL_BUFFER: usize = 256;

/// Cloneable handle used by workers to reach the reporter
#[derive(Clone, Debug)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressSender {
    /// Deliver an update; updates sent after the reporter stopped are dropped
    pub async fn send(&self, update: ProgressUpdate) {
        self.tx.send(update).await.ok();
    }
}

/// Create the channel between workers and the reporter
pub fn progress_channel() -> (ProgressSender, mpsc::Receiver<ProgressUpdate>) {
    let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_BUFFER);
    (ProgressSender { tx }, rx)
}

/// Spawn the reporter; it exits once every [`ProgressSender`] is dropped
pub fn spawn_progress_reporter(
    mut rx: mpsc::Receiver<ProgressUpdate>,
    event_tx: broadcast::Sender<Event>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            render(&update);
            event_tx.send(to_event(update)).ok();
        }
    })
}

fn render(update: &ProgressUpdate) {
    match update {
        ProgressUpdate::Started {
            batch_id,
            file_name,
            total_bytes,
        } => {
            tracing::info!(period = %batch_id, file = %file_name, total_bytes = ?total_bytes, "Downloading");
        }
        ProgressUpdate::Fraction {
            batch_id,
            file_name,
            fraction,
        } => {
            tracing::debug!(
                period = %batch_id,
                file = %file_name,
                "Downloading {} {:.2}%",
                file_name,
                fraction * 100.0
            );
        }
        ProgressUpdate::Finished {
            batch_id,
            file_name,
            bytes,
        } => {
            tracing::info!(period = %batch_id, file = %file_name, bytes, "Download complete");
        }
        ProgressUpdate::Failed {
            batch_id,
            url,
            error,
        } => {
            tracing::error!(period = %batch_id, url = %url, error = %error, "Download failed");
        }
        ProgressUpdate::ItemCompleted {
            batch_id,
            completed,
            expected,
        } => {
            let percent = if *expected > 0 {
                *completed as f64 / *expected as f64 * 100.0
            } else {
                100.0
            };
            tracing::info!(
                period = %batch_id,
                completed,
                expected,
                "Overall progress {:.2}%",
                percent
            );
        }
    }
}

fn to_event(update: ProgressUpdate) -> Event {
    match update {
        ProgressUpdate::Started {
            batch_id,
            file_name,
            total_bytes,
        } => Event::DownloadStarted {
            period: batch_id.0,
            file_name,
            total_bytes,
        },
        ProgressUpdate::Fraction {
            batch_id,
            file_name,
            fraction,
        } => Event::DownloadProgress {
            period: batch_id.0,
            file_name,
            percent: (fraction * 100.0) as f32,
        },
        ProgressUpdate::Finished {
            batch_id,
            file_name,
            bytes,
        } => Event::DownloadFinished {
            period: batch_id.0,
            file_name,
            bytes,
        },
        ProgressUpdate::Failed {
            batch_id,
            url,
            error,
        } => Event::DownloadFailed {
            period: batch_id.0,
            url,
            error,
        },
        ProgressUpdate::ItemCompleted {
            batch_id,
            completed,
            expected,
        } => Event::ItemCompleted {
            period: batch_id.0,
            completed,
            expected,
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BatchId;

    #[tokio::test]
    async fn test_reporter_rebroadcasts_in_order_and_exits_when_senders_drop() {
        let (event_tx, mut events) = broadcast::channel(16);
        let (sender, rx) = progress_channel();
        let reporter = spawn_progress_reporter(rx, event_tx);

        let batch_id = BatchId::from("2020");
        sender
            .send(ProgressUpdate::Started {
                batch_id: batch_id.clone(),
                file_name: "a.pdf".to_string(),
                total_bytes: Some(10),
            })
            .await;
        sender
            .send(ProgressUpdate::Fraction {
                batch_id: batch_id.clone(),
                file_name: "a.pdf".to_string(),
                fraction: 0.5,
            })
            .await;
        sender
            .send(ProgressUpdate::ItemCompleted {
                batch_id,
                completed: 1,
                expected: 2,
            })
            .await;
        drop(sender);

        reporter.await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            Event::DownloadStarted { total_bytes: Some(10), .. }
        ));
        match events.recv().await.unwrap() {
            Event::DownloadProgress { percent, .. } => assert!((percent - 50.0).abs() < f32::EPSILON),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::ItemCompleted { completed: 1, expected: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_send_after_reporter_stopped_is_ignored() {
        let (sender, rx) = progress_channel();
        drop(rx);
        sender
            .send(ProgressUpdate::Failed {
                batch_id: BatchId::from("x"),
                url: "http://x".to_string(),
                error: "boom".to_string(),
            })
            .await;
    }
}
