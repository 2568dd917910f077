//! Core types and events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier of a batch (one per period)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    /// Create a new BatchId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BatchId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One traversal unit of the archive (e.g. a year)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRef {
    /// Period identifier, also used as the output directory name
    pub id: String,
    /// Absolute URL of the period's listing page
    pub index_url: String,
}

impl PeriodRef {
    /// Batch id used to track this period's items
    pub fn batch_id(&self) -> BatchId {
        BatchId::new(self.id.clone())
    }
}

/// One leaf unit within a period
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    /// Absolute URL of the item's detail page
    pub detail_url: String,
}

/// Fields extracted from a detail page
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageMetadata {
    /// Item title
    pub title: String,
    /// Author list as displayed
    pub authors: String,
    /// Link to the primary asset, if the page has one (may be relative)
    pub asset_url: Option<String>,
}

/// Metadata record written once per successfully harvested item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Item title
    pub title: String,
    /// Period the item belongs to
    pub period_id: String,
    /// Author list
    pub authors: String,
    /// Absolute asset URL, empty when the item has no asset
    pub asset_url: String,
}

/// One unit of work for the streaming downloader
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadTask {
    /// Asset URL
    pub source_url: String,
    /// Final location of the downloaded file
    pub destination_path: PathBuf,
    /// Batch the task belongs to
    pub batch_id: BatchId,
}

/// Per-attempt progress accounting
///
/// Exists only for the duration of one download attempt. A fraction is
/// reported only when it moved by at least `step` since the last report, and
/// never when the total size is unknown.
#[derive(Clone, Debug)]
pub struct DownloadProgress {
    /// Bytes written so far in this attempt
    pub bytes_read: u64,
    /// Total size declared by the server
    pub total_bytes: Option<u64>,
    /// Last fraction handed to the reporter
    pub last_reported_fraction: Option<f64>,
    step: f64,
}

impl DownloadProgress {
    /// Start accounting for a new attempt
    pub fn new(total_bytes: Option<u64>, step: f64) -> Self {
        Self {
            bytes_read: 0,
            // A zero length gives nothing to divide by
            total_bytes: total_bytes.filter(|&total| total > 0),
            last_reported_fraction: None,
            step,
        }
    }

    /// Account for `len` more bytes; returns the fraction to report, if any
    pub fn advance(&mut self, len: u64) -> Option<f64> {
        self.bytes_read += len;
        let total = self.total_bytes?;
        let fraction = (self.bytes_read as f64 / total as f64).min(1.0);

        let due = match self.last_reported_fraction {
            None => true,
            Some(last) => fraction - last >= self.step || (fraction >= 1.0 && last < 1.0),
        };
        if due {
            self.last_reported_fraction = Some(fraction);
            Some(fraction)
        } else {
            None
        }
    }
}

/// Message sent from workers to the single progress reporter
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressUpdate {
    /// A download attempt has started
    Started {
        /// Batch the download belongs to
        batch_id: BatchId,
        /// Local file name
        file_name: String,
        /// Declared size, if known
        total_bytes: Option<u64>,
    },
    /// The fraction of a download attempt moved past the reporting step
    Fraction {
        /// Batch the download belongs to
        batch_id: BatchId,
        /// Local file name
        file_name: String,
        /// Completed fraction (0.0 to 1.0)
        fraction: f64,
    },
    /// A download finished successfully
    Finished {
        /// Batch the download belongs to
        batch_id: BatchId,
        /// Local file name
        file_name: String,
        /// Bytes written
        bytes: u64,
    },
    /// A download failed permanently
    Failed {
        /// Batch the download belongs to
        batch_id: BatchId,
        /// Asset URL
        url: String,
        /// Error message
        error: String,
    },
    /// One item of a batch reached its terminal state
    ItemCompleted {
        /// Batch the item belongs to
        batch_id: BatchId,
        /// Items completed so far in this batch
        completed: usize,
        /// Items dispatched in this batch
        expected: usize,
    },
}

/// Event emitted during a harvest run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A period's listing was fetched and its items are being dispatched
    PeriodStarted {
        /// Period id
        period: String,
        /// Number of items in the listing
        items: usize,
    },

    /// A period was skipped (listing unavailable, empty, or no output location)
    PeriodSkipped {
        /// Period id
        period: String,
        /// Why it was skipped
        reason: String,
    },

    /// A download attempt has started
    DownloadStarted {
        /// Period id
        period: String,
        /// Local file name
        file_name: String,
        /// Declared size in bytes
        #[serde(skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
    },

    /// Download progress update
    DownloadProgress {
        /// Period id
        period: String,
        /// Local file name
        file_name: String,
        /// Progress percentage (0.0 to 100.0)
        percent: f32,
    },

    /// Download finished
    DownloadFinished {
        /// Period id
        period: String,
        /// Local file name
        file_name: String,
        /// Bytes written
        bytes: u64,
    },

    /// Download failed after all retries
    DownloadFailed {
        /// Period id
        period: String,
        /// Asset URL
        url: String,
        /// Error message
        error: String,
    },

    /// Overall progress within a period
    ItemCompleted {
        /// Period id
        period: String,
        /// Items completed so far
        completed: usize,
        /// Items in the period
        expected: usize,
    },

    /// All items of a period reached a terminal state
    PeriodCompleted {
        /// Period id
        period: String,
    },

    /// The run is stopping because of an interrupt
    Interrupted,
}

/// Terminal outcome of one dispatched item
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Asset downloaded and metadata recorded
    Recorded {
        /// Bytes downloaded
        bytes: u64,
    },
    /// No asset link on the page; metadata recorded without one
    RecordedWithoutAsset,
    /// Detail page, parse, download, or record step failed
    Failed,
    /// Stopped because the run was interrupted
    Interrupted,
}

/// Counters describing a finished run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestSummary {
    /// Periods whose batch completed
    pub periods_processed: usize,
    /// Periods skipped (unavailable listing, empty, or output location failure)
    pub periods_skipped: usize,
    /// Items recorded with a downloaded asset
    pub items_recorded: usize,
    /// Items recorded without an asset
    pub items_without_asset: usize,
    /// Items that failed permanently
    pub items_failed: usize,
    /// Items stopped by an interrupt
    pub items_interrupted: usize,
    /// Total asset bytes written
    pub bytes_downloaded: u64,
    /// When the run started
    pub started_at: Option<DateTime<Utc>>,
    /// When the run finished
    pub finished_at: Option<DateTime<Utc>>,
}

impl HarvestSummary {
    /// Fold one item outcome into the counters
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Recorded { bytes } => {
                self.items_recorded += 1;
                self.bytes_downloaded += bytes;
            }
            ItemOutcome::RecordedWithoutAsset => self.items_without_asset += 1,
            ItemOutcome::Failed => self.items_failed += 1,
            ItemOutcome::Interrupted => self.items_interrupted += 1,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reports_first_chunk_then_every_step() {
        let mut progress = DownloadProgress::new(Some(1000), 0.01);
        assert_eq!(progress.advance(5), Some(0.005));
        // +0.005 is below the step
        assert_eq!(progress.advance(5), None);
        assert_eq!(progress.advance(10), Some(0.02));
        assert_eq!(progress.bytes_read, 20);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut progress = DownloadProgress::new(Some(10_000), 0.01);
        let mut reported = Vec::new();
        for len in [1u64, 7, 130, 3, 900, 2, 2048, 64, 5000, 1845] {
            if let Some(f) = progress.advance(len) {
                reported.push(f);
            }
        }
        assert!(reported.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(reported.last().copied(), Some(1.0));
    }

    #[test]
    fn test_progress_unknown_total_never_reports() {
        let mut progress = DownloadProgress::new(None, 0.01);
        assert_eq!(progress.advance(4096), None);
        assert_eq!(progress.advance(4096), None);
        assert_eq!(progress.bytes_read, 8192);

        let mut zero = DownloadProgress::new(Some(0), 0.01);
        assert_eq!(zero.advance(10), None);
    }

    #[test]
    fn test_summary_record() {
        let mut summary = HarvestSummary::default();
        summary.record(ItemOutcome::Recorded { bytes: 10 });
        summary.record(ItemOutcome::Recorded { bytes: 5 });
        summary.record(ItemOutcome::RecordedWithoutAsset);
        summary.record(ItemOutcome::Failed);
        summary.record(ItemOutcome::Interrupted);
        assert_eq!(summary.items_recorded, 2);
        assert_eq!(summary.bytes_downloaded, 15);
        assert_eq!(summary.items_without_asset, 1);
        assert_eq!(summary.items_failed, 1);
        assert_eq!(summary.items_interrupted, 1);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = Event::PeriodSkipped {
            period: "2020".to_string(),
            reason: "empty listing".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "period_skipped");
        assert_eq!(json["period"], "2020");
    }
}
