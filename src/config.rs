//! Configuration types for archive-harvest

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Main configuration for a [`Harvester`](crate::Harvester)
///
/// Every knob that the harvest loop, the page fetcher and the downloader need is
/// passed in here; nothing is read from process-wide constants.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// URL of the index page (default: "https://papers.nips.cc/")
    #[serde(default = "default_root_url")]
    pub root_url: String,

    /// Root directory for per-period output directories and the metadata file (default: ".")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Metadata file name, relative to `output_dir` (default: "papers_metadata.csv")
    #[serde(default = "default_metadata_file_name")]
    pub metadata_file_name: String,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Overall timeout for a single request (default: 20 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Connect timeout for a single request (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Number of item workers (default: 10)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the item queue feeding the workers (default: 20)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Write buffer size used while streaming assets to disk (default: 8 KiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Minimum fraction change between two progress reports (default: 0.01)
    #[serde(default = "default_progress_step")]
    pub progress_step: f64,

    /// Retry policy for index, listing and detail pages
    #[serde(default = "RetryConfig::page_fetch")]
    pub page_retry: RetryConfig,

    /// Retry policy for asset downloads
    #[serde(default = "RetryConfig::download")]
    pub download_retry: RetryConfig,

    /// Markup conventions of the archive
    #[serde(default)]
    pub selectors: PageSelectors,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_url: default_root_url(),
            output_dir: default_output_dir(),
            metadata_file_name: default_metadata_file_name(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            chunk_size: default_chunk_size(),
            progress_step: default_progress_step(),
            page_retry: RetryConfig::page_fetch(),
            download_retry: RetryConfig::download(),
            selectors: PageSelectors::default(),
        }
    }
}

impl Config {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the harvester cannot run with
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.root_url)
            .map_err(|e| Error::config("root_url", format!("{}: {}", self.root_url, e)))?;
        if self.workers == 0 {
            return Err(Error::config("workers", "must be greater than zero"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::config("queue_capacity", "must be greater than zero"));
        }
        if self.chunk_size == 0 {
            return Err(Error::config("chunk_size", "must be greater than zero"));
        }
        if !(self.progress_step > 0.0 && self.progress_step <= 1.0) {
            return Err(Error::config(
                "progress_step",
                "must be in the range (0, 1]",
            ));
        }
        if self.metadata_file_name.trim().is_empty() {
            return Err(Error::config("metadata_file_name", "must not be empty"));
        }
        self.page_retry.validate("page_retry")?;
        self.download_retry.validate("download_retry")?;
        Ok(())
    }

    /// Full path of the metadata file
    pub fn metadata_path(&self) -> PathBuf {
        self.output_dir.join(&self.metadata_file_name)
    }
}

/// How the delay grows between attempts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `base_delay × attempt`
    Linear,
    /// `base_delay × 2^(attempt − 1)`
    Exponential,
}

/// Retry policy: how many attempts, and how long to wait after each failure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,

    /// Base delay fed into the backoff function
    #[serde(with = "duration_serde")]
    pub base_delay: Duration,

    /// Backoff function
    pub backoff: Backoff,

    /// Upper bound on a single delay (None = unbounded)
    #[serde(default, with = "optional_duration_serde")]
    pub max_delay: Option<Duration>,

    /// Add random jitter to delays (default: false, delays are exact)
    #[serde(default)]
    pub jitter: bool,
}

impl RetryConfig {
    /// Page-fetch policy: 3 attempts, linear backoff of 2 s × attempt
    pub fn page_fetch() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff: Backoff::Linear,
            max_delay: None,
            jitter: false,
        }
    }

    /// Download policy: 5 attempts, exponential backoff of 1 s × 2^(attempt − 1)
    pub fn download() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            backoff: Backoff::Exponential,
            max_delay: None,
            jitter: false,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => {
                let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    fn validate(&self, key: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config(
                &format!("{key}.max_attempts"),
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::page_fetch()
    }
}

/// Markup conventions used by [`HtmlPageQuery`](crate::page::HtmlPageQuery)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSelectors {
    /// Period links on the index page
    #[serde(default = "default_period_links")]
    pub period_links: String,

    /// Item links on a period listing page
    #[serde(default = "default_item_links")]
    pub item_links: String,

    /// Headings on a detail page; the first one is the title
    #[serde(default = "default_heading")]
    pub heading: String,

    /// Heading text that labels the author block
    #[serde(default = "default_authors_label")]
    pub authors_label: String,

    /// Text contained in the asset link
    #[serde(default = "default_asset_label")]
    pub asset_label: String,
}

impl Default for PageSelectors {
    fn default() -> Self {
        Self {
            period_links: default_period_links(),
            item_links: default_item_links(),
            heading: default_heading(),
            authors_label: default_authors_label(),
            asset_label: default_asset_label(),
        }
    }
}

fn default_root_url() -> String {
    "https://papers.nips.cc/".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_metadata_file_name() -> String {
    "papers_metadata.csv".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/94.0.4606.61 Safari/537.36".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_workers() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    20
}

fn default_chunk_size() -> usize {
    8 * 1024
}

fn default_progress_step() -> f64 {
    0.01
}

fn default_period_links() -> String {
    "body > div.container-fluid > div.col-sm > ul > li > a".to_string()
}

fn default_item_links() -> String {
    "a[href*='/paper/']".to_string()
}

fn default_heading() -> String {
    "h4".to_string()
}

fn default_authors_label() -> String {
    "Authors".to_string()
}

fn default_asset_label() -> String {
    "Paper".to_string()
}

// Durations are written as (possibly fractional) seconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<f64>::deserialize(deserializer)? {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
