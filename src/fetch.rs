//! Page fetching over HTTP

use crate::config::Config;
use crate::error::{Error, Result};

/// Fetches the markup of a page
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url` and return its body as text; non-2xx statuses are errors
    async fn fetch_page(&self, url: &str) -> Result<String>;
}

/// Client for page fetches: the whole request is bounded by `request_timeout`
pub fn page_client(config: &Config) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .build()?)
}

/// Client for asset downloads
///
/// Only connecting is bounded here; a large asset may legitimately stream for
/// longer than `request_timeout`, so the downloader bounds each read instead.
pub fn download_client(config: &Config) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(config.connect_timeout)
        .build()?)
}

/// Production [`PageFetcher`] backed by `reqwest`
#[derive(Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    /// Wrap an existing client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        tracing::debug!(url, "Fetching page");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.text().await?)
    }
}
