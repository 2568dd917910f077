//! Common test utilities for archive-harvest integration tests
//!
//! [`ArchiveSite`] serves a small archive shaped like the default selectors
//! expect: an index at `/`, listings at `/paper_files/paper/<year>`, detail
//! pages under `hash/` and assets under `file/`.

#![allow(dead_code)]

use archive_harvest::{Backoff, Config, RetryConfig};
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mock archive backed by a wiremock server
pub struct ArchiveSite {
    pub server: MockServer,
}

impl ArchiveSite {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn root_url(&self) -> String {
        format!("{}/", self.server.uri())
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    pub fn listing_path(year: &str) -> String {
        format!("/paper_files/paper/{year}")
    }

    pub fn detail_path(year: &str, slug: &str) -> String {
        format!("/paper_files/paper/{year}/hash/{slug}-Abstract.html")
    }

    pub fn asset_path(year: &str, slug: &str) -> String {
        format!("/paper_files/paper/{year}/file/{slug}-Paper.pdf")
    }

    /// Index page linking to `years` in order
    pub async fn index(&self, years: &[&str]) {
        let items: String = years
            .iter()
            .map(|y| format!(r#"<li><a href="{}">Advances {y}</a></li>"#, Self::listing_path(y)))
            .collect();
        let html = format!(
            r#"<html><body><div class="container-fluid"><div class="col-sm"><ul>{items}</ul></div></div></body></html>"#
        );
        self.page("/", html).await;
    }

    /// Listing page of `year` linking to the detail pages of `slugs`
    pub async fn listing(&self, year: &str, slugs: &[&str]) {
        let items: String = slugs
            .iter()
            .map(|s| format!(r#"<li><a href="{}">{s}</a></li>"#, Self::detail_path(year, s)))
            .collect();
        self.page(
            &Self::listing_path(year),
            format!("<html><body><ul>{items}</ul></body></html>"),
        )
        .await;
    }

    /// Detail page; links its asset (relative) when `with_asset` is set
    pub async fn detail(&self, year: &str, slug: &str, title: &str, authors: &str, with_asset: bool) {
        let asset = if with_asset {
            format!(r#"<a href="{}">Paper</a>"#, Self::asset_path(year, slug))
        } else {
            String::new()
        };
        let html = format!(
            r#"<html><body><div class="container-fluid">
                <h4>{title}</h4>
                <a href="/paper_files/paper/{year}/file/{slug}-Bibtex.bib">Bibtex</a>
                {asset}
                <h4>Authors</h4>
                <p><i>{authors}</i></p>
            </div></body></html>"#
        );
        self.page(&Self::detail_path(year, slug), html).await;
    }

    /// Asset body for `slug`
    pub async fn asset(&self, year: &str, slug: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(Self::asset_path(year, slug)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&self.server)
            .await;
    }

    /// Respond to `path` with `status` (forever, or the first `times` requests)
    pub async fn fail(&self, request_path: &str, status: u16, times: Option<u64>) {
        let mock = Mock::given(method("GET"))
            .and(path(request_path))
            .respond_with(ResponseTemplate::new(status));
        let mock = match times {
            Some(n) => mock.up_to_n_times(n),
            None => mock,
        };
        mock.mount(&self.server).await;
    }

    async fn page(&self, request_path: &str, html: String) {
        Mock::given(method("GET"))
            .and(path(request_path))
            .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html"))
            .mount(&self.server)
            .await;
    }

    /// Number of requests the server received for `request_path`
    pub async fn hits(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == request_path)
            .count()
    }
}

/// Retry policy with millisecond delays
pub fn fast_retry(max_attempts: u32, backoff: Backoff) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(5),
        backoff,
        max_delay: None,
        jitter: false,
    }
}

/// Configuration pointing at `site`, writing into `output_dir`
pub fn test_config(site: &ArchiveSite, output_dir: &Path) -> Config {
    Config {
        root_url: site.root_url(),
        output_dir: output_dir.to_path_buf(),
        request_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        workers: 4,
        queue_capacity: 4,
        page_retry: fast_retry(3, Backoff::Linear),
        download_retry: fast_retry(5, Backoff::Exponential),
        ..Default::default()
    }
}

/// Deterministic asset body
pub fn asset_bytes(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// All records of a metadata file, header included
pub fn read_metadata(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .expect("metadata file must exist");
    reader
        .records()
        .map(|r| {
            r.expect("metadata must parse")
                .iter()
                .map(str::to_string)
                .collect()
        })
        .collect()
}

/// File names in `dir`, sorted
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
