//! Archive traversal
//!
//! A run walks `index -> period listing -> item detail page`. Periods are
//! processed one at a time: every item of a period reaches its terminal state
//! (its batch completes) before the next period's listing is fetched, so the
//! files and records of two periods never interleave. Items within a period
//! are spread over a bounded [`pool::WorkerPool`].

mod item;
mod pool;

use crate::config::Config;
use crate::coordinator::{CompletionCoordinator, CompletionGuard};
use crate::downloader::StreamingDownloader;
use crate::error::{Error, Result};
use crate::fetch::{HttpPageFetcher, PageFetcher, download_client, page_client};
use crate::page::{HtmlPageQuery, PageQuery, resolve_link};
use crate::progress::{progress_channel, spawn_progress_reporter};
use crate::retry::execute_with_retry;
use crate::sink::MetadataSink;
use crate::types::{Event, HarvestSummary, ItemOutcome, ItemRef, PeriodRef};
use item::{ItemContext, ItemJob};
use pool::WorkerPool;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Event channel capacity
const EVENT_CHANNEL_BUFFER: usize = 1000;

/// How a single period ended
enum PeriodOutcome {
    Completed,
    Skipped,
}

/// Drives a harvest run
pub struct Harvester {
    config: Arc<Config>,
    fetcher: Arc<dyn PageFetcher>,
    query: Arc<dyn PageQuery>,
    download_client: reqwest::Client,
    coordinator: Arc<CompletionCoordinator>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl Harvester {
    /// Create a harvester with HTTP page fetching and CSS-selector page queries
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let fetcher = HttpPageFetcher::new(page_client(&config)?);
        let query = HtmlPageQuery::new(&config.selectors)?;
        let download_client = download_client(&config)?;
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_BUFFER);

        Ok(Self {
            config: Arc::new(config),
            fetcher: Arc::new(fetcher),
            query: Arc::new(query),
            download_client,
            coordinator: Arc::new(CompletionCoordinator::new()),
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the page query capability
    pub fn with_page_query(mut self, query: impl PageQuery + 'static) -> Self {
        self.query = Arc::new(query);
        self
    }

    /// Replace the page fetcher
    pub fn with_fetcher(mut self, fetcher: impl PageFetcher + 'static) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    /// Subscribe to run events
    ///
    /// Multiple subscribers are supported. A subscriber that falls behind by
    /// more than the channel capacity misses the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that interrupts the run when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Configuration the harvester was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn emit(&self, event: Event) {
        // No subscribers is not an error
        self.event_tx.send(event).ok();
    }

    /// Harvest the whole archive
    ///
    /// Fails only if the metadata file cannot be created, the index page
    /// cannot be fetched, or the run is interrupted ([`Error::Interrupted`]).
    /// Unavailable periods and failed items are logged and counted in the
    /// returned summary.
    pub async fn run(&self) -> Result<HarvestSummary> {
        let started_at = chrono::Utc::now();
        let sink = Arc::new(MetadataSink::initialize(&self.config.metadata_path())?);

        let (progress, progress_rx) = progress_channel();
        let reporter = spawn_progress_reporter(progress_rx, self.event_tx.clone());

        let ctx = Arc::new(ItemContext {
            fetcher: Arc::clone(&self.fetcher),
            query: Arc::clone(&self.query),
            downloader: StreamingDownloader::new(
                self.download_client.clone(),
                &self.config,
                progress.clone(),
                self.cancel.clone(),
            ),
            sink,
            progress,
            page_retry: self.config.page_retry.clone(),
            cancel: self.cancel.clone(),
            summary: Mutex::new(HarvestSummary::default()),
        });
        let pool = WorkerPool::spawn(
            self.config.workers,
            self.config.queue_capacity,
            Arc::clone(&ctx),
        );

        let result = self.harvest_periods(&ctx, &pool).await;

        pool.shutdown().await;
        let items = ctx.take_summary();
        // The reporter stops once the last progress sender is gone
        drop(ctx);
        if let Err(e) = reporter.await {
            tracing::error!(error = %e, "Progress reporter panicked");
        }

        let (periods_processed, periods_skipped) = result?;
        let summary = HarvestSummary {
            periods_processed,
            periods_skipped,
            started_at: Some(started_at),
            finished_at: Some(chrono::Utc::now()),
            ..items
        };

        tracing::info!(
            periods_processed = summary.periods_processed,
            periods_skipped = summary.periods_skipped,
            items_recorded = summary.items_recorded,
            items_without_asset = summary.items_without_asset,
            items_failed = summary.items_failed,
            items_interrupted = summary.items_interrupted,
            bytes_downloaded = summary.bytes_downloaded,
            "Harvest finished"
        );

        if self.cancel.is_cancelled() {
            tracing::warn!("Harvest interrupted");
            self.emit(Event::Interrupted);
            return Err(Error::Interrupted);
        }
        Ok(summary)
    }

    /// Returns (processed, skipped) period counts
    async fn harvest_periods(
        &self,
        ctx: &Arc<ItemContext>,
        pool: &WorkerPool,
    ) -> Result<(usize, usize)> {
        let periods = match self.discover_periods().await {
            Ok(periods) => periods,
            Err(e) if e.is_interrupted() => return Ok((0, 0)),
            Err(e) => return Err(e),
        };
        tracing::info!(periods = periods.len(), "Discovered periods");

        let mut processed = 0;
        let mut skipped = 0;
        for period in periods {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.harvest_period(&period, ctx, pool).await {
                Ok(PeriodOutcome::Completed) => processed += 1,
                Ok(PeriodOutcome::Skipped) => skipped += 1,
                Err(e) if e.is_interrupted() => break,
                Err(e) => return Err(e),
            }
        }
        Ok((processed, skipped))
    }

    /// Fetch the index and turn its links into periods; failure is fatal
    async fn discover_periods(&self) -> Result<Vec<PeriodRef>> {
        let root = self.config.root_url.as_str();
        let operation = format!("fetch index {}", root);
        let html = execute_with_retry(&self.config.page_retry, &self.cancel, &operation, || {
            self.fetcher.fetch_page(root)
        })
        .await
        .inspect_err(|e| {
            if !e.is_interrupted() {
                tracing::error!(url = root, error = %e, "Index page unavailable, aborting");
            }
        })?;

        let mut periods = Vec::new();
        let mut seen = HashSet::new();
        for href in self.query.list_period_links(&html)? {
            let index_url = match resolve_link(root, &href) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(href = %href, error = %e, "Ignoring unresolvable period link");
                    continue;
                }
            };
            match self.query.period_id(&index_url) {
                // The id names the batch and the output directory, so it must be unique
                Some(id) if !seen.insert(id.clone()) => {
                    tracing::debug!(period = %id, url = %index_url, "Ignoring repeated period link");
                }
                Some(id) => periods.push(PeriodRef { id, index_url }),
                None => tracing::warn!(url = %index_url, "Ignoring period link without an id"),
            }
        }
        Ok(periods)
    }

    async fn harvest_period(
        &self,
        period: &PeriodRef,
        ctx: &Arc<ItemContext>,
        pool: &WorkerPool,
    ) -> Result<PeriodOutcome> {
        let operation = format!("fetch listing {}", period.index_url);
        let listing = execute_with_retry(&self.config.page_retry, &self.cancel, &operation, || {
            self.fetcher.fetch_page(&period.index_url)
        })
        .await;
        let html = match listing {
            Ok(html) => html,
            Err(e) if e.is_interrupted() => return Err(e),
            Err(e) => {
                tracing::warn!(period = %period.id, url = %period.index_url, error = %e, "Listing unavailable, skipping period");
                return Ok(self.skip(period, format!("listing unavailable: {e}")));
            }
        };

        let items = match self.query.list_item_links(&html) {
            Ok(links) => self.resolve_items(period, links),
            Err(e) => {
                tracing::warn!(period = %period.id, error = %e, "Unreadable listing, skipping period");
                return Ok(self.skip(period, format!("unreadable listing: {e}")));
            }
        };
        if items.is_empty() {
            tracing::info!(period = %period.id, "No items, skipping period");
            return Ok(self.skip(period, "empty listing".to_string()));
        }

        let period_dir = match ensure_period_dir(&self.config.output_dir, &period.id).await {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!(period = %period.id, error = %e, "Cannot create output directory, skipping period");
                return Ok(self.skip(period, e.to_string()));
            }
        };

        let batch_id = period.batch_id();
        let state = self.coordinator.register(batch_id.clone(), items.len())?;
        tracing::info!(period = %period.id, items = items.len(), "Harvesting period");
        self.emit(Event::PeriodStarted {
            period: period.id.clone(),
            items: items.len(),
        });

        for item in items {
            let guard = CompletionGuard::new(Arc::clone(&state));
            if self.cancel.is_cancelled() {
                // Undispatched items still owe their batch a signal
                drop(guard);
                ctx.record(ItemOutcome::Interrupted);
                continue;
            }

            let job = ItemJob {
                item,
                period_id: period.id.clone(),
                period_dir: period_dir.clone(),
                guard,
            };
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    // The abandoned submit drops the job, which signals its guard
                    ctx.record(ItemOutcome::Interrupted);
                }
                submitted = pool.submit(job) => {
                    if let Err(job) = submitted {
                        tracing::error!(url = %job.item.detail_url, "Item workers stopped, dropping item");
                        ctx.record(ItemOutcome::Failed);
                    }
                }
            }
        }

        self.coordinator.await_batch(&batch_id).await?;
        self.coordinator.remove(&batch_id);

        tracing::info!(period = %period.id, "Period complete");
        self.emit(Event::PeriodCompleted {
            period: period.id.clone(),
        });
        if self.cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }
        Ok(PeriodOutcome::Completed)
    }

    /// Absolute item links in document order, each detail page once
    fn resolve_items(&self, period: &PeriodRef, links: Vec<String>) -> Vec<ItemRef> {
        let mut seen = HashSet::new();
        links
            .into_iter()
            .filter_map(|href| match resolve_link(&period.index_url, &href) {
                Ok(detail_url) if !seen.insert(detail_url.clone()) => {
                    tracing::debug!(period = %period.id, url = %detail_url, "Ignoring repeated item link");
                    None
                }
                Ok(detail_url) => Some(ItemRef { detail_url }),
                Err(e) => {
                    tracing::warn!(period = %period.id, href = %href, error = %e, "Ignoring unresolvable item link");
                    None
                }
            })
            .collect()
    }

    fn skip(&self, period: &PeriodRef, reason: String) -> PeriodOutcome {
        self.emit(Event::PeriodSkipped {
            period: period.id.clone(),
            reason,
        });
        PeriodOutcome::Skipped
    }
}

/// Create (or reuse) the output directory of a period
pub async fn ensure_period_dir(output_dir: &Path, period_id: &str) -> Result<PathBuf> {
    let dir = output_dir.join(period_id);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|source| Error::Filesystem {
            path: dir.clone(),
            source,
        })?;
    Ok(dir)
}
