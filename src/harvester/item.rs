//! Per-item work: detail page, metadata, asset download, record

use crate::config::RetryConfig;
use crate::coordinator::CompletionGuard;
use crate::downloader::StreamingDownloader;
use crate::error::{Error, Result};
use crate::fetch::PageFetcher;
use crate::page::{PageQuery, file_name_from_url, resolve_link};
use crate::progress::ProgressSender;
use crate::retry::execute_with_retry;
use crate::sink::MetadataSink;
use crate::types::{
    BatchId, DownloadTask, HarvestSummary, ItemMetadata, ItemOutcome, ItemRef, ProgressUpdate,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// One dispatched item and the completion guard of its batch
pub(crate) struct ItemJob {
    pub(crate) item: ItemRef,
    pub(crate) period_id: String,
    pub(crate) period_dir: PathBuf,
    pub(crate) guard: CompletionGuard,
}

/// Everything a worker needs, shared by all workers of a run
pub(crate) struct ItemContext {
    pub(crate) fetcher: Arc<dyn PageFetcher>,
    pub(crate) query: Arc<dyn PageQuery>,
    pub(crate) downloader: StreamingDownloader,
    pub(crate) sink: Arc<MetadataSink>,
    pub(crate) progress: ProgressSender,
    pub(crate) page_retry: RetryConfig,
    pub(crate) cancel: CancellationToken,
    pub(crate) summary: Mutex<HarvestSummary>,
}

impl ItemContext {
    pub(crate) fn record(&self, outcome: ItemOutcome) {
        self.summary
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .record(outcome);
    }

    pub(crate) fn take_summary(&self) -> HarvestSummary {
        std::mem::take(
            &mut *self
                .summary
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }
}

/// Run one item to its terminal state and signal its batch exactly once
pub(crate) async fn process_item(ctx: &ItemContext, job: ItemJob) -> ItemOutcome {
    let ItemJob {
        item,
        period_id,
        period_dir,
        guard,
    } = job;
    let batch_id = guard.batch().batch_id().clone();
    let expected = guard.batch().expected();

    let outcome = match harvest_item(ctx, &item, &period_id, period_dir, &batch_id).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_interrupted() => {
            tracing::debug!(url = %item.detail_url, "Item interrupted");
            ItemOutcome::Interrupted
        }
        Err(e) => {
            tracing::warn!(period = %period_id, url = %item.detail_url, error = %e, "Item failed");
            ItemOutcome::Failed
        }
    };

    match guard.complete() {
        Ok(completed) => {
            ctx.progress
                .send(ProgressUpdate::ItemCompleted {
                    batch_id,
                    completed,
                    expected,
                })
                .await;
        }
        Err(e) => tracing::error!(period = %period_id, error = %e, "Completion signal rejected"),
    }
    outcome
}

async fn harvest_item(
    ctx: &ItemContext,
    item: &ItemRef,
    period_id: &str,
    period_dir: PathBuf,
    batch_id: &BatchId,
) -> Result<ItemOutcome> {
    if ctx.cancel.is_cancelled() {
        return Err(Error::Interrupted);
    }

    let operation = format!("fetch detail page {}", item.detail_url);
    let html = execute_with_retry(&ctx.page_retry, &ctx.cancel, &operation, || {
        ctx.fetcher.fetch_page(&item.detail_url)
    })
    .await?;
    let page = ctx.query.extract_metadata(&html)?;

    let Some(asset_href) = page.asset_url else {
        tracing::info!(period = %period_id, title = %page.title, "No asset link, recording metadata only");
        ctx.sink.append(&ItemMetadata {
            title: page.title,
            period_id: period_id.to_string(),
            authors: page.authors,
            asset_url: String::new(),
        })?;
        return Ok(ItemOutcome::RecordedWithoutAsset);
    };

    let asset_url = resolve_link(&item.detail_url, &asset_href)?;
    let file_name = file_name_from_url(&asset_url)?;
    let task = DownloadTask {
        source_url: asset_url,
        destination_path: period_dir.join(file_name),
        batch_id: batch_id.clone(),
    };

    let bytes = ctx.downloader.download(&task).await?;
    ctx.sink.append(&ItemMetadata {
        title: page.title,
        period_id: period_id.to_string(),
        authors: page.authors,
        asset_url: task.source_url,
    })?;
    Ok(ItemOutcome::Recorded { bytes })
}
