//! # archive-harvest
//!
//! Harvests a hierarchical document archive (index page, one listing page per
//! period, one detail page per item), downloading each item's asset and
//! recording its metadata.
//!
//! ## Design
//!
//! - **Resilient** - page fetches and downloads run under configurable retry
//!   policies with linear or exponential backoff
//! - **Bounded memory** - assets are streamed to disk in fixed-size chunks
//! - **Ordered output** - a period's batch completes before the next one starts
//! - **Event-driven** - consumers subscribe to [`Event`]s instead of parsing logs
//!
//! ## Quick Start
//!
//! ```no_run
//! use archive_harvest::{Config, Harvester};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         output_dir: "harvest".into(),
//!         workers: 4,
//!         ..Default::default()
//!     };
//!
//!     let harvester = Harvester::new(config)?;
//!
//!     let mut events = harvester.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = harvester.run().await?;
//!     println!("{} items recorded", summary.items_recorded);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Batch completion tracking
pub mod coordinator;
/// Streaming asset downloads
pub mod downloader;
/// Error types
pub mod error;
/// Page fetching over HTTP
pub mod fetch;
/// Archive traversal
pub mod harvester;
/// Page query capability
pub mod page;
/// Single-owner progress reporting
pub mod progress;
/// Retry logic with backoff
pub mod retry;
/// Metadata output
pub mod sink;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Backoff, Config, PageSelectors, RetryConfig};
pub use coordinator::{BatchState, CompletionCoordinator, CompletionGuard};
pub use downloader::StreamingDownloader;
pub use error::{BatchError, Error, ParseError, Result};
pub use fetch::{HttpPageFetcher, PageFetcher};
pub use harvester::Harvester;
pub use page::{HtmlPageQuery, PageQuery};
pub use sink::MetadataSink;
pub use types::{
    BatchId, DownloadTask, Event, HarvestSummary, ItemMetadata, ItemRef, PageMetadata, PeriodRef,
};

/// Run a harvest with graceful signal handling.
///
/// A termination signal cancels the harvester's token; the run then stops
/// dispatching, lets in-flight items settle and returns [`Error::Interrupted`].
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use archive_harvest::{Config, Harvester, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let harvester = Harvester::new(Config::default())?;
///     let summary = run_with_shutdown(harvester).await?;
///     println!("{:?}", summary);
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(harvester: Harvester) -> Result<HarvestSummary> {
    let cancel = harvester.cancel_token();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                signal = termination_signal() => {
                    tracing::info!(signal, "Stopping harvest, waiting for in-flight items to settle");
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        }
    });

    let result = harvester.run().await;
    watcher.abort();
    result
}

/// Resolves with the name of the first termination signal received
///
/// Handlers that cannot be registered (containers, tests) are skipped; with
/// none left it falls back to `tokio::signal::ctrl_c()`.
#[cfg(unix)]
async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut streams = Vec::new();
    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        match signal(kind) {
            Ok(stream) => streams.push((stream, name)),
            Err(e) => tracing::warn!(signal = name, error = %e, "Could not register signal handler"),
        }
    }

    match streams.as_mut_slice() {
        [(first, first_name), (second, second_name), ..] => tokio::select! {
            _ = first.recv() => *first_name,
            _ = second.recv() => *second_name,
        },
        [(only, name)] => {
            only.recv().await;
            *name
        }
        [] => {
            tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
            "Ctrl+C"
        }
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}
