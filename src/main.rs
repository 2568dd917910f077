//! Command-line entry point for archive-harvest

use archive_harvest::{Config, Error, Harvester, run_with_shutdown};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Exit code after an interrupt (128 + SIGINT)
const EXIT_INTERRUPTED: i32 = 130;

/// Harvest an archive's items, assets and metadata
#[derive(Debug, Parser)]
#[command(name = "archive-harvest", version, about)]
struct Cli {
    /// JSON configuration file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// URL of the archive index page
    #[arg(long)]
    root_url: Option<String>,

    /// Directory receiving per-period asset folders and the metadata file
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Number of concurrent item workers
    #[arg(long)]
    workers: Option<usize>,
}

impl Cli {
    fn into_config(self) -> archive_harvest::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(root_url) = self.root_url {
            config.root_url = root_url;
        }
        if let Some(output_dir) = self.output_dir {
            config.output_dir = output_dir;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("archive_harvest=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.into_config().and_then(Harvester::new) {
        Ok(harvester) => run_with_shutdown(harvester).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(summary) => {
            tracing::info!(
                items_recorded = summary.items_recorded,
                items_failed = summary.items_failed,
                "Done"
            );
        }
        Err(Error::Interrupted) => {
            tracing::warn!("Harvest interrupted");
            std::process::exit(EXIT_INTERRUPTED);
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            std::process::exit(1);
        }
    }
}
