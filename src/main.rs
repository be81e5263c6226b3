use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use cleaner::{CleanupJob, PartitionKey};
use common::cli::{CommonArgs, utils};
use common::storage::UrlStoreProvider;
use querier::DataFusionQueryService;

/// Delete raw compressed files once every row has reached the columnar table.
#[derive(Parser, Debug)]
#[command(name = "gzsweep", version, about)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Partition to clean as YYYY-MM-DD (UTC). Defaults to yesterday.
    #[arg(long)]
    date: Option<String>,

    /// Log the files that would be deleted without deleting them.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    utils::init_logging(&args.common);

    let mut config = utils::load_config(&args.common).context("Failed to load configuration")?;
    if args.dry_run {
        config.cleanup.dry_run = true;
    }

    let partition = PartitionKey::resolve(args.date.as_deref(), Utc::now())?;

    let stores = Arc::new(UrlStoreProvider::from_env());
    let service = DataFusionQueryService::new(&config.catalog.database, stores.clone());
    service
        .register_tables(&config.query.tables)
        .await
        .context("Failed to register query tables")?;

    let job = CleanupJob::from_config(&config, Arc::new(service), stores);
    let report = job
        .run(partition)
        .await
        .with_context(|| format!("Cleanup of partition {partition} failed"))?;

    tracing::info!(
        partition = %report.partition,
        total_files = report.total_files,
        deletable_files = report.deletable_files,
        deleted = report.deleted,
        batches = report.batches,
        skipped_rows = report.skipped_rows,
        dry_run = report.dry_run,
        "Done"
    );
    Ok(())
}
