use std::sync::Arc;

use common::config::Configuration;
use common::storage::StoreProvider;
use querier::{QueryRunner, QueryService, ResultReader};

use crate::delete::{BatchDeleter, DeletionExecutor, ObjectStoreDeleter};
use crate::error::CleanupError;
use crate::partition::PartitionKey;
use crate::reconcile::ReconciliationEngine;

/// What a single cleanup run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub partition: String,
    pub total_files: usize,
    pub deletable_files: usize,
    pub skipped_rows: usize,
    pub batches: usize,
    pub deleted: usize,
    pub dry_run: bool,
}

/// Reconciles one partition and deletes the fully migrated source files.
pub struct CleanupJob {
    engine: ReconciliationEngine,
    executor: DeletionExecutor,
}

impl CleanupJob {
    pub fn new(engine: ReconciliationEngine, executor: DeletionExecutor) -> Self {
        Self { engine, executor }
    }

    /// Wire a job from configuration, deleting through the object store.
    pub fn from_config(
        config: &Configuration,
        service: Arc<dyn QueryService>,
        stores: Arc<dyn StoreProvider>,
    ) -> Self {
        let deleter: Arc<dyn BatchDeleter> = Arc::new(ObjectStoreDeleter::new(stores.clone()));
        Self::with_deleter(config, service, stores, deleter)
    }

    /// Wire a job from configuration with a custom deleter.
    pub fn with_deleter(
        config: &Configuration,
        service: Arc<dyn QueryService>,
        stores: Arc<dyn StoreProvider>,
        deleter: Arc<dyn BatchDeleter>,
    ) -> Self {
        let engine = ReconciliationEngine::new(
            config.catalog.clone(),
            QueryRunner::new(service, &config.query),
            ResultReader::new(stores),
        );
        let executor = DeletionExecutor::new(
            deleter,
            config.cleanup.batch_size,
            config.cleanup.dry_run,
        );
        Self::new(engine, executor)
    }

    pub async fn run(&self, partition: PartitionKey) -> Result<CleanupReport, CleanupError> {
        tracing::info!(partition = %partition, "Starting cleanup");

        let reconciliation = self.engine.reconcile(partition).await?;
        let mut report = CleanupReport {
            partition: partition.to_string(),
            total_files: reconciliation.records.len(),
            deletable_files: reconciliation.candidates.len(),
            skipped_rows: reconciliation.skipped_rows,
            ..Default::default()
        };

        let Some(bucket) = reconciliation.bucket else {
            tracing::info!(partition = %partition, "No files found for partition");
            return Ok(report);
        };

        let summary = self
            .executor
            .execute(&bucket, &reconciliation.candidates)
            .await?;
        report.batches = summary.batches;
        report.deleted = summary.deleted;
        report.dry_run = summary.dry_run;

        tracing::info!(
            partition = %partition,
            bucket = %bucket,
            total_files = report.total_files,
            deleted = report.deleted,
            batches = report.batches,
            dry_run = report.dry_run,
            "Cleanup complete"
        );
        Ok(report)
    }
}
