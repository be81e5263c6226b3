//! Batched deletion of reconciled source files.
//!
//! Batches run strictly in order. The first batch that reports any failed
//! object aborts the run: later batches are never issued and nothing is
//! retried. Objects already deleted stay deleted; the next scheduled run
//! recomputes the candidates from scratch.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use common::storage::StoreProvider;
use futures::StreamExt;
use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;

use crate::error::CleanupError;
use crate::reconcile::{Bucket, DeletionCandidate};

/// Result of one batched delete request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub deleted: usize,
    /// `(key, error)` for every object that was not deleted.
    pub failed: Vec<(String, String)>,
}

/// Issues one batched delete request against a bucket.
#[async_trait]
pub trait BatchDeleter: Send + Sync {
    async fn delete_batch(
        &self,
        bucket: &Bucket,
        keys: &[String],
    ) -> Result<BatchOutcome, CleanupError>;
}

/// [`BatchDeleter`] backed by an object store bulk delete.
#[derive(Debug, Clone)]
pub struct ObjectStoreDeleter {
    stores: Arc<dyn StoreProvider>,
}

impl ObjectStoreDeleter {
    pub fn new(stores: Arc<dyn StoreProvider>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl BatchDeleter for ObjectStoreDeleter {
    async fn delete_batch(
        &self,
        bucket: &Bucket,
        keys: &[String],
    ) -> Result<BatchOutcome, CleanupError> {
        let store = self.stores.store_for(&bucket.url()?)?;
        let mut outcome = BatchOutcome::default();

        let mut requested = Vec::with_capacity(keys.len());
        for key in keys {
            match ObjectPath::from_url_path(key) {
                Ok(path) => requested.push((key, path)),
                Err(e) => outcome.failed.push((key.clone(), e.to_string())),
            }
        }

        let locations = futures::stream::iter(
            requested
                .iter()
                .map(|(_, path)| Ok(path.clone()))
                .collect::<Vec<_>>(),
        )
        .boxed();

        let results: Vec<_> = store.delete_stream(locations).collect().await;
        tally_results(&requested, results, &mut outcome);
        Ok(outcome)
    }
}

/// Match bulk delete results back to the requested keys.
///
/// A requested path without a successful result is failed. Its reason is the
/// error naming that path, else the first error of the request.
fn tally_results(
    requested: &[(&String, ObjectPath)],
    results: Vec<object_store::Result<ObjectPath>>,
    outcome: &mut BatchOutcome,
) {
    let mut deleted = HashSet::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(path) => {
                deleted.insert(path);
            }
            Err(e) => errors.push(e.to_string()),
        }
    }

    for (key, path) in requested {
        if deleted.contains(path) {
            outcome.deleted += 1;
            continue;
        }
        let reason = errors
            .iter()
            .find(|e| e.contains(path.as_ref()))
            .or_else(|| errors.first())
            .cloned()
            .unwrap_or_else(|| "no delete result reported".to_string());
        outcome.failed.push(((*key).clone(), reason));
    }
}

/// Totals of a completed deletion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionSummary {
    pub batches: usize,
    pub deleted: usize,
    pub dry_run: bool,
}

/// Deletes candidates in sequential batches, failing fast.
pub struct DeletionExecutor {
    deleter: Arc<dyn BatchDeleter>,
    batch_size: usize,
    dry_run: bool,
}

impl DeletionExecutor {
    pub fn new(deleter: Arc<dyn BatchDeleter>, batch_size: usize, dry_run: bool) -> Self {
        Self {
            deleter,
            batch_size: batch_size.max(1),
            dry_run,
        }
    }

    pub async fn execute(
        &self,
        bucket: &Bucket,
        candidates: &[DeletionCandidate],
    ) -> Result<DeletionSummary, CleanupError> {
        let mut summary = DeletionSummary {
            dry_run: self.dry_run,
            ..Default::default()
        };
        if candidates.is_empty() {
            tracing::info!(bucket = %bucket, "No files to delete");
            return Ok(summary);
        }

        let total_batches = candidates.len().div_ceil(self.batch_size);
        tracing::info!(
            bucket = %bucket,
            candidates = candidates.len(),
            batch_size = self.batch_size,
            total_batches,
            dry_run = self.dry_run,
            "Starting batch deletion"
        );

        for (index, batch) in candidates.chunks(self.batch_size).enumerate() {
            let batch_number = index + 1;
            let keys: Vec<String> = batch.iter().map(|c| c.key.clone()).collect();

            if self.dry_run {
                tracing::info!(
                    bucket = %bucket,
                    batch = batch_number,
                    total_batches,
                    batch_size = keys.len(),
                    "[DRY-RUN] Would delete batch"
                );
                tracing::debug!(keys = ?keys, "[DRY-RUN] Batch keys");
                summary.batches += 1;
                summary.deleted += keys.len();
                continue;
            }

            let outcome = self.deleter.delete_batch(bucket, &keys).await?;
            summary.batches += 1;
            summary.deleted += outcome.deleted;

            tracing::info!(
                bucket = %bucket,
                batch = batch_number,
                total_batches,
                deleted = outcome.deleted,
                failed = outcome.failed.len(),
                "{} deleted, {} failed",
                outcome.deleted,
                outcome.failed.len()
            );

            if !outcome.failed.is_empty() {
                for (key, error) in &outcome.failed {
                    tracing::error!(bucket = %bucket, key = %key, error = %error, "Failed to delete object");
                }
                return Err(CleanupError::DeleteFailure {
                    batch: batch_number,
                    failed: outcome.failed.len(),
                    errors: outcome.failed,
                });
            }
        }

        tracing::info!(
            bucket = %bucket,
            batches = summary.batches,
            deleted = summary.deleted,
            dry_run = self.dry_run,
            "Batch deletion complete"
        );
        Ok(summary)
    }
}
