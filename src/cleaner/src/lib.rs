//! Cleanup of raw compressed files that were fully converted to the columnar table.
//!
//! A run takes one day partition, compares per-file row counts between the
//! source and target tables, and deletes every source file whose rows all
//! made it across. Deletion is restricted to a single bucket per run and
//! aborts on the first failed batch.

pub mod delete;
pub mod error;
pub mod job;
pub mod partition;
pub mod reconcile;

pub use delete::{
    BatchDeleter, BatchOutcome, DeletionExecutor, DeletionSummary, ObjectStoreDeleter,
};
pub use error::CleanupError;
pub use job::{CleanupJob, CleanupReport};
pub use partition::PartitionKey;
pub use reconcile::{
    Bucket, DeletionCandidate, FileRecord, Reconciliation, ReconciliationEngine, comparison_query,
};
