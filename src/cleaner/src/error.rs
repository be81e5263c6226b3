use common::storage::StorageError;
use querier::{QueryError, ResultsError};
use thiserror::Error;

/// Every way a cleanup run can end early.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// Malformed explicit partition date.
    #[error("Invalid date '{input}': {reason}")]
    Input { input: String, reason: String },

    /// The comparison query reached FAILED or CANCELLED.
    #[error("Query {execution_id} {state}: {reason}")]
    QueryFailure {
        execution_id: String,
        state: &'static str,
        reason: String,
    },

    /// Result files span more than one bucket.
    #[error("Only clean same bucket data, found {} buckets: {}", .buckets.len(), .buckets.join(", "))]
    InvariantViolation { buckets: Vec<String> },

    /// At least one object in a delete batch was not deleted.
    #[error("Delete failed in batch {batch}: {failed} errors")]
    DeleteFailure {
        batch: usize,
        failed: usize,
        errors: Vec<(String, String)>,
    },

    #[error("Invalid identifier '{0}': only ASCII letters, digits and underscores are allowed")]
    InvalidIdentifier(String),

    #[error("Invalid file path '{path}' in query results: {source}")]
    InvalidPath { path: String, source: StorageError },

    #[error(transparent)]
    Query(QueryError),

    #[error(transparent)]
    Results(#[from] ResultsError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<QueryError> for CleanupError {
    fn from(error: QueryError) -> Self {
        match error {
            QueryError::ExecutionFailed {
                execution_id,
                state,
                reason,
            } => CleanupError::QueryFailure {
                execution_id,
                state,
                reason,
            },
            other => CleanupError::Query(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_failure_maps_to_query_failure() {
        let error: CleanupError = QueryError::ExecutionFailed {
            execution_id: "exec-9".to_string(),
            state: "failed",
            reason: "HIVE_BAD_DATA".to_string(),
        }
        .into();

        assert!(matches!(
            &error,
            CleanupError::QueryFailure { execution_id, .. } if execution_id == "exec-9"
        ));
        assert_eq!(error.to_string(), "Query exec-9 failed: HIVE_BAD_DATA");
    }

    #[test]
    fn test_other_query_errors_stay_wrapped() {
        let error: CleanupError = QueryError::UnknownExecution("x".to_string()).into();
        assert!(matches!(error, CleanupError::Query(_)));
    }

    #[test]
    fn test_invariant_message_lists_buckets() {
        let error = CleanupError::InvariantViolation {
            buckets: vec!["s3://b1".to_string(), "s3://b2".to_string()],
        };
        assert_eq!(
            error.to_string(),
            "Only clean same bucket data, found 2 buckets: s3://b1, s3://b2"
        );
    }

    #[test]
    fn test_delete_failure_message() {
        let error = CleanupError::DeleteFailure {
            batch: 2,
            failed: 1,
            errors: vec![("k".to_string(), "AccessDenied".to_string())],
        };
        assert_eq!(error.to_string(), "Delete failed in batch 2: 1 errors");
    }
}
