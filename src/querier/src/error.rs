use common::storage::StorageError;
use datafusion::error::DataFusionError;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The query reached a terminal state other than success.
    #[error("Query {execution_id} {state}: {reason}")]
    ExecutionFailed {
        execution_id: String,
        state: &'static str,
        reason: String,
    },
    #[error("Unknown query execution '{0}'")]
    UnknownExecution(String),
    #[error("Table '{table}' has no data files under {location}")]
    NoFiles { table: String, location: String },
    #[error("Query engine error: {0}")]
    Engine(#[from] DataFusionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Failed to fetch results from {location}: {source}")]
    Fetch {
        location: String,
        source: object_store::Error,
    },
    #[error("Results at {location} are not valid UTF-8")]
    Encoding {
        location: String,
        source: std::string::FromUtf8Error,
    },
}
