//! Query execution for gzsweep.
//!
//! - `execution`: the [`QueryService`] seam and the polling [`QueryRunner`]
//! - `engine`: an embedded DataFusion implementation of [`QueryService`]
//! - `results`: reading delimited result files back from object storage

pub mod engine;
pub mod error;
pub mod execution;
pub mod results;

pub use engine::{DataFusionQueryService, FILE_PATH_COLUMN};
pub use error::{QueryError, ResultsError};
pub use execution::{PollOutcome, QueryRequest, QueryRunner, QueryService, QueryState};
pub use results::{ResultReader, ResultRecord, ResultSet, parse_delimited};
