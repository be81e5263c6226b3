//! Query submission and status polling.
//!
//! A [`QueryService`] accepts a statement and exposes its lifecycle as a
//! [`QueryState`]. [`QueryRunner`] drives one statement to a terminal state
//! with a fixed-interval poll loop and hands back the results location.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::config::QueryConfig;

use crate::error::QueryError;

/// A statement submitted for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub sql: String,
    /// Location the service writes the result file under.
    pub output_location: String,
    pub work_group: String,
}

/// Lifecycle of a query execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
    Queued,
    Running,
    Succeeded { output_location: String },
    Failed { reason: String },
    Cancelled { reason: String },
}

/// What a single status check means for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Succeeded(String),
    Failed { state: &'static str, reason: String },
}

impl QueryState {
    pub fn name(&self) -> &'static str {
        match self {
            QueryState::Queued => "QUEUED",
            QueryState::Running => "RUNNING",
            QueryState::Succeeded { .. } => "SUCCEEDED",
            QueryState::Failed { .. } => "FAILED",
            QueryState::Cancelled { .. } => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueryState::Queued | QueryState::Running)
    }

    pub fn poll_outcome(&self) -> PollOutcome {
        match self {
            QueryState::Queued | QueryState::Running => PollOutcome::Pending,
            QueryState::Succeeded { output_location } => {
                PollOutcome::Succeeded(output_location.clone())
            }
            QueryState::Failed { reason } => PollOutcome::Failed {
                state: "failed",
                reason: reason.clone(),
            },
            QueryState::Cancelled { reason } => PollOutcome::Failed {
                state: "cancelled",
                reason: reason.clone(),
            },
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An interactive query service.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Submit a statement, returning its execution id.
    async fn start_query(&self, request: QueryRequest) -> Result<String, QueryError>;

    /// Current state of a previously submitted execution.
    async fn query_state(&self, execution_id: &str) -> Result<QueryState, QueryError>;
}

/// Runs statements to completion against a [`QueryService`].
#[derive(Clone)]
pub struct QueryRunner {
    service: Arc<dyn QueryService>,
    output_location: String,
    work_group: String,
    poll_interval: Duration,
}

impl QueryRunner {
    pub fn new(service: Arc<dyn QueryService>, config: &QueryConfig) -> Self {
        Self {
            service,
            output_location: config.output_location.clone(),
            work_group: config.work_group.clone(),
            poll_interval: config.poll_interval,
        }
    }

    /// Submit `sql` and block until it finishes, returning the results location.
    pub async fn run(&self, sql: &str) -> Result<String, QueryError> {
        let execution_id = self
            .service
            .start_query(QueryRequest {
                sql: sql.to_string(),
                output_location: self.output_location.clone(),
                work_group: self.work_group.clone(),
            })
            .await?;

        tracing::debug!(
            execution_id = %execution_id,
            work_group = %self.work_group,
            "Submitted query"
        );

        self.wait_for_completion(&execution_id).await
    }

    /// Poll `execution_id` at the fixed interval until it reaches a terminal state.
    pub async fn wait_for_completion(&self, execution_id: &str) -> Result<String, QueryError> {
        let mut polls = 0u64;
        loop {
            let state = self.service.query_state(execution_id).await?;
            polls += 1;

            match state.poll_outcome() {
                PollOutcome::Pending => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                PollOutcome::Succeeded(location) => {
                    tracing::info!(
                        execution_id = %execution_id,
                        polls,
                        results = %location,
                        "Query succeeded"
                    );
                    return Ok(location);
                }
                PollOutcome::Failed { state, reason } => {
                    tracing::error!(
                        execution_id = %execution_id,
                        state,
                        reason = %reason,
                        "Query did not succeed"
                    );
                    return Err(QueryError::ExecutionFailed {
                        execution_id: execution_id.to_string(),
                        state,
                        reason,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    /// Replays a fixed sequence of states, repeating the last one.
    struct ScriptedService {
        states: Mutex<Vec<QueryState>>,
        requests: Mutex<Vec<QueryRequest>>,
        polls: Mutex<usize>,
    }

    impl ScriptedService {
        fn new(states: Vec<QueryState>) -> Self {
            Self {
                states: Mutex::new(states),
                requests: Mutex::new(Vec::new()),
                polls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl QueryService for ScriptedService {
        async fn start_query(&self, request: QueryRequest) -> Result<String, QueryError> {
            self.requests.lock().await.push(request);
            Ok("exec-1".to_string())
        }

        async fn query_state(&self, execution_id: &str) -> Result<QueryState, QueryError> {
            assert_eq!(execution_id, "exec-1");
            *self.polls.lock().await += 1;
            let mut states = self.states.lock().await;
            if states.len() > 1 {
                Ok(states.remove(0))
            } else {
                Ok(states[0].clone())
            }
        }
    }

    fn config() -> QueryConfig {
        QueryConfig {
            output_location: "s3://results/athena".to_string(),
            work_group: "primary".to_string(),
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_poll_outcomes() {
        assert_eq!(QueryState::Queued.poll_outcome(), PollOutcome::Pending);
        assert_eq!(QueryState::Running.poll_outcome(), PollOutcome::Pending);
        assert_eq!(
            QueryState::Succeeded {
                output_location: "s3://r/x.csv".to_string()
            }
            .poll_outcome(),
            PollOutcome::Succeeded("s3://r/x.csv".to_string())
        );
        assert_eq!(
            QueryState::Cancelled {
                reason: "user".to_string()
            }
            .poll_outcome(),
            PollOutcome::Failed {
                state: "cancelled",
                reason: "user".to_string()
            }
        );
        assert!(!QueryState::Running.is_terminal());
        assert!(
            QueryState::Failed {
                reason: String::new()
            }
            .is_terminal()
        );
    }

    #[tokio::test]
    async fn test_run_polls_until_success() {
        let service = Arc::new(ScriptedService::new(vec![
            QueryState::Queued,
            QueryState::Running,
            QueryState::Running,
            QueryState::Succeeded {
                output_location: "s3://results/athena/exec-1.csv".to_string(),
            },
        ]));
        let runner = QueryRunner::new(service.clone(), &config());

        let location = runner.run("SELECT 1").await.unwrap();

        assert_eq!(location, "s3://results/athena/exec-1.csv");
        assert_eq!(*service.polls.lock().await, 4);

        let requests = service.requests.lock().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].sql, "SELECT 1");
        assert_eq!(requests[0].output_location, "s3://results/athena");
        assert_eq!(requests[0].work_group, "primary");
    }

    #[tokio::test]
    async fn test_failed_query_carries_id_and_reason() {
        let service = Arc::new(ScriptedService::new(vec![
            QueryState::Running,
            QueryState::Failed {
                reason: "SYNTAX_ERROR: line 1:8".to_string(),
            },
        ]));
        let runner = QueryRunner::new(service, &config());

        let err = runner.run("SELECT").await.unwrap_err();
        match err {
            QueryError::ExecutionFailed {
                execution_id,
                state,
                reason,
            } => {
                assert_eq!(execution_id, "exec-1");
                assert_eq!(state, "failed");
                assert_eq!(reason, "SYNTAX_ERROR: line 1:8");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_query_is_an_error() {
        let service = Arc::new(ScriptedService::new(vec![QueryState::Cancelled {
            reason: "cancelled by user".to_string(),
        }]));
        let runner = QueryRunner::new(service, &config());

        let err = runner.run("SELECT 1").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Query exec-1 cancelled: cancelled by user"
        );
    }
}
