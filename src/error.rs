// Per-item error taxonomy. Task orchestration uses anyhow; these are the errors a task
// classifies, isolates per location or bucket, and reports in its run summary.

use std::time::Duration;
use thiserror::Error;

/// Failure talking to the external reading source. Always recoverable; the next
/// scheduled run is the retry.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source error for location {location}: {source}")]
    Source {
        location: i64,
        #[source]
        source: SourceError,
    },
    #[error("store error during {operation}: {error:#}")]
    Store {
        operation: &'static str,
        error: anyhow::Error,
    },
    #[error("store operation {operation} timed out after {after:?}")]
    StoreTimeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Short classification used in run summaries and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Source { .. } => "source",
            PipelineError::Store { .. } | PipelineError::StoreTimeout { .. } => "store",
            PipelineError::Config(_) => "config",
        }
    }
}

/// Runs a store future under a timeout, mapping both failure modes to [`PipelineError`].
pub async fn store_call<T, F>(
    operation: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, PipelineError>
where
    F: std::future::Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(error)) => Err(PipelineError::Store { operation, error }),
        Err(_) => Err(PipelineError::StoreTimeout { operation, after }),
    }
}
