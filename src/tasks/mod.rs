// Scheduled tasks and the shared plumbing they run through.

pub mod aggregation;
pub mod buckets;
pub mod ingestion;
mod runner;

pub use runner::{TrackedRun, run_tracked};

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Per-invocation context handed to a task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Cooperative stop: finish the current location/bucket, start no new one.
    pub stop: CancellationToken,
}

impl TaskContext {
    pub fn new(stop: CancellationToken) -> Self {
        Self { stop }
    }

    /// Context for a manual one-off run that nothing will stop.
    pub fn detached() -> Self {
        Self::new(CancellationToken::new())
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }
}

/// What a finished run reports to the ledger.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub success: bool,
    /// JSON summary stored as the ledger row's result.
    pub result: String,
    /// Condensed item errors, stored as the ledger row's error_message when set.
    pub error: Option<String>,
}

impl TaskReport {
    pub fn from_summary<S: Serialize>(
        success: bool,
        summary: &S,
        errors: &[String],
    ) -> anyhow::Result<Self> {
        Ok(Self {
            success,
            result: serde_json::to_string(summary)?,
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
        })
    }
}

/// A unit of scheduled work. Errors returned here are task-level failures; per-item
/// failures belong in the report.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<TaskReport>;
}
