// Ledger wrapper: every invocation gets exactly one begin/finish pair, whatever the
// task does (report, error, panic, or cancellation after the shutdown grace).

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use super::{Task, TaskContext, TaskReport};
use crate::error::store_call;
use crate::models::TaskStatus;
use crate::store::Store;

/// Bound on each ledger write.
pub const LEDGER_TIMEOUT: Duration = Duration::from_secs(10);

/// Ledger row id and the terminal status it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedRun {
    pub run_id: i64,
    pub status: TaskStatus,
}

enum RunOutcome {
    Report(TaskReport),
    Error(anyhow::Error),
    Panic(String),
    Cancelled,
}

/// Runs `task` bracketed by a ledger row. `abort` drops the task future and records the
/// run as failed. Only fails if the ledger itself cannot be written.
pub async fn run_tracked(
    store: &Store,
    task: &dyn Task,
    ctx: &TaskContext,
    abort: &CancellationToken,
) -> anyhow::Result<TrackedRun> {
    let task_name = task.name();
    let run_id = store_call(
        "begin_task_run",
        LEDGER_TIMEOUT,
        store.begin_task_run(task_name),
    )
    .await
    .map_err(|e| {
        error!(task = task_name, error = %e, "could not open ledger row; run skipped");
        e
    })?;

    let span = info_span!("task", task = task_name, run_id);
    async move {
        info!("task started");
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = abort.cancelled() => RunOutcome::Cancelled,
            r = AssertUnwindSafe(task.run(ctx)).catch_unwind() => match r {
                Ok(Ok(report)) => RunOutcome::Report(report),
                Ok(Err(e)) => RunOutcome::Error(e),
                Err(panic) => RunOutcome::Panic(panic_message(panic.as_ref())),
            },
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let (status, result, error_message) = match outcome {
            RunOutcome::Report(report) if report.success => {
                info!(duration_ms, result = %report.result, "task completed");
                (TaskStatus::Completed, Some(report.result), report.error)
            }
            RunOutcome::Report(report) => {
                warn!(
                    duration_ms,
                    result = %report.result,
                    errors = report.error.as_deref().unwrap_or(""),
                    "task finished with failures"
                );
                let error = report
                    .error
                    .unwrap_or_else(|| "task reported failure".to_string());
                (TaskStatus::Failed, Some(report.result), Some(error))
            }
            RunOutcome::Error(e) => {
                error!(duration_ms, error = ?e, "task failed");
                (
                    TaskStatus::Failed,
                    None,
                    Some(format!("Error in {}: {:#}", task_name, e)),
                )
            }
            RunOutcome::Panic(msg) => {
                error!(duration_ms, panic = %msg, "task panicked");
                (
                    TaskStatus::Failed,
                    None,
                    Some(format!("Error in {}: panicked: {}", task_name, msg)),
                )
            }
            RunOutcome::Cancelled => {
                warn!(duration_ms, "task cancelled at shutdown");
                (
                    TaskStatus::Failed,
                    None,
                    Some(format!("{} cancelled at shutdown", task_name)),
                )
            }
        };

        if let Err(e) = store_call(
            "finish_task_run",
            LEDGER_TIMEOUT,
            store.finish_task_run(run_id, status, result.as_deref(), error_message.as_deref()),
        )
        .await
        {
            error!(error = %e, "could not finalize ledger row");
            return Err(e.into());
        }
        Ok(TrackedRun { run_id, status })
    }
    .instrument(span)
    .await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
