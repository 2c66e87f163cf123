// task_logs: execution ledger. One row per invocation, inserted as 'started' and
// moved to a terminal status exactly once.

use sqlx::Row;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;

use super::{Store, from_millis, now_millis};
use crate::models::{TaskRun, TaskStatus};

pub(super) async fn init_ledger_table(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_name TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            error_message TEXT,
            result TEXT,
            is_successful INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_task_logs_task_name ON task_logs(task_name)")
        .execute(pool)
        .await?;

    Ok(())
}

impl Store {
    /// Inserts a `started` row and returns its id.
    #[instrument(skip(self), fields(repo = "ledger", operation = "begin_task_run"))]
    pub async fn begin_task_run(&self, task_name: &str) -> anyhow::Result<i64> {
        let r = sqlx::query(
            "INSERT INTO task_logs (task_name, status, started_at, is_successful) VALUES ($1, $2, $3, 0)",
        )
        .bind(task_name)
        .bind(TaskStatus::Started.as_str())
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(r.last_insert_rowid())
    }

    /// Moves a `started` row to `status`. Fails if the row is unknown or already finished.
    #[instrument(
        skip(self, result, error_message),
        fields(repo = "ledger", operation = "finish_task_run")
    )]
    pub async fn finish_task_run(
        &self,
        run_id: i64,
        status: TaskStatus,
        result: Option<&str>,
        error_message: Option<&str>,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(
            status.is_terminal(),
            "finish_task_run needs a terminal status, got {}",
            status
        );
        let r = sqlx::query(
            r#"
            UPDATE task_logs
            SET status = $1, completed_at = $2, result = $3, error_message = $4, is_successful = $5
            WHERE id = $6 AND status = 'started'
            "#,
        )
        .bind(status.as_str())
        .bind(now_millis())
        .bind(result)
        .bind(error_message)
        .bind(status == TaskStatus::Completed)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        anyhow::ensure!(
            r.rows_affected() == 1,
            "task run {} is unknown or already finished",
            run_id
        );
        Ok(())
    }

    pub async fn get_task_run(&self, run_id: i64) -> anyhow::Result<Option<TaskRun>> {
        let row = sqlx::query(
            "SELECT id, task_name, status, started_at, completed_at, error_message, result, is_successful
             FROM task_logs WHERE id = $1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_task_run_row).transpose()
    }

    /// Latest runs first. `task_name` filters to one task when set.
    pub async fn recent_task_runs(
        &self,
        task_name: Option<&str>,
        limit: u32,
    ) -> anyhow::Result<Vec<TaskRun>> {
        let rows = sqlx::query(
            "SELECT id, task_name, status, started_at, completed_at, error_message, result, is_successful
             FROM task_logs WHERE ($1 IS NULL OR task_name = $1)
             ORDER BY id DESC LIMIT $2",
        )
        .bind(task_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_task_run_row).collect()
    }
}

fn parse_task_run_row(row: &SqliteRow) -> anyhow::Result<TaskRun> {
    let status: String = row.try_get("status")?;
    let completed_at: Option<i64> = row.try_get("completed_at")?;
    Ok(TaskRun {
        id: row.try_get("id")?,
        task_name: row.try_get("task_name")?,
        status: status.parse()?,
        started_at: from_millis(row.try_get("started_at")?)?,
        completed_at: completed_at.map(from_millis).transpose()?,
        error_message: row.try_get("error_message")?,
        result: row.try_get("result")?,
        is_successful: row.try_get("is_successful")?,
    })
}
