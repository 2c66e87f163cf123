// scheduler_jobs: persisted trigger bookkeeping so restarts resume the schedule
// instead of re-firing every missed interval.

use sqlx::Row;
use sqlx::SqlitePool;
use tracing::instrument;

use super::{Store, from_millis, now_millis, to_millis};
use crate::models::JobState;

pub(super) async fn init_job_state_table(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduler_jobs (
            job_name TEXT PRIMARY KEY,
            trigger TEXT NOT NULL,
            next_run_at INTEGER NOT NULL,
            last_run_at INTEGER,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

impl Store {
    pub async fn load_job_state(&self, job_name: &str) -> anyhow::Result<Option<JobState>> {
        let row = sqlx::query(
            "SELECT job_name, trigger, next_run_at, last_run_at FROM scheduler_jobs WHERE job_name = $1",
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let last_run_at: Option<i64> = row.try_get("last_run_at")?;
        Ok(Some(JobState {
            job_name: row.try_get("job_name")?,
            trigger: row.try_get("trigger")?,
            next_run_at: from_millis(row.try_get("next_run_at")?)?,
            last_run_at: last_run_at.map(from_millis).transpose()?,
        }))
    }

    #[instrument(
        skip(self, state),
        fields(repo = "scheduler", operation = "save_job_state", job = %state.job_name)
    )]
    pub async fn save_job_state(&self, state: &JobState) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduler_jobs (job_name, trigger, next_run_at, last_run_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (job_name) DO UPDATE SET
                trigger = excluded.trigger,
                next_run_at = excluded.next_run_at,
                last_run_at = excluded.last_run_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.job_name)
        .bind(&state.trigger)
        .bind(to_millis(state.next_run_at))
        .bind(state.last_run_at.map(to_millis))
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
