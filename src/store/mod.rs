// SQLite persistence for locations, raw and aggregated series, the task ledger and
// scheduler job state. Uses sqlx for async + connection pooling.
// Times are stored as INTEGER milliseconds since the Unix epoch (UTC).

mod job_state;
mod ledger;
mod locations;
mod readings;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::config::DatabaseConfig;

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    /// Connects using the `[database]` config section and creates the schema.
    pub async fn open(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let store = Self::connect(&config.path, config.max_pool_size).await?;
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        locations::init_locations_table(&self.pool).await?;
        readings::init_readings_tables(&self.pool).await?;
        ledger::init_ledger_table(&self.pool).await?;
        job_state::init_job_state_table(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| anyhow::anyhow!("timestamp out of range: {}", ms))
}

pub(crate) fn now_millis() -> i64 {
    to_millis(Utc::now())
}
