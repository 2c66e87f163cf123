// Raw (aqi_5_minute_history) and aggregated (aqi_30_minute_history) series.
// measure_data is stored as JSON text. UNIQUE (location, time) backs the
// one-row-per-timestamp invariant; inserts are conflict-safe.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;

use super::{Store, from_millis, now_millis, to_millis};
use crate::models::{AggregatedReading, InsertOutcome, MeasureData, RawReading, SortOrder};

pub(super) async fn init_readings_tables(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aqi_5_minute_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            aqi_location_id INTEGER NOT NULL REFERENCES aqi_location(id),
            measure_time INTEGER NOT NULL,
            measure_data TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (aqi_location_id, measure_time)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_5min_measure_time ON aqi_5_minute_history(measure_time)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aqi_30_minute_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            aqi_location_id INTEGER NOT NULL REFERENCES aqi_location(id),
            bucket_start INTEGER NOT NULL,
            measure_data TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (aqi_location_id, bucket_start)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

impl Store {
    pub async fn raw_exists(
        &self,
        location_id: i64,
        measure_time: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM aqi_5_minute_history WHERE aqi_location_id = $1 AND measure_time = $2",
        )
        .bind(location_id)
        .bind(to_millis(measure_time))
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Single-row insert; a row already present for (location, measure_time) is left as is.
    #[instrument(skip(self, data), fields(repo = "readings", operation = "insert_raw"))]
    pub async fn insert_raw(
        &self,
        location_id: i64,
        measure_time: DateTime<Utc>,
        data: &MeasureData,
    ) -> anyhow::Result<InsertOutcome> {
        let json = serde_json::to_string(data)?;
        let r = sqlx::query(
            r#"
            INSERT INTO aqi_5_minute_history (aqi_location_id, measure_time, measure_data, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (aqi_location_id, measure_time) DO NOTHING
            "#,
        )
        .bind(location_id)
        .bind(to_millis(measure_time))
        .bind(json)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(insert_outcome(r.rows_affected()))
    }

    /// Raw readings in [from, to) for one location. Order: ascending by measure_time.
    #[instrument(skip(self), fields(repo = "readings", operation = "raw_in_range"))]
    pub async fn raw_in_range(
        &self,
        location_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<RawReading>> {
        self.list_raw_readings(location_id, from, to, SortOrder::Asc, None)
            .await
    }

    /// History read for the serving layer: [from, to), sorted, optionally limited.
    pub async fn list_raw_readings(
        &self,
        location_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        order: SortOrder,
        limit: Option<u32>,
    ) -> anyhow::Result<Vec<RawReading>> {
        let sql = format!(
            "SELECT aqi_location_id, measure_time, measure_data FROM aqi_5_minute_history
             WHERE aqi_location_id = $1 AND measure_time >= $2 AND measure_time < $3
             ORDER BY measure_time {} LIMIT $4",
            order.sql()
        );
        let rows = sqlx::query(&sql)
            .bind(location_id)
            .bind(to_millis(from))
            .bind(to_millis(to))
            .bind(limit.map(i64::from).unwrap_or(-1))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(parse_raw_row).collect()
    }

    pub async fn aggregated_exists(
        &self,
        location_id: i64,
        bucket_start: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM aqi_30_minute_history WHERE aqi_location_id = $1 AND bucket_start = $2",
        )
        .bind(location_id)
        .bind(to_millis(bucket_start))
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Bucket starts already aggregated for a location in [from, to).
    #[instrument(skip(self), fields(repo = "readings", operation = "aggregated_bucket_starts"))]
    pub async fn aggregated_bucket_starts(
        &self,
        location_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<BTreeSet<DateTime<Utc>>> {
        let rows = sqlx::query_scalar::<_, i64>(
            "SELECT bucket_start FROM aqi_30_minute_history
             WHERE aqi_location_id = $1 AND bucket_start >= $2 AND bucket_start < $3",
        )
        .bind(location_id)
        .bind(to_millis(from))
        .bind(to_millis(to))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(from_millis).collect()
    }

    /// First write wins: an existing (location, bucket_start) row is never overwritten.
    #[instrument(
        skip(self, averaged),
        fields(repo = "readings", operation = "insert_aggregated")
    )]
    pub async fn insert_aggregated(
        &self,
        location_id: i64,
        bucket_start: DateTime<Utc>,
        averaged: &BTreeMap<String, f64>,
    ) -> anyhow::Result<InsertOutcome> {
        let json = serde_json::to_string(averaged)?;
        let r = sqlx::query(
            r#"
            INSERT INTO aqi_30_minute_history (aqi_location_id, bucket_start, measure_data, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (aqi_location_id, bucket_start) DO NOTHING
            "#,
        )
        .bind(location_id)
        .bind(to_millis(bucket_start))
        .bind(json)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(insert_outcome(r.rows_affected()))
    }

    pub async fn list_aggregated_readings(
        &self,
        location_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        order: SortOrder,
        limit: Option<u32>,
    ) -> anyhow::Result<Vec<AggregatedReading>> {
        let sql = format!(
            "SELECT aqi_location_id, bucket_start, measure_data FROM aqi_30_minute_history
             WHERE aqi_location_id = $1 AND bucket_start >= $2 AND bucket_start < $3
             ORDER BY bucket_start {} LIMIT $4",
            order.sql()
        );
        let rows = sqlx::query(&sql)
            .bind(location_id)
            .bind(to_millis(from))
            .bind(to_millis(to))
            .bind(limit.map(i64::from).unwrap_or(-1))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(parse_aggregated_row).collect()
    }
}

fn insert_outcome(rows_affected: u64) -> InsertOutcome {
    if rows_affected == 0 {
        InsertOutcome::Duplicate
    } else {
        InsertOutcome::Inserted
    }
}

fn parse_raw_row(row: &SqliteRow) -> anyhow::Result<RawReading> {
    let data: String = row.try_get("measure_data")?;
    Ok(RawReading {
        location_id: row.try_get("aqi_location_id")?,
        measure_time: from_millis(row.try_get("measure_time")?)?,
        measure_data: serde_json::from_str(&data)?,
    })
}

fn parse_aggregated_row(row: &SqliteRow) -> anyhow::Result<AggregatedReading> {
    let data: String = row.try_get("measure_data")?;
    Ok(AggregatedReading {
        location_id: row.try_get("aqi_location_id")?,
        bucket_start: from_millis(row.try_get("bucket_start")?)?,
        measure_data: serde_json::from_str(&data)?,
    })
}
