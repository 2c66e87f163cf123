// Ingestion: pull a trailing window of readings per location from the source and
// append the ones not stored yet. Locations are isolated from each other; the overlap
// between runs is absorbed by the (location, measure_time) uniqueness.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{Task, TaskContext, TaskReport};
use crate::error::{PipelineError, SourceError, store_call};
use crate::models::{InsertOutcome, Location, MeasureData};
use crate::source::ReadingSource;
use crate::store::Store;

pub const INGESTION_TASK_NAME: &str = "pull_airgradient_data";

/// Key in a source record that carries the measurement time.
pub const TIMESTAMP_FIELD: &str = "timestamp";

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Trailing window requested on every run; overlaps the previous run on purpose.
    pub lookback: Duration,
    pub max_concurrency: usize,
    pub source_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(60 * 60),
            max_concurrency: 4,
            source_timeout: Duration::from_secs(35),
            store_timeout: Duration::from_secs(10),
        }
    }
}

/// Run summary, stored as JSON in the ledger row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub locations_total: usize,
    /// Locations that completed without error.
    pub locations_processed: usize,
    pub locations_failed: usize,
    /// Locations never started because a stop was requested.
    pub locations_skipped: usize,
    pub readings_fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub invalid: usize,
    pub interrupted: bool,
    pub errors: Vec<String>,
}

impl IngestionSummary {
    pub fn is_success(&self) -> bool {
        self.locations_failed == 0 && !self.interrupted
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LocationCounts {
    fetched: usize,
    inserted: usize,
    duplicates: usize,
    invalid: usize,
}

enum LocationOutcome {
    Done(LocationCounts),
    Failed(LocationCounts, PipelineError),
    Skipped,
}

pub struct IngestionTask {
    store: Arc<Store>,
    source: Arc<dyn ReadingSource>,
    config: IngestionConfig,
}

impl IngestionTask {
    pub fn new(store: Arc<Store>, source: Arc<dyn ReadingSource>, config: IngestionConfig) -> Self {
        Self {
            store,
            source,
            config,
        }
    }

    pub async fn ingest(&self, ctx: &TaskContext) -> anyhow::Result<IngestionSummary> {
        self.ingest_at(ctx, Utc::now()).await
    }

    /// One pass over every known location for the window `[now - lookback, now]`.
    /// Only fails if the location list itself cannot be read.
    #[instrument(skip(self, ctx), fields(task = INGESTION_TASK_NAME))]
    pub async fn ingest_at(
        &self,
        ctx: &TaskContext,
        now: DateTime<Utc>,
    ) -> anyhow::Result<IngestionSummary> {
        let locations = store_call(
            "list_locations",
            self.config.store_timeout,
            self.store.list_locations(),
        )
        .await?;
        let from = TimeDelta::from_std(self.config.lookback)
            .ok()
            .and_then(|lookback| now.checked_sub_signed(lookback))
            .ok_or_else(|| anyhow::anyhow!("lookback {:?} out of range", self.config.lookback))?;

        let mut summary = IngestionSummary {
            locations_total: locations.len(),
            ..Default::default()
        };
        if locations.is_empty() {
            info!("no locations configured; nothing to ingest");
            return Ok(summary);
        }

        let outcomes: Vec<(Location, LocationOutcome)> = stream::iter(locations)
            .map(|loc| async move {
                if ctx.is_stopping() {
                    return (loc, LocationOutcome::Skipped);
                }
                let mut counts = LocationCounts::default();
                let outcome = match self.ingest_location(&loc, from, now, &mut counts).await {
                    Ok(()) => LocationOutcome::Done(counts),
                    Err(e) => LocationOutcome::Failed(counts, e),
                };
                (loc, outcome)
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        for (loc, outcome) in outcomes {
            match outcome {
                LocationOutcome::Done(c) => {
                    info!(
                        location_id = loc.external_id,
                        fetched = c.fetched,
                        inserted = c.inserted,
                        duplicates = c.duplicates,
                        invalid = c.invalid,
                        "location ingested"
                    );
                    summary.locations_processed += 1;
                    summary.add(c);
                }
                LocationOutcome::Failed(c, e) => {
                    warn!(
                        location_id = loc.external_id,
                        kind = e.kind(),
                        error = %e,
                        "location ingestion failed"
                    );
                    summary.locations_failed += 1;
                    summary.add(c);
                    summary.errors.push(describe(&loc, &e));
                }
                LocationOutcome::Skipped => summary.locations_skipped += 1,
            }
        }

        if summary.locations_skipped > 0 {
            summary.interrupted = true;
            summary.errors.push(format!(
                "stopped before {} location(s) started",
                summary.locations_skipped
            ));
        }
        Ok(summary)
    }

    async fn ingest_location(
        &self,
        loc: &Location,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        counts: &mut LocationCounts,
    ) -> Result<(), PipelineError> {
        let timeout = self.config.source_timeout;
        let fetched = tokio::time::timeout(timeout, self.source.fetch_readings(loc.external_id, from, to))
            .await
            .unwrap_or(Err(SourceError::Timeout(timeout)))
            .map_err(|source| PipelineError::Source {
                location: loc.external_id,
                source,
            })?;
        counts.fetched = fetched.len();

        let store_timeout = self.config.store_timeout;
        for data in &fetched {
            let Some(measure_time) = normalize_measure_time(data) else {
                debug!(location_id = loc.external_id, "reading without a usable timestamp");
                counts.invalid += 1;
                continue;
            };
            let exists = store_call(
                "raw_exists",
                store_timeout,
                self.store.raw_exists(loc.id, measure_time),
            )
            .await?;
            if exists {
                counts.duplicates += 1;
                continue;
            }
            match store_call(
                "insert_raw",
                store_timeout,
                self.store.insert_raw(loc.id, measure_time, data),
            )
            .await?
            {
                InsertOutcome::Inserted => counts.inserted += 1,
                InsertOutcome::Duplicate => counts.duplicates += 1,
            }
        }
        Ok(())
    }
}

impl IngestionSummary {
    fn add(&mut self, c: LocationCounts) {
        self.readings_fetched += c.fetched;
        self.inserted += c.inserted;
        self.duplicates += c.duplicates;
        self.invalid += c.invalid;
    }
}

fn describe(loc: &Location, e: &PipelineError) -> String {
    match e {
        PipelineError::Source { .. } => e.to_string(),
        _ => format!("location {}: {}", loc.external_id, e),
    }
}

/// Measurement time of a source record: the RFC 3339 `timestamp` field, in UTC,
/// truncated to whole seconds. None when missing or unparseable.
pub fn normalize_measure_time(data: &MeasureData) -> Option<DateTime<Utc>> {
    let raw = data.get(TIMESTAMP_FIELD)?.as_str()?;
    let parsed = DateTime::parse_from_rfc3339(raw.trim()).ok()?;
    DateTime::from_timestamp(parsed.timestamp(), 0)
}

#[async_trait]
impl Task for IngestionTask {
    fn name(&self) -> &'static str {
        INGESTION_TASK_NAME
    }

    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<TaskReport> {
        let summary = self.ingest(ctx).await?;
        TaskReport::from_summary(summary.is_success(), &summary, &summary.errors)
    }
}
