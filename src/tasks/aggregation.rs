// Aggregation: roll settled 30-minute buckets of raw readings into one averaged row
// per (location, bucket). Existing buckets are never recomputed; empty buckets stay
// candidates while they remain inside the lookback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::buckets::{self, BucketWindow};
use super::{Task, TaskContext, TaskReport};
use crate::config::default_tracked_metrics;
use crate::error::{PipelineError, store_call};
use crate::models::InsertOutcome;
use crate::store::Store;

pub const AGGREGATION_TASK_NAME: &str = "aggregate_30_minute_data";

#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Delay after a bucket's end before it is considered settled.
    pub buffer: Duration,
    pub lookback: Duration,
    pub tracked_metrics: Vec<String>,
    pub precision: u32,
    pub max_concurrency: usize,
    pub store_timeout: Duration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            buffer: Duration::from_secs(30 * 60),
            lookback: Duration::from_secs(7 * 24 * 60 * 60),
            tracked_metrics: default_tracked_metrics(),
            precision: 2,
            max_concurrency: 4,
            store_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSummary {
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub locations: usize,
    pub candidates: usize,
    pub aggregated: usize,
    pub skipped_empty: usize,
    pub skipped_no_metrics: usize,
    /// Written by someone else between candidate selection and insert.
    pub already_aggregated: usize,
    pub failed: usize,
    /// Candidates never started because a stop was requested.
    pub not_started: usize,
    pub interrupted: bool,
    pub errors: Vec<String>,
}

impl AggregationSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.interrupted
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    location_id: i64,
    external_id: i64,
    bucket_start: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BucketOutcome {
    Aggregated,
    Empty,
    NoMetrics,
    AlreadyAggregated,
}

pub struct AggregationTask {
    store: Arc<Store>,
    config: AggregationConfig,
}

impl AggregationTask {
    pub fn new(store: Arc<Store>, config: AggregationConfig) -> Self {
        Self { store, config }
    }

    pub async fn aggregate(&self, ctx: &TaskContext) -> anyhow::Result<AggregationSummary> {
        self.aggregate_at(ctx, Utc::now()).await
    }

    #[instrument(skip(self, ctx), fields(task = AGGREGATION_TASK_NAME))]
    pub async fn aggregate_at(
        &self,
        ctx: &TaskContext,
        now: DateTime<Utc>,
    ) -> anyhow::Result<AggregationSummary> {
        let mut summary = AggregationSummary::default();
        let Some(window) = buckets::eligible_window(now, self.config.buffer, self.config.lookback)
        else {
            info!("no settled bucket inside the lookback; nothing to aggregate");
            return Ok(summary);
        };
        summary.window_start = Some(window.start);
        summary.window_end = Some(window.end);

        let locations = store_call(
            "list_locations",
            self.config.store_timeout,
            self.store.list_locations(),
        )
        .await?;
        summary.locations = locations.len();

        let mut candidates = Vec::new();
        for loc in &locations {
            match store_call(
                "aggregated_bucket_starts",
                self.config.store_timeout,
                self.store
                    .aggregated_bucket_starts(loc.id, window.start, window.end),
            )
            .await
            {
                Ok(done) => candidates.extend(
                    window
                        .bucket_starts()
                        .filter(|b| !done.contains(b))
                        .map(|bucket_start| Candidate {
                            location_id: loc.id,
                            external_id: loc.external_id,
                            bucket_start,
                        }),
                ),
                Err(e) => {
                    warn!(location_id = loc.external_id, error = %e, "could not list aggregated buckets");
                    summary.failed += 1;
                    summary
                        .errors
                        .push(format!("location {}: {}", loc.external_id, e));
                }
            }
        }
        summary.candidates = candidates.len();
        debug!(
            candidates = candidates.len(),
            buckets = window.len(),
            "aggregation candidates selected"
        );

        let results: Vec<(Candidate, Option<Result<BucketOutcome, PipelineError>>)> =
            stream::iter(candidates)
                .map(|c| async move {
                    if ctx.is_stopping() {
                        return (c, None);
                    }
                    (c, Some(self.aggregate_bucket(&c).await))
                })
                .buffer_unordered(self.config.max_concurrency.max(1))
                .collect()
                .await;

        for (c, result) in results {
            match result {
                Some(Ok(BucketOutcome::Aggregated)) => summary.aggregated += 1,
                Some(Ok(BucketOutcome::Empty)) => summary.skipped_empty += 1,
                Some(Ok(BucketOutcome::NoMetrics)) => summary.skipped_no_metrics += 1,
                Some(Ok(BucketOutcome::AlreadyAggregated)) => summary.already_aggregated += 1,
                Some(Err(e)) => {
                    warn!(
                        location_id = c.external_id,
                        bucket_start = %c.bucket_start,
                        kind = e.kind(),
                        error = %e,
                        "bucket aggregation failed"
                    );
                    summary.failed += 1;
                    summary.errors.push(format!(
                        "location {} bucket {}: {}",
                        c.external_id,
                        c.bucket_start.to_rfc3339(),
                        e
                    ));
                }
                None => summary.not_started += 1,
            }
        }

        if summary.not_started > 0 {
            summary.interrupted = true;
            summary.errors.push(format!(
                "stopped before {} bucket(s) started",
                summary.not_started
            ));
        }
        info!(
            aggregated = summary.aggregated,
            skipped_empty = summary.skipped_empty,
            skipped_no_metrics = summary.skipped_no_metrics,
            failed = summary.failed,
            "aggregation pass done"
        );
        Ok(summary)
    }

    async fn aggregate_bucket(&self, c: &Candidate) -> Result<BucketOutcome, PipelineError> {
        let timeout = self.config.store_timeout;
        let window = BucketWindow {
            start: c.bucket_start,
            end: buckets::bucket_end(c.bucket_start),
        };

        if store_call(
            "aggregated_exists",
            timeout,
            self.store.aggregated_exists(c.location_id, window.start),
        )
        .await?
        {
            return Ok(BucketOutcome::AlreadyAggregated);
        }

        let raw = store_call(
            "raw_in_range",
            timeout,
            self.store
                .raw_in_range(c.location_id, window.start, window.end),
        )
        .await?;
        if raw.is_empty() {
            return Ok(BucketOutcome::Empty);
        }

        let averaged = buckets::average_fields(
            raw.iter().map(|r| &r.measure_data),
            &self.config.tracked_metrics,
            self.config.precision,
        );
        if averaged.is_empty() {
            debug!(
                location_id = c.external_id,
                bucket_start = %c.bucket_start,
                readings = raw.len(),
                "no tracked metric in bucket"
            );
            return Ok(BucketOutcome::NoMetrics);
        }

        let outcome = store_call(
            "insert_aggregated",
            timeout,
            self.store
                .insert_aggregated(c.location_id, window.start, &averaged),
        )
        .await?;
        Ok(match outcome {
            InsertOutcome::Inserted => {
                debug!(
                    location_id = c.external_id,
                    bucket_start = %c.bucket_start,
                    readings = raw.len(),
                    "bucket aggregated"
                );
                BucketOutcome::Aggregated
            }
            InsertOutcome::Duplicate => BucketOutcome::AlreadyAggregated,
        })
    }
}

#[async_trait]
impl Task for AggregationTask {
    fn name(&self) -> &'static str {
        AGGREGATION_TASK_NAME
    }

    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<TaskReport> {
        let summary = self.aggregate(ctx).await?;
        TaskReport::from_summary(summary.is_success(), &summary, &summary.errors)
    }
}
