// Bucketing: 30-minute windows aligned to the Unix epoch (UTC) + pure averaging.
// DB access stays in the store; this module only does the math.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;

use crate::models::MeasureData;

pub const BUCKET_SECS: i64 = 30 * 60;

pub fn bucket_width() -> TimeDelta {
    TimeDelta::seconds(BUCKET_SECS)
}

/// Start of the bucket containing `t`. A reading exactly on a boundary opens a new bucket.
pub fn floor_to_bucket(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp().div_euclid(BUCKET_SECS) * BUCKET_SECS;
    DateTime::from_timestamp(secs, 0).unwrap_or(t)
}

pub fn bucket_end(bucket_start: DateTime<Utc>) -> DateTime<Utc> {
    bucket_start + bucket_width()
}

/// Half-open span of whole buckets, `[start, end)`; both ends sit on bucket boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BucketWindow {
    pub fn bucket_starts(&self) -> impl Iterator<Item = DateTime<Utc>> + use<> {
        let (start, end) = (self.start, self.end);
        std::iter::successors(Some(start), |t| Some(*t + bucket_width()))
            .take_while(move |t| bucket_end(*t) <= end)
    }

    pub fn len(&self) -> usize {
        ((self.end - self.start).num_seconds().max(0) / BUCKET_SECS) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Buckets that have settled by `now`: `bucket_end + buffer <= now`, going back at most
/// `lookback` (start floored to a boundary). None when no bucket qualifies.
pub fn eligible_window(
    now: DateTime<Utc>,
    buffer: Duration,
    lookback: Duration,
) -> Option<BucketWindow> {
    let buffer = TimeDelta::from_std(buffer).ok()?;
    let lookback = TimeDelta::from_std(lookback).ok()?;
    let end = floor_to_bucket(now.checked_sub_signed(buffer)?);
    let start = floor_to_bucket(now.checked_sub_signed(lookback)?);
    (start < end).then_some(BucketWindow { start, end })
}

/// Mean of each tracked metric across `records`, rounded to `precision` decimals.
/// Records missing a metric, or holding null / non-numeric values, are ignored for that
/// metric. Metrics with no usable value are left out of the result.
pub fn average_fields<'a, I>(records: I, tracked: &[String], precision: u32) -> BTreeMap<String, f64>
where
    I: IntoIterator<Item = &'a MeasureData>,
{
    let mut sums: BTreeMap<&str, (f64, u32)> = BTreeMap::new();
    for record in records {
        for metric in tracked {
            if let Some(v) = record.get(metric).and_then(numeric) {
                let entry = sums.entry(metric.as_str()).or_insert((0.0, 0));
                entry.0 += v;
                entry.1 += 1;
            }
        }
    }
    sums.into_iter()
        .map(|(metric, (sum, n))| (metric.to_string(), round_to(sum / n as f64, precision)))
        .collect()
}

/// Rounds to `precision` decimals; exact halves go to the even neighbour (0.125 -> 0.12).
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round_ties_even() / factor
}

/// JSON numbers as-is; booleans count as 1/0 (the API reports some flags that way).
fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
