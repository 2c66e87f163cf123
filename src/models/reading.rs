// Raw (5-min) and aggregated (30-min) readings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Open metric mapping as returned by the source. Unknown keys pass through untouched.
pub type MeasureData = serde_json::Map<String, serde_json::Value>;

/// One measurement snapshot at native resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReading {
    pub location_id: i64,
    pub measure_time: DateTime<Utc>,
    pub measure_data: MeasureData,
}

/// One 30-minute bucket: per tracked metric mean, rounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedReading {
    pub location_id: i64,
    pub bucket_start: DateTime<Utc>,
    pub measure_data: BTreeMap<String, f64>,
}

/// Result of a conflict-safe insert keyed on (location, time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Sort direction for history reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}
