// External reading source: one call per location for a time range.

mod airgradient;

pub use airgradient::{AirGradientClient, format_api_time, parse_measures};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SourceError;
use crate::models::MeasureData;

/// Anything that can return readings for a location over `[from, to]`.
/// Each item is the reading's full field set; the `timestamp` key carries its time.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn fetch_readings(
        &self,
        location_external_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MeasureData>, SourceError>;
}
