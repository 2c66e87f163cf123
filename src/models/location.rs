// Monitored AirGradient location (device/site). Seeded from config, read-only to the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored location. `id` is the internal key referenced by reading rows;
/// `external_id` is the AirGradient location id used against the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: i64,
    pub external_id: i64,
    pub name: String,
    pub description: String,
    pub serial_no: String,
    pub model: String,
    pub firmware_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Location definition as written in `[[locations]]` config entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLocation {
    pub external_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub serial_no: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub firmware_version: String,
}
