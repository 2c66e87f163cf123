// Shared test helpers: temp store, a scripted reading source, reading builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use aqi_pipeline::error::SourceError;
use aqi_pipeline::models::{Location, MeasureData, NewLocation};
use aqi_pipeline::source::ReadingSource;
use aqi_pipeline::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Fresh database in a temp dir. Keep the TempDir alive for the test's duration.
pub async fn temp_store() -> (TempDir, Arc<Store>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("aqi.db");
    let store = Store::connect(path.to_str().unwrap(), 5).await.unwrap();
    store.init().await.unwrap();
    (dir, Arc::new(store))
}

/// Separate connection to the temp database, for tampering with rows behind the store's back.
pub async fn side_pool(dir: &TempDir) -> SqlitePool {
    let path = dir.path().join("aqi.db");
    SqlitePool::connect(&format!("sqlite:{}", path.to_str().unwrap()))
        .await
        .unwrap()
}

pub fn new_location(external_id: i64) -> NewLocation {
    NewLocation {
        external_id,
        name: format!("Site {}", external_id),
        description: String::new(),
        serial_no: format!("serial-{}", external_id),
        model: "O-1PS".into(),
        firmware_version: "3.3.9".into(),
    }
}

pub async fn seed(store: &Store, external_ids: &[i64]) -> Vec<Location> {
    let mut out = Vec::new();
    for id in external_ids {
        out.push(store.upsert_location(&new_location(*id)).await.unwrap());
    }
    out
}

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// Source record: `fields` (a JSON object) plus a `timestamp` key.
pub fn reading(timestamp: &str, fields: Value) -> MeasureData {
    let mut data = match fields {
        Value::Object(m) => m,
        _ => panic!("reading fields must be a JSON object"),
    };
    data.insert("timestamp".into(), json!(timestamp));
    data
}

/// Stored measure_data without a timestamp, for aggregation input.
pub fn fields(v: Value) -> MeasureData {
    match v {
        Value::Object(m) => m,
        _ => panic!("fields must be a JSON object"),
    }
}

#[derive(Clone)]
pub enum FakeResponse {
    Readings(Vec<MeasureData>),
    Status(u16, String),
    Hang,
}

/// ReadingSource scripted per external location id. Unknown ids return no readings.
#[derive(Default)]
pub struct FakeSource {
    responses: Mutex<HashMap<i64, FakeResponse>>,
    pub calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, external_id: i64, response: FakeResponse) {
        self.responses.lock().unwrap().insert(external_id, response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadingSource for FakeSource {
    async fn fetch_readings(
        &self,
        location_external_id: i64,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<MeasureData>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .responses
            .lock()
            .unwrap()
            .get(&location_external_id)
            .cloned();
        match response {
            None => Ok(vec![]),
            Some(FakeResponse::Readings(r)) => Ok(r),
            Some(FakeResponse::Status(status, body)) => Err(SourceError::Status { status, body }),
            Some(FakeResponse::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(vec![])
            }
        }
    }
}
