// AirGradient public API client: GET /locations/{id}/measures/past?token=&from=&to=

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::ReadingSource;
use crate::error::SourceError;
use crate::models::MeasureData;
use crate::version::user_agent;

/// Longest error body kept in a SourceError.
const MAX_ERROR_BODY: usize = 512;

pub struct AirGradientClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl AirGradientClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent())
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn measures_url(&self, location_external_id: i64) -> String {
        format!(
            "{}/locations/{}/measures/past",
            self.base_url, location_external_id
        )
    }
}

/// Compact UTC form the API expects, e.g. 20240101T120000Z.
pub fn format_api_time(t: DateTime<Utc>) -> String {
    t.format("%Y%m%dT%H%M%SZ").to_string()
}

#[async_trait]
impl ReadingSource for AirGradientClient {
    #[instrument(skip(self), fields(source = "airgradient"))]
    async fn fetch_readings(
        &self,
        location_external_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MeasureData>, SourceError> {
        let from_s = format_api_time(from);
        let to_s = format_api_time(to);
        let resp = self
            .http
            .get(self.measures_url(location_external_id))
            .query(&[
                ("token", self.token.as_str()),
                ("from", from_s.as_str()),
                ("to", to_s.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
            warn!(status = status.as_u16(), "AirGradient request rejected");
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = resp.json().await?;
        let readings = parse_measures(payload)?;
        debug!(count = readings.len(), "AirGradient readings fetched");
        Ok(readings)
    }
}

/// The endpoint returns a JSON array of objects; anything else is malformed.
pub fn parse_measures(payload: Value) -> Result<Vec<MeasureData>, SourceError> {
    let Value::Array(items) = payload else {
        return Err(SourceError::Malformed(format!(
            "expected array, got {}",
            json_kind(&payload)
        )));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(fields) => Ok(fields),
            other => Err(SourceError::Malformed(format!(
                "item {} is {}, expected object",
                i,
                json_kind(&other)
            ))),
        })
        .collect()
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}
