use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::error::PipelineError;
use crate::models::NewLocation;
use crate::scheduler::{JobOptions, Trigger};
use crate::tasks::aggregation::AggregationConfig;
use crate::tasks::ingestion::IngestionConfig;

/// Upper bounds on the trailing windows; beyond these the window math leaves chrono's range.
const MAX_INGESTION_LOOKBACK_MINS: u64 = 7 * 24 * 60;
const MAX_AGGREGATION_LOOKBACK_DAYS: u64 = 365;
const MAX_AGGREGATION_BUFFER_MINS: u64 = 24 * 60;

/// Env var that overrides `airgradient.api_token` (also read from `.env`).
pub const API_TOKEN_ENV: &str = "AIRGRADIENT_API_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub airgradient: AirGradientConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub ingestion: IngestionSection,
    #[serde(default)]
    pub aggregation: AggregationSection,
    #[serde(default)]
    pub locations: Vec<NewLocation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
}

fn default_max_pool_size() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirGradientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Required. May be left empty in the file and supplied via AIRGRADIENT_API_TOKEN.
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.airgradient.com/public/api/v1".into()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Job defaults shared by both scheduled tasks.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_instances: usize,
    pub coalesce: bool,
    pub misfire_grace_secs: u64,
    /// How long stop() waits for in-flight runs before cancelling them.
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_instances: 1,
            coalesce: true,
            misfire_grace_secs: 30,
            shutdown_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionSection {
    pub interval_secs: u64,
    /// Optional cron expression (UTC, seconds field first). Overrides interval_secs.
    pub schedule: Option<String>,
    /// Trailing window requested from the source on every run.
    pub lookback_mins: u64,
    pub max_concurrency: usize,
    pub store_timeout_secs: u64,
}

impl Default for IngestionSection {
    fn default() -> Self {
        Self {
            interval_secs: 15 * 60,
            schedule: None,
            lookback_mins: 60,
            max_concurrency: 4,
            store_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationSection {
    pub interval_secs: u64,
    pub schedule: Option<String>,
    /// Delay after a bucket's end before it may be aggregated.
    pub buffer_mins: u64,
    pub lookback_days: u64,
    pub tracked_metrics: Vec<String>,
    /// Decimal places kept in averaged values.
    pub precision: u32,
    pub max_concurrency: usize,
    pub store_timeout_secs: u64,
}

impl Default for AggregationSection {
    fn default() -> Self {
        Self {
            interval_secs: 30 * 60,
            schedule: None,
            buffer_mins: 30,
            lookback_days: 7,
            tracked_metrics: default_tracked_metrics(),
            precision: 2,
            max_concurrency: 4,
            store_timeout_secs: 10,
        }
    }
}

pub fn default_tracked_metrics() -> Vec<String> {
    [
        "rco2_corrected",
        "atmp",
        "tvoc",
        "tvocIndex",
        "rhum_corrected",
        "pm02_corrected",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl AppConfig {
    /// Loads `CONFIG_FILE` (default `config.toml`), applies env overrides, validates.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)
            .map_err(|e| PipelineError::Config(format!("cannot read {}: {}", path, e)))?;
        let mut config: AppConfig = toml::from_str(&s)?;
        if let Ok(token) = std::env::var(API_TOKEN_ENV)
            && !token.trim().is_empty()
        {
            config.airgradient.api_token = token;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate config from a string (e.g. for tests). No env overrides.
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.airgradient.api_token.trim().is_empty() {
            return Err(PipelineError::Config(format!(
                "airgradient.api_token must be set (or {})",
                API_TOKEN_ENV
            ))
            .into());
        }
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.airgradient.base_url.starts_with("http"),
            "airgradient.base_url must be an http(s) URL, got {:?}",
            self.airgradient.base_url
        );
        anyhow::ensure!(
            self.airgradient.timeout_secs > 0,
            "airgradient.timeout_secs must be > 0, got {}",
            self.airgradient.timeout_secs
        );
        anyhow::ensure!(
            self.scheduler.max_instances > 0,
            "scheduler.max_instances must be > 0, got {}",
            self.scheduler.max_instances
        );
        anyhow::ensure!(
            (1..=MAX_INGESTION_LOOKBACK_MINS).contains(&self.ingestion.lookback_mins),
            "ingestion.lookback_mins must be in 1..={}, got {}",
            MAX_INGESTION_LOOKBACK_MINS,
            self.ingestion.lookback_mins
        );
        anyhow::ensure!(
            self.ingestion.max_concurrency > 0,
            "ingestion.max_concurrency must be > 0, got {}",
            self.ingestion.max_concurrency
        );
        anyhow::ensure!(
            self.ingestion.store_timeout_secs > 0,
            "ingestion.store_timeout_secs must be > 0, got {}",
            self.ingestion.store_timeout_secs
        );
        self.ingestion_trigger()
            .map_err(|e| anyhow::anyhow!("ingestion schedule: {:#}", e))?;
        anyhow::ensure!(
            (1..=MAX_AGGREGATION_LOOKBACK_DAYS).contains(&self.aggregation.lookback_days),
            "aggregation.lookback_days must be in 1..={}, got {}",
            MAX_AGGREGATION_LOOKBACK_DAYS,
            self.aggregation.lookback_days
        );
        anyhow::ensure!(
            self.aggregation.buffer_mins <= MAX_AGGREGATION_BUFFER_MINS,
            "aggregation.buffer_mins must be <= {}, got {}",
            MAX_AGGREGATION_BUFFER_MINS,
            self.aggregation.buffer_mins
        );
        anyhow::ensure!(
            !self.aggregation.tracked_metrics.is_empty(),
            "aggregation.tracked_metrics must list at least one metric"
        );
        anyhow::ensure!(
            self.aggregation.precision <= 10,
            "aggregation.precision must be <= 10, got {}",
            self.aggregation.precision
        );
        anyhow::ensure!(
            self.aggregation.max_concurrency > 0,
            "aggregation.max_concurrency must be > 0, got {}",
            self.aggregation.max_concurrency
        );
        anyhow::ensure!(
            self.aggregation.store_timeout_secs > 0,
            "aggregation.store_timeout_secs must be > 0, got {}",
            self.aggregation.store_timeout_secs
        );
        self.aggregation_trigger()
            .map_err(|e| anyhow::anyhow!("aggregation schedule: {:#}", e))?;

        let mut seen = HashSet::new();
        for loc in &self.locations {
            anyhow::ensure!(
                seen.insert(loc.external_id),
                "locations: duplicate external_id {}",
                loc.external_id
            );
            anyhow::ensure!(
                !loc.name.is_empty(),
                "locations: name must be non-empty for external_id {}",
                loc.external_id
            );
        }
        Ok(())
    }

    pub fn ingestion_trigger(&self) -> anyhow::Result<Trigger> {
        trigger_for(
            self.ingestion.schedule.as_deref(),
            self.ingestion.interval_secs,
        )
    }

    pub fn aggregation_trigger(&self) -> anyhow::Result<Trigger> {
        trigger_for(
            self.aggregation.schedule.as_deref(),
            self.aggregation.interval_secs,
        )
    }

    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            max_instances: self.scheduler.max_instances,
            coalesce: self.scheduler.coalesce,
            misfire_grace: Duration::from_secs(self.scheduler.misfire_grace_secs),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.scheduler.shutdown_grace_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.airgradient.timeout_secs)
    }

    pub fn ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            lookback: Duration::from_secs(self.ingestion.lookback_mins * 60),
            max_concurrency: self.ingestion.max_concurrency,
            // The HTTP client carries its own timeout; this one also covers body decoding.
            source_timeout: self.request_timeout() + Duration::from_secs(5),
            store_timeout: Duration::from_secs(self.ingestion.store_timeout_secs),
        }
    }

    pub fn aggregation_config(&self) -> AggregationConfig {
        AggregationConfig {
            buffer: Duration::from_secs(self.aggregation.buffer_mins * 60),
            lookback: Duration::from_secs(self.aggregation.lookback_days * 24 * 60 * 60),
            tracked_metrics: self.aggregation.tracked_metrics.clone(),
            precision: self.aggregation.precision,
            max_concurrency: self.aggregation.max_concurrency,
            store_timeout: Duration::from_secs(self.aggregation.store_timeout_secs),
        }
    }
}

fn trigger_for(schedule: Option<&str>, interval_secs: u64) -> anyhow::Result<Trigger> {
    match schedule {
        Some(expr) if !expr.trim().is_empty() => Trigger::cron(expr.trim()),
        _ => Trigger::interval(Duration::from_secs(interval_secs)),
    }
}
