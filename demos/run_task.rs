// Run one task once, outside the scheduler, through the same ledger wrapper.
//
// Usage: cargo run --example run_task -- <ingest|aggregate>
//   Reads CONFIG_FILE (default config.toml) and .env like the service binary.
//   Exit code is 0 when the run was recorded as completed, 1 otherwise.

use std::env;
use std::sync::Arc;

use aqi_pipeline::config::AppConfig;
use aqi_pipeline::models::TaskStatus;
use aqi_pipeline::source::AirGradientClient;
use aqi_pipeline::store::Store;
use aqi_pipeline::tasks::aggregation::AggregationTask;
use aqi_pipeline::tasks::ingestion::IngestionTask;
use aqi_pipeline::tasks::{Task, TaskContext, run_tracked};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let which = env::args().nth(1).unwrap_or_default();
    let config = AppConfig::load()?;
    let store = Arc::new(Store::open(&config.database).await?);
    store.seed_locations(&config.locations).await?;

    let task: Box<dyn Task> = match which.as_str() {
        "ingest" => {
            let client = AirGradientClient::new(
                &config.airgradient.base_url,
                &config.airgradient.api_token,
                config.request_timeout(),
            )?;
            Box::new(IngestionTask::new(
                store.clone(),
                Arc::new(client),
                config.ingestion_config(),
            ))
        }
        "aggregate" => Box::new(AggregationTask::new(
            store.clone(),
            config.aggregation_config(),
        )),
        other => anyhow::bail!("unknown task {:?}; expected ingest or aggregate", other),
    };

    let run = run_tracked(
        &store,
        task.as_ref(),
        &TaskContext::detached(),
        &CancellationToken::new(),
    )
    .await?;
    if let Some(row) = store.get_task_run(run.run_id).await? {
        println!("{}", serde_json::to_string_pretty(&row)?);
    }
    store.close().await;

    if run.status != TaskStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}
