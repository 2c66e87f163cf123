use std::sync::Arc;

use anyhow::Result;
use aqi_pipeline::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    tracing::info!(
        name = version::NAME,
        version = version::VERSION,
        database = %app_config.database.path,
        "starting"
    );

    let store = Arc::new(store::Store::open(&app_config.database).await?);
    let seeded = store.seed_locations(&app_config.locations).await?;
    if seeded == 0 {
        tracing::warn!("no locations stored; ingestion has nothing to pull until some are configured");
    }

    let client = source::AirGradientClient::new(
        &app_config.airgradient.base_url,
        &app_config.airgradient.api_token,
        app_config.request_timeout(),
    )?;

    let ingestion = Arc::new(tasks::ingestion::IngestionTask::new(
        store.clone(),
        Arc::new(client),
        app_config.ingestion_config(),
    ));
    let aggregation = Arc::new(tasks::aggregation::AggregationTask::new(
        store.clone(),
        app_config.aggregation_config(),
    ));

    let mut scheduler = scheduler::Scheduler::new(store.clone(), app_config.shutdown_grace());
    let options = app_config.job_options();
    scheduler.schedule(ingestion, app_config.ingestion_trigger()?, options)?;
    scheduler.schedule(aggregation, app_config.aggregation_trigger()?, options)?;
    scheduler.start().await?;
    tracing::info!(jobs = ?scheduler.job_names(), "scheduler running");

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Received shutdown signal");
    scheduler.stop().await;
    store.close().await;
    Ok(())
}
