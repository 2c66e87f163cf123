// Dump the latest 30-minute rows for one location as JSON.
//
// Usage: cargo run --example dump_history -- [DB_PATH] [LOCATION_ID] [LIMIT]
//   DB_PATH      default: ./data/aqi.db
//   LOCATION_ID  external (AirGradient) id, default: 80146
//   LIMIT        default: 10

use std::env;

use aqi_pipeline::models::SortOrder;
use aqi_pipeline::store::Store;
use chrono::{DateTime, Utc};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let path = args.get(1).map(String::as_str).unwrap_or("./data/aqi.db");
    let external_id: i64 = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(80146);
    let limit: u32 = args
        .get(3)
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let store = Store::connect(path, 1).await?;
    let Some(location) = store.get_location_by_external_id(external_id).await? else {
        anyhow::bail!("location {} not found in {}", external_id, path);
    };
    let rows = store
        .list_aggregated_readings(
            location.id,
            DateTime::<Utc>::UNIX_EPOCH,
            Utc::now(),
            SortOrder::Desc,
            Some(limit),
        )
        .await?;

    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}
