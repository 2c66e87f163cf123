// Ingestion task tests against a scripted source.

mod common;

use std::sync::Arc;
use std::time::Duration;

use aqi_pipeline::models::TaskStatus;
use aqi_pipeline::tasks::ingestion::{IngestionConfig, IngestionTask, normalize_measure_time};
use aqi_pipeline::tasks::{TaskContext, run_tracked};
use common::{FakeResponse, FakeSource, fields, reading, seed, temp_store, utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn task(
    store: Arc<aqi_pipeline::store::Store>,
    source: Arc<FakeSource>,
) -> IngestionTask {
    IngestionTask::new(store, source, IngestionConfig::default())
}

fn three_readings() -> Vec<aqi_pipeline::models::MeasureData> {
    vec![
        reading("2024-05-01T12:00:00Z", json!({"pm02_corrected": 3.1, "atmp": 20.5})),
        reading("2024-05-01T12:05:00Z", json!({"pm02_corrected": 3.4, "atmp": 20.7})),
        reading("2024-05-01T12:10:00Z", json!({"pm02_corrected": 2.9, "atmp": 20.9})),
    ]
}

#[tokio::test]
async fn second_run_over_same_window_inserts_nothing() {
    let (_dir, store) = temp_store().await;
    let loc = seed(&store, &[80146]).await.remove(0);
    let source = Arc::new(FakeSource::new());
    source.respond(80146, FakeResponse::Readings(three_readings()));
    let task = task(store.clone(), source.clone());
    let ctx = TaskContext::detached();
    let now = utc("2024-05-01T12:15:00Z");

    let first = task.ingest_at(&ctx, now).await.unwrap();
    assert_eq!(first.inserted, 3);
    assert_eq!(first.duplicates, 0);
    assert!(first.is_success());

    let second = task.ingest_at(&ctx, now).await.unwrap();
    assert_eq!(second.readings_fetched, 3);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 3);

    let rows = store
        .raw_in_range(loc.id, utc("2024-05-01T00:00:00Z"), now)
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn failing_location_does_not_block_the_others() {
    let (_dir, store) = temp_store().await;
    let locs = seed(&store, &[1, 2, 3]).await;
    let source = Arc::new(FakeSource::new());
    source.respond(1, FakeResponse::Readings(three_readings()));
    source.respond(2, FakeResponse::Status(500, "boom".into()));
    source.respond(3, FakeResponse::Readings(three_readings()));
    let task = task(store.clone(), source);

    let run = run_tracked(
        &store,
        &task,
        &TaskContext::detached(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(run.status, TaskStatus::Failed);

    let row = store.get_task_run(run.run_id).await.unwrap().unwrap();
    assert!(!row.is_successful);
    let error = row.error_message.unwrap();
    assert!(error.contains("location 2"), "{}", error);
    assert!(error.contains("500"), "{}", error);

    let summary: serde_json::Value = serde_json::from_str(&row.result.unwrap()).unwrap();
    assert_eq!(summary["locations_processed"], json!(2));
    assert_eq!(summary["locations_failed"], json!(1));
    assert_eq!(summary["inserted"], json!(6));

    let window = (utc("2024-05-01T00:00:00Z"), utc("2024-05-02T00:00:00Z"));
    for (loc, expected) in locs.iter().zip([3, 0, 3]) {
        let rows = store.raw_in_range(loc.id, window.0, window.1).await.unwrap();
        assert_eq!(rows.len(), expected, "location {}", loc.external_id);
    }
}

#[tokio::test]
async fn readings_without_usable_timestamp_are_counted_invalid() {
    let (_dir, store) = temp_store().await;
    seed(&store, &[1]).await;
    let source = Arc::new(FakeSource::new());
    let no_timestamp = fields(json!({"atmp": 21.0}));
    source.respond(
        1,
        FakeResponse::Readings(vec![
            reading("2024-05-01T12:00:00Z", json!({"atmp": 20.0})),
            reading("yesterday-ish", json!({"atmp": 20.0})),
            no_timestamp,
        ]),
    );
    let summary = task(store, source)
        .ingest_at(&TaskContext::detached(), utc("2024-05-01T12:30:00Z"))
        .await
        .unwrap();

    assert_eq!(summary.readings_fetched, 3);
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.invalid, 2);
    assert_eq!(summary.locations_failed, 0);
    assert!(summary.is_success());
}

#[tokio::test]
async fn measure_time_is_normalized_to_utc_seconds() {
    let a = reading("2024-05-01T12:00:00.750Z", json!({}));
    let b = reading("2024-05-01T07:00:00-05:00", json!({}));
    assert_eq!(normalize_measure_time(&a), Some(utc("2024-05-01T12:00:00Z")));
    assert_eq!(normalize_measure_time(&b), Some(utc("2024-05-01T12:00:00Z")));
    assert_eq!(normalize_measure_time(&fields(json!({"timestamp": 5}))), None);

    // Both spellings land on the same row.
    let (_dir, store) = temp_store().await;
    seed(&store, &[1]).await;
    let source = Arc::new(FakeSource::new());
    source.respond(1, FakeResponse::Readings(vec![a, b]));
    let summary = task(store, source)
        .ingest_at(&TaskContext::detached(), utc("2024-05-01T12:30:00Z"))
        .await
        .unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.duplicates, 1);
}

#[tokio::test]
async fn unknown_fields_are_stored_untouched() {
    let (_dir, store) = temp_store().await;
    let loc = seed(&store, &[1]).await.remove(0);
    let source = Arc::new(FakeSource::new());
    source.respond(
        1,
        FakeResponse::Readings(vec![reading(
            "2024-05-01T12:00:00Z",
            json!({"pm02_corrected": 4.2, "wifi": -61, "extra": {"nested": [1, 2]}, "note": null}),
        )]),
    );
    task(store.clone(), source)
        .ingest_at(&TaskContext::detached(), utc("2024-05-01T12:30:00Z"))
        .await
        .unwrap();

    let rows = store
        .raw_in_range(loc.id, utc("2024-05-01T12:00:00Z"), utc("2024-05-01T12:30:00Z"))
        .await
        .unwrap();
    let data = &rows[0].measure_data;
    assert_eq!(data["wifi"], json!(-61));
    assert_eq!(data["extra"], json!({"nested": [1, 2]}));
    assert_eq!(data["note"], json!(null));
    assert_eq!(data["timestamp"], json!("2024-05-01T12:00:00Z"));
}

#[tokio::test]
async fn slow_source_times_out_as_location_failure() {
    let (_dir, store) = temp_store().await;
    seed(&store, &[1, 2]).await;
    let source = Arc::new(FakeSource::new());
    source.respond(1, FakeResponse::Hang);
    source.respond(2, FakeResponse::Readings(three_readings()));
    let config = IngestionConfig {
        source_timeout: Duration::from_millis(50),
        ..IngestionConfig::default()
    };
    let summary = IngestionTask::new(store, source, config)
        .ingest_at(&TaskContext::detached(), utc("2024-05-01T12:30:00Z"))
        .await
        .unwrap();

    assert_eq!(summary.locations_failed, 1);
    assert_eq!(summary.locations_processed, 1);
    assert_eq!(summary.inserted, 3);
    assert!(summary.errors[0].contains("timed out"), "{:?}", summary.errors);
}

#[tokio::test]
async fn stop_requested_before_run_starts_no_location() {
    let (_dir, store) = temp_store().await;
    seed(&store, &[1, 2]).await;
    let source = Arc::new(FakeSource::new());
    source.respond(1, FakeResponse::Readings(three_readings()));
    let stop = CancellationToken::new();
    stop.cancel();

    let summary = task(store, source.clone())
        .ingest_at(&TaskContext::new(stop), utc("2024-05-01T12:30:00Z"))
        .await
        .unwrap();
    assert_eq!(summary.locations_skipped, 2);
    assert!(summary.interrupted);
    assert!(!summary.is_success());
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn no_locations_is_a_successful_empty_run() {
    let (_dir, store) = temp_store().await;
    let source = Arc::new(FakeSource::new());
    let summary = task(store, source)
        .ingest_at(&TaskContext::detached(), utc("2024-05-01T12:30:00Z"))
        .await
        .unwrap();
    assert_eq!(summary.locations_total, 0);
    assert!(summary.is_success());
}

#[tokio::test]
async fn unreadable_location_list_fails_the_run() {
    let (_dir, store) = temp_store().await;
    seed(&store, &[80146]).await;
    store.close().await;
    let source = Arc::new(FakeSource::new());
    let err = task(store, source.clone())
        .ingest_at(&TaskContext::detached(), utc("2024-05-01T12:30:00Z"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("list_locations"), "{:#}", err);
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn lookback_reaching_past_representable_time_is_an_error() {
    let (_dir, store) = temp_store().await;
    seed(&store, &[80146]).await;
    let source = Arc::new(FakeSource::new());
    let config = IngestionConfig {
        lookback: Duration::from_secs(1_000_000 * 365 * 86_400),
        ..IngestionConfig::default()
    };
    let err = IngestionTask::new(store, source.clone(), config)
        .ingest_at(&TaskContext::detached(), utc("2024-05-01T12:30:00Z"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("out of range"), "{:#}", err);
    assert_eq!(source.calls(), 0);
}
