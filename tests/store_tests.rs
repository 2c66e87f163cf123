// Store tests: schema init, location seeding, raw/aggregated series, job state.

mod common;

use std::collections::BTreeMap;

use aqi_pipeline::models::{InsertOutcome, JobState, SortOrder};
use common::{fields, new_location, seed, temp_store, utc};
use serde_json::json;

#[tokio::test]
async fn store_init_is_idempotent() {
    let (_dir, store) = temp_store().await;
    // Second init is a no-op (IF NOT EXISTS)
    store.init().await.unwrap();
    assert!(store.list_locations().await.unwrap().is_empty());
}

#[tokio::test]
async fn upsert_location_keeps_internal_id_and_updates_metadata() {
    let (_dir, store) = temp_store().await;
    let first = store.upsert_location(&new_location(80146)).await.unwrap();

    let mut changed = new_location(80146);
    changed.firmware_version = "3.4.0".into();
    let second = store.upsert_location(&changed).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.firmware_version, "3.4.0");
    assert_eq!(store.list_locations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn seed_locations_reports_stored_count() {
    let (_dir, store) = temp_store().await;
    let n = store
        .seed_locations(&[new_location(1), new_location(2)])
        .await
        .unwrap();
    assert_eq!(n, 2);
    let n = store.seed_locations(&[new_location(2)]).await.unwrap();
    assert_eq!(n, 2);
    assert!(store.get_location_by_external_id(3).await.unwrap().is_none());
}

#[tokio::test]
async fn insert_raw_rejects_second_row_for_same_time() {
    let (_dir, store) = temp_store().await;
    let loc = seed(&store, &[80146]).await.remove(0);
    let t = utc("2024-05-01T12:05:00Z");

    assert!(!store.raw_exists(loc.id, t).await.unwrap());
    let first = store
        .insert_raw(loc.id, t, &fields(json!({"pm02_corrected": 3.5})))
        .await
        .unwrap();
    let second = store
        .insert_raw(loc.id, t, &fields(json!({"pm02_corrected": 9.9})))
        .await
        .unwrap();

    assert_eq!(first, InsertOutcome::Inserted);
    assert_eq!(second, InsertOutcome::Duplicate);
    assert!(store.raw_exists(loc.id, t).await.unwrap());

    let rows = store
        .raw_in_range(loc.id, t, utc("2024-05-01T12:30:00Z"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].measure_data["pm02_corrected"], json!(3.5));
}

#[tokio::test]
async fn raw_in_range_is_half_open_and_per_location() {
    let (_dir, store) = temp_store().await;
    let locs = seed(&store, &[1, 2]).await;
    for t in ["12:00:00", "12:15:00", "12:30:00"] {
        let at = utc(&format!("2024-05-01T{}Z", t));
        store
            .insert_raw(locs[0].id, at, &fields(json!({"atmp": 20})))
            .await
            .unwrap();
    }
    store
        .insert_raw(
            locs[1].id,
            utc("2024-05-01T12:10:00Z"),
            &fields(json!({"atmp": 30})),
        )
        .await
        .unwrap();

    let rows = store
        .raw_in_range(
            locs[0].id,
            utc("2024-05-01T12:00:00Z"),
            utc("2024-05-01T12:30:00Z"),
        )
        .await
        .unwrap();
    let times: Vec<_> = rows.iter().map(|r| r.measure_time).collect();
    assert_eq!(
        times,
        vec![utc("2024-05-01T12:00:00Z"), utc("2024-05-01T12:15:00Z")]
    );
}

#[tokio::test]
async fn list_raw_readings_orders_and_limits() {
    let (_dir, store) = temp_store().await;
    let loc = seed(&store, &[1]).await.remove(0);
    for minute in [0, 5, 10, 15] {
        let at = utc(&format!("2024-05-01T12:{:02}:00Z", minute));
        store
            .insert_raw(loc.id, at, &fields(json!({"n": minute})))
            .await
            .unwrap();
    }
    let rows = store
        .list_raw_readings(
            loc.id,
            utc("2024-05-01T00:00:00Z"),
            utc("2024-05-02T00:00:00Z"),
            SortOrder::Desc,
            Some(2),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].measure_time, utc("2024-05-01T12:15:00Z"));
    assert_eq!(rows[1].measure_time, utc("2024-05-01T12:10:00Z"));
}

#[tokio::test]
async fn insert_aggregated_first_write_wins() {
    let (_dir, store) = temp_store().await;
    let loc = seed(&store, &[1]).await.remove(0);
    let bucket = utc("2024-05-01T12:00:00Z");

    let first: BTreeMap<String, f64> = [("atmp".to_string(), 21.5)].into();
    let second: BTreeMap<String, f64> = [("atmp".to_string(), 99.0)].into();
    assert_eq!(
        store.insert_aggregated(loc.id, bucket, &first).await.unwrap(),
        InsertOutcome::Inserted
    );
    assert_eq!(
        store
            .insert_aggregated(loc.id, bucket, &second)
            .await
            .unwrap(),
        InsertOutcome::Duplicate
    );
    assert!(store.aggregated_exists(loc.id, bucket).await.unwrap());

    let rows = store
        .list_aggregated_readings(
            loc.id,
            bucket,
            utc("2024-05-01T13:00:00Z"),
            SortOrder::Asc,
            None,
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].measure_data, first);

    let starts = store
        .aggregated_bucket_starts(loc.id, bucket, utc("2024-05-01T13:00:00Z"))
        .await
        .unwrap();
    assert_eq!(starts.into_iter().collect::<Vec<_>>(), vec![bucket]);
}

#[tokio::test]
async fn job_state_round_trips_and_updates() {
    let (_dir, store) = temp_store().await;
    assert!(store.load_job_state("job").await.unwrap().is_none());

    let mut state = JobState {
        job_name: "job".into(),
        trigger: "interval:900000ms".into(),
        next_run_at: utc("2024-05-01T12:15:00Z"),
        last_run_at: None,
    };
    store.save_job_state(&state).await.unwrap();
    assert_eq!(store.load_job_state("job").await.unwrap(), Some(state.clone()));

    state.last_run_at = Some(utc("2024-05-01T12:15:00Z"));
    state.next_run_at = utc("2024-05-01T12:30:00Z");
    store.save_job_state(&state).await.unwrap();
    assert_eq!(store.load_job_state("job").await.unwrap(), Some(state));
}
