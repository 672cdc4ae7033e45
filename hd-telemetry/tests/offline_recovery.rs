//! Restart recovery: events survive a process restart through the durable
//! mirror, and the validation gate holds across the round trip.

use std::sync::Arc;

use serde_json::json;

use hd_core::config::TelemetryConfig;
use hd_core::constants::storage_keys;
use hd_core::storage::{KeyValueStore, SqliteStore};
use hd_telemetry::{Analytics, MemoryTransmitter};

fn quiet_config() -> TelemetryConfig {
    TelemetryConfig {
        enabled: true,
        batch_size: 100,
        batch_interval_ms: 60_000,
        max_queue_size: 500,
        load_discard_fraction: 0.5,
        flush_discard_fraction: 0.3,
    }
}

#[tokio::test]
async fn events_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("huddle.db");

    {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let analytics =
            Analytics::new(quiet_config(), store, Arc::new(MemoryTransmitter::new()));
        analytics.track("room_joined", json!({"roomId": "r-1"})).await;
        analytics.track("vote_cast", json!({"choice": "extend"})).await;
        analytics.track("room_left", json!({"roomId": "r-1"})).await;
    }

    // "Restart": a fresh store over the same database file
    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let analytics = Analytics::new(quiet_config(), store, Arc::new(MemoryTransmitter::new()));
    analytics.load_persisted().await;

    let snapshot = analytics.snapshot().await;
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot[0].event_type, "room_joined");
    assert_eq!(snapshot[1].event_type, "vote_cast");
    assert_eq!(snapshot[2].event_type, "room_left");
    assert_eq!(snapshot[1].event_data["choice"], "extend");
}

#[tokio::test]
async fn blank_typed_entries_are_absent_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("huddle.db");

    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    // A hand-written mirror with one entry that fails the validation gate
    let blob = json!([
        {"event_type": "room_joined", "event_data": {}, "metadata": {}},
        {"event_type": "   ", "event_data": {}, "metadata": {}},
        {"event_type": "room_left", "event_data": {}, "metadata": {}},
    ]);
    store
        .set(storage_keys::ANALYTICS_QUEUE, &blob.to_string())
        .await
        .unwrap();

    let analytics = Analytics::new(quiet_config(), store, Arc::new(MemoryTransmitter::new()));
    analytics.load_persisted().await;

    let types: Vec<String> = analytics
        .snapshot()
        .await
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(types, vec!["room_joined".to_string(), "room_left".to_string()]);
}
