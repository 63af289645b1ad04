use std::sync::Arc;
use std::time::Duration;

use fleetbus::config::SinkConfig;
use fleetbus::sink::sqlite::{count_rows, load_all};
use fleetbus::sink::{MemorySink, SinkError, SqliteSink, TelemetryRecord, TelemetrySink};
use rusqlite::Connection;

fn record(machine_id: &str, temperature: f64) -> TelemetryRecord {
    TelemetryRecord {
        machine_id: machine_id.to_string(),
        temperature,
        vibration: 1.25,
        observed_at: "2026-08-29T12:00:00Z".to_string(),
    }
}

fn test_sink_config(db_path: &str) -> SinkConfig {
    SinkConfig {
        db_path: db_path.to_string(),
        flush_ms: 20,
        batch_size: 100,
        max_flush_retries: 3,
    }
}

#[tokio::test]
async fn stored_records_are_flushed_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("telemetry.db");
    let config = test_sink_config(db_path.to_str().unwrap());

    let sink = SqliteSink::open(&db_path, &config).unwrap();
    for i in 0..10 {
        sink.store(record("machine_1", 20.0 + i as f64 * 0.5)).unwrap();
    }

    // give the writer a couple of flush windows
    tokio::time::sleep(Duration::from_millis(200)).await;

    let conn = Connection::open(&db_path).unwrap();
    assert_eq!(count_rows(&conn).unwrap(), 10);

    let rows = load_all(&conn).unwrap();
    assert_eq!(rows.len(), 10);
    assert_eq!(rows[0].machine_id, "machine_1");
    assert_eq!(rows[0].temperature, 20.0);
    assert_eq!(rows[9].temperature, 24.5);
}

#[tokio::test]
async fn batch_threshold_flushes_without_waiting_for_the_timer() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("telemetry.db");
    let mut config = test_sink_config(db_path.to_str().unwrap());
    config.flush_ms = 60_000; // timer out of the picture
    config.batch_size = 5;

    let sink = SqliteSink::open(&db_path, &config).unwrap();
    for i in 0..5 {
        sink.store(record("machine_2", 22.0 + i as f64)).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    let conn = Connection::open(&db_path).unwrap();
    assert_eq!(count_rows(&conn).unwrap(), 5);
}

#[tokio::test]
async fn memory_sink_surfaces_write_failures() {
    let sink = Arc::new(MemorySink::new());
    sink.store(record("machine_1", 21.0)).unwrap();

    sink.set_fail_writes(true);
    match sink.store(record("machine_1", 22.0)) {
        Err(SinkError::Storage(_)) => {}
        other => panic!("expected a storage error, got {:?}", other),
    }

    sink.set_fail_writes(false);
    sink.store(record("machine_1", 23.0)).unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].temperature, 21.0);
    assert_eq!(records[1].temperature, 23.0);
}
