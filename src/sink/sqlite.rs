//! Schema + statements for the sqlite-backed telemetry sink.

use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, Connection, Result};
use tokio::sync::mpsc;

use super::writer::run_writer;
use super::{SinkError, TelemetryRecord, TelemetrySink};
use crate::config::SinkConfig;

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS telemetry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            machine_id TEXT NOT NULL,
            temperature REAL NOT NULL,
            vibration REAL NOT NULL,
            observed_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_telemetry_machine
         ON telemetry (machine_id, observed_at)",
        [],
    )?;

    Ok(())
}

/// One transaction per batch; all-or-nothing so a retry never half-applies.
pub fn insert_batch(conn: &mut Connection, records: &[TelemetryRecord]) -> Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO telemetry (machine_id, temperature, vibration, observed_at)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for record in records {
            stmt.execute(params![
                record.machine_id,
                record.temperature,
                record.vibration,
                record.observed_at,
            ])?;
        }
    }
    tx.commit()
}

pub fn load_all(conn: &Connection) -> Result<Vec<TelemetryRecord>> {
    let mut stmt = conn.prepare(
        "SELECT machine_id, temperature, vibration, observed_at FROM telemetry ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(TelemetryRecord {
            machine_id: row.get(0)?,
            temperature: row.get(1)?,
            vibration: row.get(2)?,
            observed_at: row.get(3)?,
        })
    })?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

pub fn count_rows(conn: &Connection) -> Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM telemetry", [], |row| {
        row.get::<_, i64>(0).map(|n| n as u64)
    })
}

// ---------- SqliteSink ----------

/// Sink implementation backed by a dedicated writer task: `store` only
/// enqueues, the writer batches inserts behind a flush interval.
pub struct SqliteSink {
    tx: mpsc::UnboundedSender<TelemetryRecord>,
}

impl SqliteSink {
    /// Open (or create) the database and spawn the writer. Must be called
    /// from within a tokio runtime.
    pub fn open(path: impl AsRef<Path>, config: &SinkConfig) -> Result<Arc<Self>, SinkError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SinkError::Storage(e.to_string()))?;
        }

        let conn = Connection::open(path).map_err(|e| SinkError::Storage(e.to_string()))?;
        init_db(&conn).map_err(|e| SinkError::Storage(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(rx, conn, config.clone()));

        Ok(Arc::new(Self { tx }))
    }
}

impl TelemetrySink for SqliteSink {
    fn store(&self, record: TelemetryRecord) -> Result<(), SinkError> {
        self.tx.send(record).map_err(|_| SinkError::Closed)
    }
}
