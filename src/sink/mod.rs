//! Telemetry Sink: the single write contract toward durable storage
//!
//! The bus core only ever calls `store`; everything behind it (batching,
//! retries, the actual table) is the sink's own business. A failing sink is
//! logged and retried here, never propagated back into delivery processing.

pub mod memory;
pub mod sqlite;
pub mod writer;

use serde::{Deserialize, Serialize};

pub use memory::MemorySink;
pub use sqlite::SqliteSink;

// ---------- TelemetryRecord ----------

/// One validated telemetry observation, ready for the relational store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub machine_id: String,
    pub temperature: f64,
    pub vibration: f64,
    /// RFC3339 timestamp of the observation.
    pub observed_at: String,
}

// ---------- SinkError ----------

#[derive(Debug, Clone, PartialEq)]
pub enum SinkError {
    /// The sink's writer is gone; nothing will be stored anymore.
    Closed,
    Storage(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Closed => write!(f, "telemetry sink closed"),
            SinkError::Storage(msg) => write!(f, "telemetry storage error: {}", msg),
        }
    }
}

impl std::error::Error for SinkError {}

// ---------- TelemetrySink ----------

/// External collaborator contract. `store` must not block delivery
/// processing: implementations hand the record off and flush on their own.
pub trait TelemetrySink: Send + Sync {
    fn store(&self, record: TelemetryRecord) -> Result<(), SinkError>;
}
