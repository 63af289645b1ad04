//! In-memory sink, used by tests and as a stand-in when no database is
//! wanted.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{SinkError, TelemetryRecord, TelemetrySink};

#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<TelemetryRecord>>,
    fail_writes: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Make every subsequent `store` fail, for error-path tests.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl TelemetrySink for MemorySink {
    fn store(&self, record: TelemetryRecord) -> Result<(), SinkError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SinkError::Storage("simulated write failure".to_string()));
        }
        self.records.lock().push(record);
        Ok(())
    }
}
