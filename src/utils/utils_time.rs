use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;

/// Milliseconds since the unix epoch. All deadline bookkeeping uses this clock.
pub fn current_time_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
