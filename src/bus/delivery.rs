//! Delivery Tracker: ack deadlines for QoS 1 in-flight messages
//!
//! The tracker owns only the deadline index; the in-flight records
//! themselves live in each recipient session's pending map. An entry here is
//! a hint, not the source of truth: on expiry the session is consulted, and
//! anything already acknowledged is skipped. Removal on ack is therefore
//! lazy, which keeps every ambiguity resolved toward redelivery, never loss.

use std::collections::BTreeMap;

use hashlink::LinkedHashSet;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::bus::types::{ClientId, DeliveryId};

pub(crate) type DeliveryKey = (ClientId, DeliveryId);

pub struct DeliveryTracker {
    /// deadline_ms -> keys expiring at that instant, FIFO within the slot
    deadlines: Mutex<BTreeMap<u64, LinkedHashSet<DeliveryKey>>>,
    /// Wakes the redelivery pulse when a new earliest deadline appears.
    pub(crate) wakeup: Notify,
    ack_timeout_ms: u64,
}

impl DeliveryTracker {
    pub fn new(ack_timeout_ms: u64) -> Self {
        Self {
            deadlines: Mutex::new(BTreeMap::new()),
            wakeup: Notify::new(),
            ack_timeout_ms,
        }
    }

    pub fn ack_timeout_ms(&self) -> u64 {
        self.ack_timeout_ms
    }

    /// Arm (or re-arm) the ack deadline for a delivery just pushed.
    pub(crate) fn arm(&self, key: DeliveryKey, now_ms: u64) {
        let deadline = now_ms + self.ack_timeout_ms;
        let mut deadlines = self.deadlines.lock();
        deadlines.entry(deadline).or_default().insert(key);

        // wake the pulse only if this became the earliest event
        let is_earliest = deadlines.keys().next().map(|&t| t == deadline).unwrap_or(false);
        drop(deadlines);
        if is_earliest {
            self.wakeup.notify_one();
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<u64> {
        self.deadlines.lock().keys().next().cloned()
    }

    /// Remove and return every key whose deadline has passed.
    pub(crate) fn take_expired(&self, now_ms: u64) -> Vec<DeliveryKey> {
        let mut deadlines = self.deadlines.lock();
        let mut expired = Vec::new();
        let due: Vec<u64> = deadlines.range(..=now_ms).map(|(&ts, _)| ts).collect();
        for ts in due {
            if let Some(keys) = deadlines.remove(&ts) {
                expired.extend(keys);
            }
        }
        expired
    }

    pub fn armed_len(&self) -> usize {
        self.deadlines.lock().values().map(|keys| keys.len()).sum()
    }
}
