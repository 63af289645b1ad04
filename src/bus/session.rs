//! Session Store: per-identity durable session state
//!
//! One session per client identity, at most one live connection at a time.
//! Persistent sessions survive disconnects with their subscription set and
//! pending deliveries intact; a clean start discards any prior session for
//! the identity before creating a fresh one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use hashlink::LinkedHashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::bus::topic::SubscriptionFilter;
use crate::bus::types::{ClientId, Delivery, DeliveryId, Message};
use crate::utils::current_time_ms;

// ---------- InFlight ----------

/// A QoS 1 message awaiting acknowledgment by this session.
/// The delivery id is stable across retries so recipients can deduplicate.
#[derive(Clone, Debug)]
pub struct InFlight {
    pub delivery_id: DeliveryId,
    pub message: Arc<Message>,
    pub attempts: u32,
    pub first_sent_at: u64,
}

// ---------- Connection ----------

/// Live connection half of a session. The generation guards against a stale
/// handle (pre-takeover, or an already-detected loss) closing the wrong
/// connection.
pub(crate) struct Connection {
    pub sender: mpsc::UnboundedSender<Delivery>,
    pub generation: u64,
}

// ---------- Session ----------

pub struct Session {
    pub identity: ClientId,
    pub persistent: bool,
    /// Insertion order is kept: it is the tie-break order for shared groups.
    pub subscriptions: Vec<SubscriptionFilter>,
    /// FIFO by first send, O(1) removal on ack.
    pub pending: LinkedHashMap<DeliveryId, InFlight>,
    pub(crate) conn: Option<Connection>,
    pub last_ping_ms: u64,
}

impl Session {
    fn new(identity: ClientId, persistent: bool) -> Self {
        Self {
            identity,
            persistent,
            subscriptions: Vec::new(),
            pending: LinkedHashMap::new(),
            conn: None,
            last_ping_ms: current_time_ms(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.conn.is_some()
    }

    pub(crate) fn generation(&self) -> Option<u64> {
        self.conn.as_ref().map(|c| c.generation)
    }

    /// Push a delivery to the connected client. Returns false when the
    /// session is offline or its channel is gone (the caller treats both the
    /// same way: keep the in-flight state and wait for a resume).
    pub(crate) fn push(&self, delivery: Delivery) -> bool {
        match &self.conn {
            Some(conn) => conn.sender.send(delivery).is_ok(),
            None => false,
        }
    }

    /// Replace or append a subscription, keeping the original position when
    /// the same pattern is subscribed again (QoS ceiling update).
    pub fn upsert_subscription(&mut self, sub: SubscriptionFilter) {
        let pattern = sub.filter.pattern().to_string();
        let shared = sub.shared_group.clone();
        match self.subscriptions.iter().position(|existing| {
            existing.filter.pattern() == pattern && existing.shared_group == shared
        }) {
            Some(pos) => self.subscriptions[pos] = sub,
            None => self.subscriptions.push(sub),
        }
    }

    pub fn remove_subscription(
        &mut self,
        pattern: &str,
        shared_group: Option<&str>,
    ) -> Vec<SubscriptionFilter> {
        let (removed, kept): (Vec<_>, Vec<_>) = self.subscriptions.drain(..).partition(|sub| {
            sub.filter.pattern() == pattern && sub.shared_group.as_deref() == shared_group
        });
        self.subscriptions = kept;
        removed
    }
}

pub type SessionRef = Arc<Mutex<Session>>;

// ---------- SessionStore ----------

pub enum OpenOutcome {
    Created,
    Resumed,
    /// A previous session for the identity was thrown away (clean start).
    CleanStart,
}

pub struct SessionStore {
    sessions: DashMap<ClientId, SessionRef>,
    next_generation: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn get(&self, identity: &ClientId) -> Option<SessionRef> {
        self.sessions.get(identity).map(|entry| entry.value().clone())
    }

    /// Open a session for `identity`. A prior persistent session is resumed;
    /// a clean start (`persistent == false`) discards any prior state first.
    /// The caller attaches the connection afterwards, under the session lock.
    pub fn open(&self, identity: &ClientId, persistent: bool) -> (SessionRef, OpenOutcome) {
        if !persistent {
            let had_prior = self.sessions.remove(identity).is_some();
            let session = Arc::new(Mutex::new(Session::new(identity.clone(), false)));
            self.sessions.insert(identity.clone(), session.clone());
            let outcome = if had_prior {
                OpenOutcome::CleanStart
            } else {
                OpenOutcome::Created
            };
            return (session, outcome);
        }

        if let Some(existing) = self.get(identity) {
            existing.lock().persistent = true;
            return (existing, OpenOutcome::Resumed);
        }

        let session = Arc::new(Mutex::new(Session::new(identity.clone(), true)));
        self.sessions.insert(identity.clone(), session.clone());
        (session, OpenOutcome::Created)
    }

    /// Generation for a fresh connection. Monotonic and bus-wide, so a stale
    /// handle can never own a later connection.
    pub(crate) fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    pub fn remove(&self, identity: &ClientId) -> Option<SessionRef> {
        self.sessions.remove(identity).map(|(_, s)| s)
    }

    /// Snapshot of all session refs; used by the publish fan-out scan and
    /// the keepalive watchdog so no map guard is held across session locks.
    pub fn snapshot(&self) -> Vec<SessionRef> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
