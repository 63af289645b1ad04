//! Broker: the in-process bus façade
//!
//! Binds the bus-side components together behind the transport contract the
//! clients see: connect / subscribe / publish / acknowledge / disconnect plus
//! a push channel of deliveries per connection. Locking is per key: one
//! mutex per session identity, one per shared group, taken in that order and
//! never inverted, so unrelated identities and groups never contend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::delivery::DeliveryTracker;
use crate::bus::groups::{GroupKey, RouteOutcome, SharedGroupRouter};
use crate::bus::liveness::{LivenessBroadcaster, LivenessStatus};
use crate::bus::retained::RetainedStore;
use crate::bus::session::{Connection, InFlight, OpenOutcome, Session, SessionRef, SessionStore};
use crate::bus::topic::{validate_publish_topic, SubscriptionFilter};
use crate::bus::types::{ClientId, Delivery, DeliveryId, Message, QoS, WillSpec};
use crate::bus::errors::BusError;
use crate::config::BusConfig;
use crate::utils::current_time_ms;

pub struct Broker {
    config: BusConfig,
    sessions: SessionStore,
    router: SharedGroupRouter,
    liveness: LivenessBroadcaster,
    tracker: DeliveryTracker,
    retained: RetainedStore,
}

impl Broker {
    pub fn new(config: BusConfig) -> Arc<Self> {
        let liveness = LivenessBroadcaster::new(config.status_prefix.clone());
        let tracker = DeliveryTracker::new(config.ack_timeout_ms);
        Arc::new(Self {
            config,
            sessions: SessionStore::new(),
            router: SharedGroupRouter::new(),
            liveness,
            tracker,
            retained: RetainedStore::new(),
        })
    }

    /// Spawn the bus-side background tasks: the redelivery pulse and the
    /// keepalive watchdog. They live as long as the runtime.
    pub fn start(self: &Arc<Self>) {
        let broker = self.clone();
        tokio::spawn(async move { broker.run_redelivery_loop().await });
        let broker = self.clone();
        tokio::spawn(async move { broker.run_keepalive_loop().await });
    }

    pub fn liveness(&self) -> &LivenessBroadcaster {
        &self.liveness
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    // ==========================================
    // CONNECT / DISCONNECT
    // ==========================================

    /// Open a connection for `identity`. A prior persistent session is
    /// resumed (its unacked deliveries replayed, in original order, before
    /// anything new); `persistent == false` is a clean start. A second
    /// connect for the same identity takes the session over and the older
    /// connection's channel closes.
    pub fn connect(
        self: &Arc<Self>,
        identity: ClientId,
        persistent: bool,
        will: Option<WillSpec>,
    ) -> BusHandle {
        let (tx, rx) = mpsc::unbounded_channel();

        let (session, outcome) = self.sessions.open(&identity, persistent);
        match outcome {
            OpenOutcome::CleanStart => {
                debug!(identity = %identity, "clean start, prior session discarded");
                self.router.leave_all(&identity);
                self.liveness.clear_will(&identity);
            }
            OpenOutcome::Resumed => debug!(identity = %identity, "session resumed"),
            OpenOutcome::Created => debug!(identity = %identity, "session created"),
        }

        if let Some(will) = will {
            self.liveness.register_will(&identity, will);
        }

        let generation = self.sessions.next_generation();
        {
            // Attach and replay under one lock, so no concurrent fan-out can
            // slip a new delivery in front of the resumed backlog (or see it
            // in `pending` and have it replayed twice).
            let mut guard = session.lock();
            guard.conn = Some(Connection {
                sender: tx,
                generation,
            });
            guard.last_ping_ms = current_time_ms();

            // Resumed sessions get their unacked backlog first, same
            // delivery ids, attempt counters bumped.
            self.replay_pending(&identity, &mut guard);
        }

        // A reconnecting shared-group member picks up the group backlog.
        for message in self.router.drain_for(&identity) {
            let qos = message.qos;
            self.deliver(&session, message, qos);
        }

        self.liveness.announce(self, &identity, LivenessStatus::Online);

        BusHandle {
            identity,
            generation,
            broker: self.clone(),
            rx,
            closed: false,
        }
    }

    fn replay_pending(&self, identity: &ClientId, guard: &mut Session) {
        let now = current_time_ms();

        let mut replays: Vec<(DeliveryId, Arc<Message>, u32)> = Vec::new();
        for (id, inflight) in guard.pending.iter_mut() {
            inflight.attempts += 1;
            replays.push((*id, inflight.message.clone(), inflight.attempts));
        }

        for (id, message, attempt) in replays {
            let pushed = guard.push(Delivery {
                delivery_id: Some(id),
                topic: message.topic.clone(),
                payload: message.payload.clone(),
                attempt,
            });
            if pushed {
                self.tracker.arm((identity.clone(), id), now);
            }
        }
    }

    /// Close a connection. Graceful closes clear the will and announce
    /// offline; ungraceful ones (detected loss) fire the will instead.
    /// Non-persistent sessions are purged either way.
    fn close_connection(&self, identity: &ClientId, generation: u64, graceful: bool) {
        let session = match self.sessions.get(identity) {
            Some(s) => s,
            None => return,
        };

        let persistent = {
            let mut guard = session.lock();
            match guard.generation() {
                // only the generation that owns the connection may close it
                Some(current) if current == generation => {}
                _ => return,
            }
            guard.conn = None;
            guard.persistent
        };

        if graceful {
            debug!(identity = %identity, "graceful disconnect");
            self.liveness.clear_will(identity);
            self.liveness.announce(self, identity, LivenessStatus::Offline);
        } else {
            warn!(identity = %identity, "connection lost");
            self.liveness.fire_will(self, identity);
        }

        if !persistent {
            self.discard_session(identity);
        }
    }

    fn discard_session(&self, identity: &ClientId) {
        self.sessions.remove(identity);
        self.router.leave_all(identity);
        self.liveness.clear_will(identity);
    }

    // ==========================================
    // SUBSCRIBE / UNSUBSCRIBE
    // ==========================================

    pub fn subscribe(&self, identity: &ClientId, pattern: &str, max_qos: QoS) -> Result<(), BusError> {
        let sub = SubscriptionFilter::parse(pattern, max_qos)?;
        let session = self
            .sessions
            .get(identity)
            .ok_or_else(|| BusError::Transport(format!("no session for '{}'", identity)))?;

        {
            let mut guard = session.lock();
            guard.last_ping_ms = current_time_ms();
            guard.upsert_subscription(sub.clone());
        }

        match &sub.shared_group {
            Some(group) => {
                let key = GroupKey::new(group.clone(), sub.filter.pattern());
                self.router.join(key, identity);
                // a joining member drains whatever queued while the group was dark
                for message in self.router.drain_for(identity) {
                    let qos = message.qos;
                    self.deliver(&session, message, qos);
                }
            }
            None => {
                // retained values for every topic the filter matches, right away
                for (topic, retained) in self.retained.collect_matching(&sub.filter) {
                    let effective = retained.qos.min(sub.max_qos);
                    let message = Arc::new(Message {
                        topic,
                        payload: retained.payload,
                        qos: retained.qos,
                        retain: true,
                        correlation_id: None,
                        response_topic: None,
                    });
                    self.deliver(&session, message, effective);
                }
            }
        }

        Ok(())
    }

    pub fn unsubscribe(&self, identity: &ClientId, pattern: &str) {
        // the stored form is the inner filter + group, so parse first
        let parsed = match SubscriptionFilter::parse(pattern, QoS::AtMostOnce) {
            Ok(p) => p,
            Err(_) => return,
        };
        let session = match self.sessions.get(identity) {
            Some(s) => s,
            None => return,
        };
        let removed = session
            .lock()
            .remove_subscription(parsed.filter.pattern(), parsed.shared_group.as_deref());
        for sub in removed {
            if let Some(group) = &sub.shared_group {
                let key = GroupKey::new(group.clone(), sub.filter.pattern());
                self.router.leave(&key, identity);
            }
        }
    }

    // ==========================================
    // PUBLISH / FAN-OUT
    // ==========================================

    /// Publish a message to all matching subscribers. Returns the number of
    /// deliveries actually pushed to online sessions (offline persistent
    /// sessions and dark shared groups queue instead).
    pub fn publish(&self, message: Message) -> Result<usize, BusError> {
        validate_publish_topic(&message.topic)?;
        Ok(self.fanout(message))
    }

    /// Bus-originated publishes (liveness records, wills) built from
    /// already-validated topics.
    pub(crate) fn publish_from_bus(&self, message: Message) {
        self.fanout(message);
    }

    fn fanout(&self, message: Message) -> usize {
        if message.retain {
            self.retained.apply(&message.topic, &message.payload, message.qos);
        }

        let message = Arc::new(message);

        // Scan pass: figure out, per session, the strongest non-shared match
        // and, per shared group, the per-member QoS ceiling. Session locks
        // are taken one at a time and released before delivery starts.
        let mut direct: Vec<(SessionRef, QoS)> = Vec::new();
        let mut group_hits: HashMap<GroupKey, HashMap<ClientId, QoS>> = HashMap::new();

        for session in self.sessions.snapshot() {
            let guard = session.lock();
            let mut best: Option<QoS> = None;
            for sub in &guard.subscriptions {
                if !sub.filter.matches(&message.topic) {
                    continue;
                }
                let effective = message.qos.min(sub.max_qos);
                match &sub.shared_group {
                    Some(group) => {
                        let key = GroupKey::new(group.clone(), sub.filter.pattern());
                        let ceiling = group_hits
                            .entry(key)
                            .or_default()
                            .entry(guard.identity.clone())
                            .or_insert(effective);
                        *ceiling = std::cmp::max(*ceiling, effective);
                    }
                    // one copy per session even when several own filters match
                    None => best = Some(best.map_or(effective, |b| std::cmp::max(b, effective))),
                }
            }
            let matched = best;
            drop(guard);
            if let Some(qos) = matched {
                direct.push((session, qos));
            }
        }

        let mut sent = 0;

        for (session, qos) in direct {
            if self.deliver(&session, message.clone(), qos) {
                sent += 1;
            }
        }

        for (key, ceilings) in group_hits {
            let outcome = self.router.route(&key, message.clone(), |member| {
                self.sessions
                    .get(member)
                    .map(|s| s.lock().is_online())
                    .unwrap_or(false)
            });
            match outcome {
                RouteOutcome::Member(member) => {
                    if let Some(session) = self.sessions.get(&member) {
                        let qos = ceilings.get(&member).copied().unwrap_or(message.qos);
                        if self.deliver(&session, message.clone(), qos) {
                            sent += 1;
                        }
                    }
                }
                RouteOutcome::Queued => {
                    debug!(topic = %message.topic, group = %key.group, "shared group dark, message queued");
                }
                RouteOutcome::NoGroup => {}
            }
        }

        sent
    }

    /// Hand one message to one recipient session. QoS 0 is push-and-forget;
    /// QoS 1 records the in-flight state first, so a failed push (offline
    /// session) is replayed on resume rather than lost.
    fn deliver(&self, session: &SessionRef, message: Arc<Message>, qos: QoS) -> bool {
        match qos {
            QoS::AtMostOnce => {
                let guard = session.lock();
                guard.push(Delivery {
                    delivery_id: None,
                    topic: message.topic.clone(),
                    payload: message.payload.clone(),
                    attempt: 1,
                })
            }
            QoS::AtLeastOnce => {
                let now = current_time_ms();
                let id = Uuid::new_v4();
                let mut guard = session.lock();
                let identity = guard.identity.clone();
                guard.pending.insert(
                    id,
                    InFlight {
                        delivery_id: id,
                        message: message.clone(),
                        attempts: 0,
                        first_sent_at: now,
                    },
                );
                let pushed = guard.push(Delivery {
                    delivery_id: Some(id),
                    topic: message.topic.clone(),
                    payload: message.payload.clone(),
                    attempt: 1,
                });
                if pushed {
                    if let Some(inflight) = guard.pending.get_mut(&id) {
                        inflight.attempts = 1;
                    }
                    self.tracker.arm((identity, id), now);
                }
                pushed
            }
        }
    }

    // ==========================================
    // ACK / PING
    // ==========================================

    /// Idempotent: acknowledging an unknown delivery id is a no-op, and only
    /// the first ack for a given id removes anything.
    pub fn acknowledge(&self, identity: &ClientId, delivery_id: DeliveryId) {
        let session = match self.sessions.get(identity) {
            Some(s) => s,
            None => return,
        };
        let mut guard = session.lock();
        guard.last_ping_ms = current_time_ms();
        if guard.pending.remove(&delivery_id).is_some() {
            debug!(identity = %identity, %delivery_id, "delivery acknowledged");
        }
        // the tracker entry is left to lapse; expiry checks pending first
    }

    pub fn ping(&self, identity: &ClientId) {
        if let Some(session) = self.sessions.get(identity) {
            session.lock().last_ping_ms = current_time_ms();
        }
    }

    // ==========================================
    // BACKGROUND PULSES
    // ==========================================

    /// Redelivery pulse: sleep until the earliest ack deadline (or until a
    /// new earlier one is armed), then re-push everything expired.
    async fn run_redelivery_loop(&self) {
        loop {
            let next_wake_up = self.tracker.next_deadline();
            let now = current_time_ms();

            match next_wake_up {
                Some(ts) if ts <= now => self.redeliver_expired(now),
                Some(ts) => {
                    let duration = Duration::from_millis(ts - now);
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {
                            self.redeliver_expired(current_time_ms());
                        }
                        _ = self.tracker.wakeup.notified() => {
                            // an earlier deadline appeared; recompute the sleep
                            continue;
                        }
                    }
                }
                None => self.tracker.wakeup.notified().await,
            }
        }
    }

    fn redeliver_expired(&self, now: u64) {
        for (identity, delivery_id) in self.tracker.take_expired(now) {
            let session = match self.sessions.get(&identity) {
                Some(s) => s,
                None => continue,
            };
            let mut guard = session.lock();
            let online = guard.is_online();

            let (message, attempt) = match guard.pending.get_mut(&delivery_id) {
                // offline recipients keep their pending state; the resume
                // path replays it instead of the pulse
                Some(inflight) if online => {
                    inflight.attempts += 1;
                    (inflight.message.clone(), inflight.attempts)
                }
                // already acked (stale tracker entry) or offline
                _ => continue,
            };

            debug!(identity = %identity, %delivery_id, attempt, "ack timeout, redelivering");
            let pushed = guard.push(Delivery {
                delivery_id: Some(delivery_id),
                topic: message.topic.clone(),
                payload: message.payload.clone(),
                attempt,
            });
            if pushed {
                self.tracker.arm((identity.clone(), delivery_id), now);
            }
        }
    }

    /// Keepalive watchdog: a connected session that stops pinging past the
    /// keepalive window is treated as lost, which is what makes the will
    /// fire without any cooperation from the dead client.
    async fn run_keepalive_loop(&self) {
        let tick = Duration::from_millis((self.config.keepalive_ms / 2).max(10));
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await; // skip the immediate tick

        loop {
            interval.tick().await;
            let now = current_time_ms();

            let mut lost = Vec::new();
            for session in self.sessions.snapshot() {
                let guard = session.lock();
                if let Some(generation) = guard.generation() {
                    if now.saturating_sub(guard.last_ping_ms) > self.config.keepalive_ms {
                        lost.push((guard.identity.clone(), generation));
                    }
                }
            }

            for (identity, generation) in lost {
                warn!(identity = %identity, "keepalive expired");
                self.close_connection(&identity, generation, false);
            }
        }
    }
}

// ==========================================
// BUS HANDLE
// ==========================================

/// Client-side handle for one connection. Dropping it without a graceful
/// `disconnect` counts as connection loss: the broker fires the will, same
/// as a keepalive expiry would.
pub struct BusHandle {
    identity: ClientId,
    generation: u64,
    broker: Arc<Broker>,
    rx: mpsc::UnboundedReceiver<Delivery>,
    closed: bool,
}

impl BusHandle {
    pub fn identity(&self) -> &ClientId {
        &self.identity
    }

    /// Next inbound delivery. `None` means the connection is gone (takeover
    /// or bus shutdown).
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }

    pub fn subscribe(&self, pattern: &str, max_qos: QoS) -> Result<(), BusError> {
        self.broker.subscribe(&self.identity, pattern, max_qos)
    }

    pub fn unsubscribe(&self, pattern: &str) {
        self.broker.unsubscribe(&self.identity, pattern)
    }

    pub fn publish(&self, message: Message) -> Result<usize, BusError> {
        self.broker.ping(&self.identity);
        self.broker.publish(message)
    }

    pub fn acknowledge(&self, delivery_id: DeliveryId) {
        self.broker.acknowledge(&self.identity, delivery_id)
    }

    pub fn ping(&self) {
        self.broker.ping(&self.identity)
    }

    /// Close the connection. Graceful closes never fire the will; an
    /// ungraceful close goes down the same path as a detected loss.
    pub fn disconnect(mut self, graceful: bool) {
        self.closed = true;
        self.broker
            .close_connection(&self.identity, self.generation, graceful);
    }
}

impl Drop for BusHandle {
    fn drop(&mut self) {
        if !self.closed {
            self.broker
                .close_connection(&self.identity, self.generation, false);
        }
    }
}
