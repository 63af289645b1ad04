//! Shared-Subscription Router: competing-consumer fan-out
//!
//! Each (group, filter) pair is one shared group. A message matched by the
//! group's filter goes to exactly one member: round-robin over the members
//! that are online at routing time, tie-broken by subscription insertion
//! order. With zero online members the message queues at group level and is
//! drained to whichever member comes back first.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::bus::types::{ClientId, Message};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub group: String,
    pub pattern: String,
}

impl GroupKey {
    pub fn new(group: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            pattern: pattern.into(),
        }
    }
}

struct SharedGroup {
    /// Insertion order of subscription; the round-robin tie-break.
    members: Vec<ClientId>,
    cursor: usize,
    /// Group-level backlog while no member is online.
    queued: VecDeque<Arc<Message>>,
}

impl SharedGroup {
    fn new() -> Self {
        Self {
            members: Vec::new(),
            cursor: 0,
            queued: VecDeque::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.members.is_empty() && self.queued.is_empty()
    }
}

pub enum RouteOutcome {
    Member(ClientId),
    /// No member online; the message was queued against the group.
    Queued,
    /// The group no longer exists (raced with the last unsubscribe).
    NoGroup,
}

pub struct SharedGroupRouter {
    groups: DashMap<GroupKey, Mutex<SharedGroup>>,
}

impl SharedGroupRouter {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }

    pub fn join(&self, key: GroupKey, client: &ClientId) {
        let entry = self.groups.entry(key).or_insert_with(|| Mutex::new(SharedGroup::new()));
        let mut group = entry.lock();
        if !group.members.contains(client) {
            group.members.push(client.clone());
        }
    }

    pub fn leave(&self, key: &GroupKey, client: &ClientId) {
        let mut drop_group = false;
        if let Some(entry) = self.groups.get(key) {
            let mut group = entry.lock();
            if let Some(pos) = group.members.iter().position(|m| m == client) {
                group.members.remove(pos);
                // keep the cursor pointing at the same successor
                if pos < group.cursor {
                    group.cursor -= 1;
                }
                if !group.members.is_empty() {
                    group.cursor %= group.members.len();
                } else {
                    group.cursor = 0;
                }
            }
            drop_group = group.is_empty();
        }
        if drop_group {
            self.groups.remove_if(key, |_, entry| entry.lock().is_empty());
        }
    }

    /// Drop `client` from every group it belongs to (session discard).
    pub fn leave_all(&self, client: &ClientId) {
        let keys: Vec<GroupKey> = self
            .groups
            .iter()
            .filter(|entry| entry.value().lock().members.contains(client))
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            self.leave(&key, client);
        }
    }

    /// Pick the member for one message, advancing the round-robin cursor.
    /// `is_online` is re-evaluated per message so departures and arrivals
    /// take effect immediately.
    pub fn route<F>(&self, key: &GroupKey, message: Arc<Message>, is_online: F) -> RouteOutcome
    where
        F: Fn(&ClientId) -> bool,
    {
        let entry = match self.groups.get(key) {
            Some(e) => e,
            None => return RouteOutcome::NoGroup,
        };
        let mut group = entry.lock();

        let n = group.members.len();
        for i in 0..n {
            let idx = (group.cursor + i) % n;
            let candidate = group.members[idx].clone();
            if is_online(&candidate) {
                group.cursor = (idx + 1) % n;
                return RouteOutcome::Member(candidate);
            }
        }

        group.queued.push_back(message);
        RouteOutcome::Queued
    }

    /// Take the backlog of every group `client` belongs to. Called when a
    /// member (re)connects or joins; the caller delivers the drained
    /// messages to that member as normal tracked deliveries.
    pub fn drain_for(&self, client: &ClientId) -> Vec<Arc<Message>> {
        let mut drained = Vec::new();
        for entry in self.groups.iter() {
            let mut group = entry.value().lock();
            if group.members.contains(client) && !group.queued.is_empty() {
                drained.extend(group.queued.drain(..));
            }
        }
        drained
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn queued_len(&self, key: &GroupKey) -> usize {
        self.groups
            .get(key)
            .map(|entry| entry.lock().queued.len())
            .unwrap_or(0)
    }
}
