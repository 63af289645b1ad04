//! Retained Messages: last value per concrete topic
//!
//! A retained publish replaces the previous value for its topic; an empty
//! retained payload clears it. New subscribers receive the current value for
//! every topic their filter matches, immediately after subscribing.

use bytes::Bytes;
use dashmap::DashMap;

use crate::bus::topic::TopicFilter;
use crate::bus::types::QoS;
use crate::utils::current_time_ms;

#[derive(Clone, Debug)]
pub struct RetainedMessage {
    pub payload: Bytes,
    pub qos: QoS,
    pub published_at_ms: u64,
}

pub struct RetainedStore {
    by_topic: DashMap<String, RetainedMessage>,
}

impl RetainedStore {
    pub fn new() -> Self {
        Self {
            by_topic: DashMap::new(),
        }
    }

    /// Store or clear the retained value for a topic (empty payload clears).
    pub fn apply(&self, topic: &str, payload: &Bytes, qos: QoS) {
        if payload.is_empty() {
            self.by_topic.remove(topic);
        } else {
            self.by_topic.insert(
                topic.to_string(),
                RetainedMessage {
                    payload: payload.clone(),
                    qos,
                    published_at_ms: current_time_ms(),
                },
            );
        }
    }

    /// All retained values whose topic matches the filter, as (topic, message).
    pub fn collect_matching(&self, filter: &TopicFilter) -> Vec<(String, RetainedMessage)> {
        self.by_topic
            .iter()
            .filter(|entry| filter.matches(entry.key()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_topic.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_and_clear() {
        let store = RetainedStore::new();
        store.apply("fleet/status/m1", &Bytes::from("online"), QoS::AtMostOnce);
        assert_eq!(store.len(), 1);

        // overwrite
        store.apply("fleet/status/m1", &Bytes::from("offline"), QoS::AtMostOnce);
        let filter = TopicFilter::parse("fleet/status/#").unwrap();
        let hits = store.collect_matching(&filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1.payload, Bytes::from("offline"));

        // empty payload clears
        store.apply("fleet/status/m1", &Bytes::new(), QoS::AtMostOnce);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_collect_matching_uses_wildcards() {
        let store = RetainedStore::new();
        store.apply("fleet/status/m1", &Bytes::from("a"), QoS::AtMostOnce);
        store.apply("fleet/status/m2", &Bytes::from("b"), QoS::AtMostOnce);
        store.apply("machines/1/telemetry", &Bytes::from("c"), QoS::AtMostOnce);

        let filter = TopicFilter::parse("fleet/status/+").unwrap();
        let mut topics: Vec<String> = store
            .collect_matching(&filter)
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        topics.sort();
        assert_eq!(topics, vec!["fleet/status/m1", "fleet/status/m2"]);
    }
}
