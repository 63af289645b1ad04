//! Topic Filters: MQTT-style subscription patterns with wildcard matching
//! Supports:
//! - Exact matching: "machines/7/telemetry"
//! - Single-level wildcard: "machines/+/telemetry"
//! - Multi-level wildcard: "machines/#" (also matches "machines" itself)
//! - Shared subscriptions: "$share/<group>/machines/+/telemetry"
//!
//! Malformed filters are rejected here, at subscribe time. `matches` itself
//! is pure and total: any two well-formed strings produce a bool, never a
//! panic.

use crate::bus::errors::BusError;
use crate::bus::types::QoS;

pub const SHARE_PREFIX: &str = "$share";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicFilter {
    pattern: String,
    segments: Vec<String>,
}

impl TopicFilter {
    pub fn parse(pattern: &str) -> Result<Self, BusError> {
        if pattern.is_empty() {
            return Err(BusError::ProtocolViolation("empty topic filter".to_string()));
        }

        let segments: Vec<String> = pattern.split('/').map(|s| s.to_string()).collect();
        let last = segments.len() - 1;

        for (i, seg) in segments.iter().enumerate() {
            if seg == "#" && i != last {
                return Err(BusError::ProtocolViolation(format!(
                    "'#' must be the final segment in '{}'",
                    pattern
                )));
            }
            // '+' and '#' are only legal as whole segments, never glued to text
            if seg.len() > 1 && (seg.contains('#') || seg.contains('+')) {
                return Err(BusError::ProtocolViolation(format!(
                    "wildcard mixed with literal text in segment '{}'",
                    seg
                )));
            }
        }

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Pure structural match of a concrete topic against this filter.
    pub fn matches(&self, topic: &str) -> bool {
        let parts: Vec<&str> = topic.split('/').collect();
        let segments: Vec<&str> = self.segments.iter().map(String::as_str).collect();
        Self::match_recursive(&segments, &parts)
    }

    fn match_recursive(filter: &[&str], topic: &[&str]) -> bool {
        match filter.split_first() {
            // Filter exhausted: match only if the topic is too
            None => topic.is_empty(),
            // "#" consumes the rest, including zero remaining segments
            Some((&"#", _)) => true,
            Some((head, filter_tail)) => match topic.split_first() {
                None => false,
                Some((topic_head, topic_tail)) => {
                    if *head == "+" || head == topic_head {
                        Self::match_recursive(filter_tail, topic_tail)
                    } else {
                        false
                    }
                }
            },
        }
    }
}

// ==========================================
// SUBSCRIPTION FILTER
// ==========================================

/// A parsed subscription: topic filter + QoS ceiling + optional shared
/// (competing-consumer) group extracted from the `$share/<group>/` prefix.
#[derive(Clone, Debug)]
pub struct SubscriptionFilter {
    pub filter: TopicFilter,
    pub max_qos: QoS,
    pub shared_group: Option<String>,
}

impl SubscriptionFilter {
    pub fn parse(pattern: &str, max_qos: QoS) -> Result<Self, BusError> {
        if let Some(rest) = pattern.strip_prefix(SHARE_PREFIX) {
            let rest = rest.strip_prefix('/').ok_or_else(|| {
                BusError::ProtocolViolation(format!("malformed shared subscription '{}'", pattern))
            })?;

            let (group, topic_pattern) = rest.split_once('/').ok_or_else(|| {
                BusError::ProtocolViolation(format!(
                    "shared subscription '{}' is missing a topic filter",
                    pattern
                ))
            })?;

            if group.is_empty() || group.contains('+') || group.contains('#') {
                return Err(BusError::ProtocolViolation(format!(
                    "invalid shared group name '{}'",
                    group
                )));
            }

            return Ok(Self {
                filter: TopicFilter::parse(topic_pattern)?,
                max_qos,
                shared_group: Some(group.to_string()),
            });
        }

        Ok(Self {
            filter: TopicFilter::parse(pattern)?,
            max_qos,
            shared_group: None,
        })
    }

    pub fn is_shared(&self) -> bool {
        self.shared_group.is_some()
    }
}

/// Publish topics are concrete: no wildcards, no `$share` prefix.
pub fn validate_publish_topic(topic: &str) -> Result<(), BusError> {
    if topic.is_empty() {
        return Err(BusError::ProtocolViolation("empty publish topic".to_string()));
    }
    if topic.contains('+') || topic.contains('#') {
        return Err(BusError::ProtocolViolation(format!(
            "publish topic '{}' must not contain wildcards",
            topic
        )));
    }
    if topic.starts_with(SHARE_PREFIX) {
        return Err(BusError::ProtocolViolation(format!(
            "publish topic '{}' must not use the shared-subscription prefix",
            topic
        )));
    }
    Ok(())
}

// ==========================================
// TESTS
// ==========================================
