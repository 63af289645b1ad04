//! Bus Types: public types shared across the bus modules

use bytes::Bytes;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        ClientId(s.to_string())
    }
}

/// Delivery guarantee level. 0 = fire and forget, 1 = acknowledged + retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

impl QoS {
    /// Effective QoS of a delivery: the lower of publish QoS and the
    /// subscription ceiling.
    pub fn min(self, other: QoS) -> QoS {
        std::cmp::min(self, other)
    }
}

pub type DeliveryId = Uuid;

/// A published message. Immutable once handed to the bus.
#[derive(Clone, Debug)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub correlation_id: Option<String>,
    pub response_topic: Option<String>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Bytes, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload,
            qos,
            retain: false,
            correlation_id: None,
            response_topic: None,
        }
    }

    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }
}

/// What a subscriber task pulls off its inbound channel.
/// `delivery_id` is present only for QoS 1 and must be echoed back via
/// `acknowledge`. `attempt` starts at 1; anything above 1 is a redelivery.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub delivery_id: Option<DeliveryId>,
    pub topic: String,
    pub payload: Bytes,
    pub attempt: u32,
}

/// Last-will contract, captured at connect time and held bus-side.
/// The client's later in-memory state has no influence on it.
#[derive(Clone, Debug)]
pub struct WillSpec {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}
