//! Liveness Broadcaster: retained status records + the last-will contract
//!
//! Every participant gets a status topic under `fleet/status/<identity>`
//! carrying a retained JSON record. Online records go out on (re)connect,
//! offline records on graceful disconnect. For abnormal connection loss the
//! bus itself publishes the will registered at connect time; the departing
//! client is not involved.

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bus::broker::Broker;
use crate::bus::types::{ClientId, Message, QoS, WillSpec};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessStatus {
    Online,
    Offline,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LivenessRecord {
    pub identity: String,
    pub status: LivenessStatus,
}

impl LivenessRecord {
    pub fn new(identity: &ClientId, status: LivenessStatus) -> Self {
        Self {
            identity: identity.0.clone(),
            status,
        }
    }

    pub fn encode(&self) -> Bytes {
        // a two-field struct cannot fail to serialize
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn decode(payload: &Bytes) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

pub struct LivenessBroadcaster {
    wills: DashMap<ClientId, WillSpec>,
    status_prefix: String,
}

impl LivenessBroadcaster {
    pub fn new(status_prefix: String) -> Self {
        Self {
            wills: DashMap::new(),
            status_prefix,
        }
    }

    pub fn status_topic(&self, identity: &ClientId) -> String {
        format!("{}/{}", self.status_prefix, identity.0)
    }

    /// Wildcard filter covering every identity's status topic.
    pub fn status_filter(&self) -> String {
        format!("{}/#", self.status_prefix)
    }

    /// Capture the will at connect time. It is held here, bus-side, until
    /// the connection ends one way or the other.
    pub fn register_will(&self, identity: &ClientId, will: WillSpec) {
        self.wills.insert(identity.clone(), will);
    }

    /// Graceful disconnect: the will must never fire.
    pub fn clear_will(&self, identity: &ClientId) {
        self.wills.remove(identity);
    }

    pub fn has_will(&self, identity: &ClientId) -> bool {
        self.wills.contains_key(identity)
    }

    /// Broadcast a retained status record on the identity's status topic.
    pub fn announce(&self, broker: &Broker, identity: &ClientId, status: LivenessStatus) {
        let record = LivenessRecord::new(identity, status);
        let message = Message::new(
            self.status_topic(identity),
            record.encode(),
            QoS::AtMostOnce,
        )
        .retained();
        info!(identity = %identity, ?status, "liveness transition");
        broker.publish_from_bus(message);
    }

    /// Fire the registered will once. `remove` makes this idempotent: a
    /// keepalive expiry racing a dropped handle still produces one broadcast.
    pub fn fire_will(&self, broker: &Broker, identity: &ClientId) {
        if let Some((_, will)) = self.wills.remove(identity) {
            info!(identity = %identity, topic = %will.topic, "broadcasting last will");
            let mut message = Message::new(will.topic, will.payload, will.qos);
            message.retain = will.retain;
            broker.publish_from_bus(message);
        }
    }
}
