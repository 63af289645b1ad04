use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;

use fleetbus::bus::{Broker, BusHandle, Delivery, Message, QoS};
use fleetbus::config::BusConfig;

/// Long keepalive/ack timeouts so background pulses never interfere with a
/// test that is not about them.
pub fn quiet_bus_config() -> BusConfig {
    BusConfig {
        keepalive_ms: 60_000,
        ack_timeout_ms: 60_000,
        status_prefix: "fleet/status".to_string(),
    }
}

pub fn setup_broker() -> Arc<Broker> {
    setup_broker_with(quiet_bus_config())
}

pub fn setup_broker_with(config: BusConfig) -> Arc<Broker> {
    let broker = Broker::new(config);
    broker.start();
    broker
}

pub fn msg(topic: &str, payload: &str, qos: QoS) -> Message {
    Message::new(topic, Bytes::from(payload.to_string()), qos)
}

pub async fn recv_timeout(handle: &mut BusHandle, ms: u64) -> Option<Delivery> {
    timeout(Duration::from_millis(ms), handle.recv())
        .await
        .ok()
        .flatten()
}

pub async fn expect_delivery(handle: &mut BusHandle) -> Delivery {
    recv_timeout(handle, 1_000)
        .await
        .expect("expected a delivery within 1s")
}

pub async fn expect_silence(handle: &mut BusHandle, ms: u64) {
    if let Some(delivery) = recv_timeout(handle, ms).await {
        panic!("unexpected delivery on '{}'", delivery.topic);
    }
}
