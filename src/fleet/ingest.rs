//! Ingest consumer task: one member of the shared `ingest` group.
//!
//! Each consumer competes for telemetry deliveries, hands decoded records to
//! the telemetry sink and acknowledges. A sink failure is the sink's problem
//! (it logs and retries internally); it never blocks the acknowledgment.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::bus::types::{ClientId, QoS};
use crate::bus::Broker;
use crate::config::FleetConfig;
use crate::fleet::telemetry::TelemetrySample;
use crate::sink::TelemetrySink;

pub(crate) async fn run_ingest(
    broker: Arc<Broker>,
    sink: Arc<dyn TelemetrySink>,
    consumer_id: String,
    config: FleetConfig,
    token: CancellationToken,
) {
    let identity = ClientId(consumer_id.clone());
    let mut handle = broker.connect(identity, true, None);

    let pattern = format!("$share/ingest/{}/+/telemetry", config.telemetry_prefix);
    if let Err(e) = handle.subscribe(&pattern, QoS::AtLeastOnce) {
        error!(consumer = %consumer_id, "subscribe failed: {}", e);
        handle.disconnect(true);
        return;
    }

    let mut ping_timer = tokio::time::interval(Duration::from_millis(1000));
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                // acks happen inline below, so nothing of ours is in flight here
                handle.disconnect(true);
                return;
            }
            maybe = handle.recv() => match maybe {
                Some(delivery) => {
                    match TelemetrySample::decode(&delivery.payload) {
                        Ok(sample) => {
                            debug!(consumer = %consumer_id, machine = %sample.machine_id, "telemetry ingested");
                            if let Err(e) = sink.store(sample.to_record()) {
                                warn!(consumer = %consumer_id, "sink write failed: {}", e);
                            }
                        }
                        Err(e) => warn!(consumer = %consumer_id, "malformed telemetry payload: {}", e),
                    }
                    // delivered from the bus's perspective either way
                    if let Some(delivery_id) = delivery.delivery_id {
                        handle.acknowledge(delivery_id);
                    }
                }
                None => {
                    warn!(consumer = %consumer_id, "connection closed by bus");
                    return;
                }
            },
            _ = ping_timer.tick() => handle.ping(),
        }
    }
}
