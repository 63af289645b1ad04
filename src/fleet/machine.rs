//! Machine producer task: one simulated telemetry-producing machine.
//!
//! Every tick it publishes a QoS 1 sample. With a configurable probability
//! the tick instead simulates internet loss: the connection is abandoned
//! without a disconnect handshake (so the bus-side will broadcasts the
//! offline record), the task sleeps a random duration, then reconnects and
//! resumes. The reconnect announces the online record through the same
//! liveness path every connect uses.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::liveness::{LivenessRecord, LivenessStatus};
use crate::bus::types::{ClientId, Message, QoS, WillSpec};
use crate::bus::Broker;
use crate::config::FleetConfig;
use crate::fleet::simulator::MachineOrder;
use crate::fleet::telemetry::TelemetrySample;

pub(crate) async fn run_machine(
    broker: Arc<Broker>,
    config: FleetConfig,
    machine_id: String,
    mut orders: mpsc::Receiver<MachineOrder>,
    token: CancellationToken,
) {
    let identity = ClientId(machine_id.clone());
    let topic = format!("{}/{}/telemetry", config.telemetry_prefix, machine_id);

    // The will is the retained offline record for this machine's status
    // topic; the bus publishes it for us if we vanish.
    let will = WillSpec {
        topic: broker.liveness().status_topic(&identity),
        payload: LivenessRecord::new(&identity, LivenessStatus::Offline).encode(),
        qos: QoS::AtMostOnce,
        retain: true,
    };

    let mut rng = StdRng::from_entropy();
    let mut handle = broker.connect(identity.clone(), true, Some(will.clone()));

    let mut tick = tokio::time::interval(Duration::from_millis(config.tick_ms.max(1)));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!(machine = %machine_id, "draining and disconnecting");
                handle.disconnect(true);
                return;
            }
            maybe = orders.recv() => match maybe {
                Some(MachineOrder::Stop) | None => {
                    info!(machine = %machine_id, "operator stop");
                    handle.disconnect(true);
                    return;
                }
                Some(MachineOrder::Crash) => {
                    warn!(machine = %machine_id, "operator crash, terminating without handshake");
                    drop(handle);
                    return;
                }
            },
            _ = tick.tick() => {
                if rng.gen::<f64>() < config.outage_probability {
                    let outage_ms = rng.gen_range(config.outage_min_ms..=config.outage_max_ms);
                    warn!(machine = %machine_id, outage_ms, "transient internet loss");
                    // abandoned, not disconnected: the will fires bus-side
                    drop(handle);
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_millis(outage_ms)) => {}
                    }
                    handle = broker.connect(identity.clone(), true, Some(will.clone()));
                    continue;
                }

                let sample =
                    TelemetrySample::generate(&machine_id, &mut rng, config.payload_target_bytes);
                let message = Message::new(topic.clone(), sample.encode(), QoS::AtLeastOnce);
                match handle.publish(message) {
                    Ok(receivers) => debug!(machine = %machine_id, receivers, "telemetry published"),
                    Err(e) => warn!(machine = %machine_id, "publish failed: {}", e),
                }
            }
        }
    }
}
