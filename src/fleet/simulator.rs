//! Fleet Simulator: spawns the machine and ingest tasks and runs the
//! operator control surface.
//!
//! Lifecycle is explicit: one root `CancellationToken` for the fleet, a
//! child token per task. `Stop` drains gracefully; `Crash` terminates the
//! target without a disconnect handshake so the bus-side will path fires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::liveness::LivenessRecord;
use crate::bus::types::{ClientId, QoS};
use crate::bus::Broker;
use crate::config::FleetConfig;
use crate::fleet::ingest::run_ingest;
use crate::fleet::machine::run_machine;
use crate::FleetEngine;

// ==========================================
// OPERATOR COMMANDS
// ==========================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FleetScope {
    Member(String),
    All,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FleetCommand {
    /// Drain and disconnect cleanly.
    Stop(FleetScope),
    /// Terminate without a disconnect handshake (the will fires).
    Crash(FleetScope),
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum MachineOrder {
    Stop,
    Crash,
}

// ==========================================
// SIMULATOR
// ==========================================

pub struct FleetSimulator {
    engine: FleetEngine,
    config: FleetConfig,
}

impl FleetSimulator {
    pub fn new(engine: FleetEngine, config: FleetConfig) -> Self {
        Self { engine, config }
    }

    /// Run the fleet until a `Stop(All)` arrives (or the command channel
    /// closes), then wait for every task to drain.
    pub async fn run(self, mut commands: mpsc::Receiver<FleetCommand>) {
        let token = CancellationToken::new();
        let mut tasks = JoinSet::new();

        tasks.spawn(run_status_watch(self.engine.bus.clone(), token.child_token()));

        for i in 0..self.config.ingest_consumers {
            tasks.spawn(run_ingest(
                self.engine.bus.clone(),
                self.engine.sink.clone(),
                format!("ingest_{}", i + 1),
                self.config.clone(),
                token.child_token(),
            ));
        }

        let mut machine_orders: HashMap<String, mpsc::Sender<MachineOrder>> = HashMap::new();
        for i in 0..self.config.machines {
            let machine_id = format!("machine_{}", i + 1);
            let (order_tx, order_rx) = mpsc::channel(4);
            machine_orders.insert(machine_id.clone(), order_tx);
            tasks.spawn(run_machine(
                self.engine.bus.clone(),
                self.config.clone(),
                machine_id,
                order_rx,
                token.child_token(),
            ));
        }

        info!(
            machines = self.config.machines,
            consumers = self.config.ingest_consumers,
            "fleet running"
        );

        loop {
            match commands.recv().await {
                Some(FleetCommand::Stop(FleetScope::All)) | None => {
                    info!("global stop: draining fleet");
                    token.cancel();
                    break;
                }
                Some(FleetCommand::Crash(FleetScope::All)) => {
                    warn!("global crash ordered");
                    for order_tx in machine_orders.values() {
                        let _ = order_tx.send(MachineOrder::Crash).await;
                    }
                }
                Some(FleetCommand::Stop(FleetScope::Member(id))) => {
                    match machine_orders.get(&id) {
                        Some(order_tx) => {
                            let _ = order_tx.send(MachineOrder::Stop).await;
                        }
                        None => warn!(member = %id, "stop for unknown fleet member"),
                    }
                }
                Some(FleetCommand::Crash(FleetScope::Member(id))) => {
                    match machine_orders.get(&id) {
                        Some(order_tx) => {
                            let _ = order_tx.send(MachineOrder::Crash).await;
                        }
                        None => warn!(member = %id, "crash for unknown fleet member"),
                    }
                }
            }
        }

        while tasks.join_next().await.is_some() {}
        info!("fleet drained");
    }
}

/// Operator visibility: logs every liveness transition seen on the status
/// topic, retained history included.
async fn run_status_watch(broker: Arc<Broker>, token: CancellationToken) {
    let identity = ClientId::from("status_watch");
    let mut handle = broker.connect(identity, false, None);

    let filter = broker.liveness().status_filter();
    if handle.subscribe(&filter, QoS::AtMostOnce).is_err() {
        handle.disconnect(true);
        return;
    }

    let mut ping_timer = tokio::time::interval(Duration::from_millis(1000));
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                handle.disconnect(true);
                return;
            }
            maybe = handle.recv() => match maybe {
                Some(delivery) => match LivenessRecord::decode(&delivery.payload) {
                    Ok(record) => info!(identity = %record.identity, status = ?record.status, "status"),
                    Err(_) => warn!(topic = %delivery.topic, "unreadable status payload"),
                },
                None => return,
            },
            _ = ping_timer.tick() => handle.ping(),
        }
    }
}
