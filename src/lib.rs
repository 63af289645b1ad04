#![allow(dead_code, unused_imports, unused_variables)]

pub mod bus;
pub mod config;
pub mod fleet;
pub mod sink;
pub mod utils;

use std::sync::Arc;
use std::time::Instant;

use crate::bus::Broker;
use crate::config::Config;
use crate::sink::TelemetrySink;

// ========================================
// ENGINE (The Singleton)
// ========================================

/// The central brain of the simulation.
/// Holds the in-process bus and the telemetry sink.
/// Cheap to clone (all fields are Arcs).
#[derive(Clone)]
pub struct FleetEngine {
    pub bus: Arc<Broker>,
    pub sink: Arc<dyn TelemetrySink>,
    pub start_time: Instant,
}

impl FleetEngine {
    /// Build the bus and start its background pulses (redelivery +
    /// keepalive). Must be called from within a tokio runtime.
    pub fn new(config: &Config, sink: Arc<dyn TelemetrySink>) -> Self {
        let bus = Broker::new(config.bus.clone());
        bus.start();

        Self {
            bus,
            sink,
            start_time: Instant::now(),
        }
    }
}
