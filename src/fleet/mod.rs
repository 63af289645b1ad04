pub mod ingest;
pub mod machine;
pub mod simulator;
pub mod telemetry;

pub use simulator::{FleetCommand, FleetScope, FleetSimulator};
pub use telemetry::TelemetrySample;
