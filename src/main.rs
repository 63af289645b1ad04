use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fleetbus::config::Config;
use fleetbus::fleet::{FleetCommand, FleetScope, FleetSimulator};
use fleetbus::sink::{SqliteSink, TelemetrySink};
use fleetbus::FleetEngine;

// ========================================
// MAIN ENTRY POINT
// ========================================

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let config = Config::global();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("FLEETBUS_LOG")
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let sink: Arc<dyn TelemetrySink> = match SqliteSink::open(&config.sink.db_path, &config.sink) {
        Ok(sink) => sink,
        Err(e) => {
            eprintln!("Cannot open telemetry database at {}: {}", config.sink.db_path, e);
            std::process::exit(1);
        }
    };

    let engine = FleetEngine::new(config, sink);
    info!(
        machines = config.fleet.machines,
        consumers = config.fleet.ingest_consumers,
        db = %config.sink.db_path,
        "fleetbus starting"
    );

    let (command_tx, command_rx) = mpsc::channel::<FleetCommand>(16);
    let simulator = FleetSimulator::new(engine, config.fleet.clone());
    let fleet_task = tokio::spawn(simulator.run(command_rx));

    tokio::signal::ctrl_c().await.ok();
    info!("ctrl-c received, draining fleet");
    let _ = command_tx.send(FleetCommand::Stop(FleetScope::All)).await;
    let _ = fleet_task.await;
}
