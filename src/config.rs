use std::env;
use std::sync::OnceLock;

static CONFIG: OnceLock<Config> = OnceLock::new();

// --- CONFIG AGGREGATOR ---

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub bus: BusConfig,
    pub fleet: FleetConfig,
    pub sink: SinkConfig,
}

impl Config {
    pub fn global() -> &'static Config {
        CONFIG.get_or_init(Self::load)
    }

    fn load() -> Self {
        dotenv::dotenv().ok();
        Self {
            log_level: get_env("FLEETBUS_LOG", "info"),
            bus: BusConfig::load(),
            fleet: FleetConfig::load(),
            sink: SinkConfig::load(),
        }
    }
}

// --- MODULES ---

// BUS
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// A connected session silent longer than this is treated as lost.
    pub keepalive_ms: u64,
    /// Unacked QoS 1 deliveries are re-pushed after this long.
    pub ack_timeout_ms: u64,
    pub status_prefix: String,
}

impl BusConfig {
    fn load() -> Self {
        Self {
            keepalive_ms:  get_env("BUS_KEEPALIVE_MS", "5000"),
            ack_timeout_ms: get_env("BUS_ACK_TIMEOUT_MS", "2000"),
            status_prefix: get_env("BUS_STATUS_PREFIX", "fleet/status"),
        }
    }
}

// FLEET
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub machines: usize,
    pub ingest_consumers: usize,
    pub tick_ms: u64,
    /// Per-tick probability of a transient "internet loss" outage.
    pub outage_probability: f64,
    pub outage_min_ms: u64,
    pub outage_max_ms: u64,
    pub payload_target_bytes: usize,
    pub telemetry_prefix: String,
}

impl FleetConfig {
    fn load() -> Self {
        Self {
            machines:             get_env("FLEET_MACHINES", "3"),
            ingest_consumers:     get_env("FLEET_INGEST_CONSUMERS", "2"),
            tick_ms:              get_env("FLEET_TICK_MS", "1000"),
            outage_probability:   get_env("FLEET_OUTAGE_PROBABILITY", "0.05"),
            outage_min_ms:        get_env("FLEET_OUTAGE_MIN_MS", "2000"),
            outage_max_ms:        get_env("FLEET_OUTAGE_MAX_MS", "8000"),
            payload_target_bytes: get_env("FLEET_PAYLOAD_BYTES", "256"),
            telemetry_prefix:     get_env("FLEET_TELEMETRY_PREFIX", "machines"),
        }
    }
}

// SINK
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub db_path: String,
    pub flush_ms: u64,
    pub batch_size: usize,
    /// Failed flushes are retried this many times before the batch is dropped.
    pub max_flush_retries: u32,
}

impl SinkConfig {
    fn load() -> Self {
        Self {
            db_path:           get_env("SINK_DB_PATH", "./data/telemetry.db"),
            flush_ms:          get_env("SINK_FLUSH_MS", "50"),
            batch_size:        get_env("SINK_BATCH_SIZE", "500"),
            max_flush_retries: get_env("SINK_MAX_FLUSH_RETRIES", "5"),
        }
    }
}

// --- PRIVATE HELPER ---

fn get_env<T: std::str::FromStr>(key: &str, default: &str) -> T {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| format!("Config error: {} must be valid", key))
        .unwrap()
}
