//! Background writer for the sqlite sink.
//!
//! Records arrive on a channel and are flushed in batched transactions, on a
//! timer or whenever the buffer fills. A failed flush keeps its batch and
//! retries on the next tick; after the configured retry budget the batch is
//! dropped with an error so the writer never wedges.

use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::sqlite::insert_batch;
use super::TelemetryRecord;
use crate::config::SinkConfig;

pub async fn run_writer(
    mut rx: mpsc::UnboundedReceiver<TelemetryRecord>,
    mut conn: Connection,
    config: SinkConfig,
) {
    info!("telemetry writer started (flush every {}ms)", config.flush_ms);

    let mut flush_timer = tokio::time::interval(Duration::from_millis(config.flush_ms.max(1)));
    flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut batch: Vec<TelemetryRecord> = Vec::new();
    let mut flush_failures: u32 = 0;

    loop {
        tokio::select! {
            maybe = rx.recv() => {
                match maybe {
                    Some(record) => {
                        batch.push(record);
                        if batch.len() >= config.batch_size {
                            flush(&mut conn, &mut batch, &mut flush_failures, &config);
                        }
                    }
                    None => {
                        // sink dropped: final flush, then exit
                        flush(&mut conn, &mut batch, &mut flush_failures, &config);
                        info!("telemetry writer stopped");
                        return;
                    }
                }
            }
            _ = flush_timer.tick() => {
                flush(&mut conn, &mut batch, &mut flush_failures, &config);
            }
        }
    }
}

fn flush(
    conn: &mut Connection,
    batch: &mut Vec<TelemetryRecord>,
    flush_failures: &mut u32,
    config: &SinkConfig,
) {
    if batch.is_empty() {
        return;
    }

    match insert_batch(conn, batch) {
        Ok(()) => {
            debug!(rows = batch.len(), "telemetry batch flushed");
            batch.clear();
            *flush_failures = 0;
        }
        Err(e) => {
            *flush_failures += 1;
            if *flush_failures > config.max_flush_retries {
                error!(
                    rows = batch.len(),
                    "telemetry flush failed {} times, dropping batch: {}",
                    flush_failures, e
                );
                batch.clear();
                *flush_failures = 0;
            } else {
                // keep the batch, retry on the next tick
                error!("telemetry flush failed (attempt {}): {}", flush_failures, e);
            }
        }
    }
}
