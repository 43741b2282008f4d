//! Appointment producer process.
//!
//! Reads newline-delimited JSON commands from stdin, publishes them and
//! writes one JSON result line per command to stdout. Stops at end of input
//! or on SIGINT/SIGTERM, even while a read from an interactive terminal is
//! still pending.
//!
//! # Usage
//!
//! ```bash
//! echo '{"command":"cancel","id":"appt-1","reason":"Patient request"}' \
//!     | cargo run --bin appointment-producer
//! ```

use anyhow::Context;
use appointment_events_core::environment::SystemClock;
use appointment_events_runtime::{AppointmentProducer, Shutdown, wait_for_signal};
use appointment_service::{
    Config, detached_reader, init_tracing, pump, start_metrics, start_or_disconnect,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file
    let _ = dotenvy::dotenv();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Producer failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    tracing::info!(brokers = %config.kafka.brokers, "Configuration loaded");
    let _metrics = start_metrics(&config.metrics)?;

    let client = config.redpanda_client()?;
    let producer = AppointmentProducer::new(
        Arc::new(client.producer()),
        Arc::new(config.topics.clone()),
        Arc::new(SystemClock),
    );

    start_or_disconnect(producer.connect(), producer.disconnect())
        .await
        .context("starting producer")?;

    let shutdown = Shutdown::new();
    let signals = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Ok(signal) = wait_for_signal().await {
                tracing::info!(signal, "Shutdown signal received");
                shutdown.trigger();
            }
        })
    };

    let mut stdout = tokio::io::stdout();
    let outcome = pump(
        &producer,
        BufReader::new(detached_reader(std::io::stdin())),
        &mut stdout,
        &shutdown,
    )
    .await;
    signals.abort();

    let disconnected = producer.disconnect().await;
    let summary = outcome.context("reading commands")?;
    disconnected.context("disconnecting producer")?;

    tracing::info!(
        published = summary.published,
        rejected = summary.rejected,
        malformed = summary.malformed,
        "Producer stopped"
    );
    Ok(())
}
