//! Appointment consumer process.
//!
//! Subscribes to the created, updated and cancelled topics and dispatches
//! every event to the default (logging) handlers until SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! KAFKA_BROKERS=localhost:9092 cargo run --bin appointment-consumer
//! ```

use anyhow::Context;
use appointment_events_runtime::{
    AppointmentConsumer, HandlerSet, Shutdown, wait_for_signal,
};
use appointment_service::{Config, init_tracing, start_metrics, start_or_disconnect};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file
    let _ = dotenvy::dotenv();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Consumer failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    tracing::info!(
        brokers = %config.kafka.brokers,
        group = %config.kafka.group_id,
        start_position = %config.kafka.start_position,
        "Configuration loaded"
    );
    let _metrics = start_metrics(&config.metrics)?;

    let client = config.redpanda_client()?;
    let consumer = Arc::new(AppointmentConsumer::new(
        Arc::new(client.consumer()),
        Arc::new(config.topics.clone()),
    ));

    start_or_disconnect(
        async {
            consumer.connect().await?;
            consumer.subscribe::<&str>(&[]).await
        },
        consumer.disconnect(),
    )
    .await
    .context("starting consumer")?;

    let shutdown = Shutdown::new();
    let signals = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match wait_for_signal().await {
                Ok(signal) => {
                    tracing::info!(signal, "Shutdown signal received");
                    shutdown.trigger();
                }
                Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signals"),
            }
        })
    };

    tracing::info!(topics = ?consumer.subscriptions(), "Consumer running, press Ctrl+C to stop");
    let outcome = consumer.run(HandlerSet::new(), &shutdown).await;
    signals.abort();

    let disconnected = consumer.disconnect().await;
    let summary = outcome.context("receive loop")?;
    disconnected.context("disconnecting consumer")?;

    tracing::info!(
        received = summary.received,
        dispatched = summary.dispatched,
        dropped = summary.dropped,
        failed = summary.failed,
        "Consumer stopped"
    );
    Ok(())
}
