//! Appointment service processes.
//!
//! Two binaries drive the pipeline against a Kafka-compatible broker:
//!
//! - `appointment-consumer`: subscribes to the three category topics and runs
//!   the default handlers until SIGINT/SIGTERM
//! - `appointment-producer`: reads newline-delimited JSON commands from stdin
//!   (see [`commands`]) and publishes them
//!
//! Both load [`Config`] from the environment, install tracing through
//! [`init_tracing`], and disconnect on every exit path.

pub mod commands;
pub mod config;

pub use commands::{Command, PumpSummary, pump};
pub use config::{Config, KafkaConfig, MetricsConfig};

use appointment_events_runtime::metrics::MetricsServer;
use std::future::Future;
use std::io::Read;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "appointment_service=info,appointment_events_runtime=info,appointment_events_redpanda=info";

/// Install the global tracing subscriber (`RUST_LOG` aware, fmt output).
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Start the Prometheus exporter if enabled.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics(config: &MetricsConfig) -> anyhow::Result<Option<MetricsServer>> {
    if !config.enabled {
        return Ok(None);
    }
    let mut server = MetricsServer::new(config.addr);
    server.start()?;
    Ok(Some(server))
}

/// Run `startup`; if it fails, make one best-effort `disconnect` attempt
/// before returning the startup error.
///
/// # Errors
///
/// Returns the startup error.
pub async fn start_or_disconnect<S, D, E, DE>(startup: S, disconnect: D) -> Result<(), E>
where
    S: Future<Output = Result<(), E>>,
    D: Future<Output = Result<(), DE>>,
    DE: std::fmt::Display,
{
    match startup.await {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Err(disconnect_error) = disconnect.await {
                tracing::warn!(error = %disconnect_error, "Disconnect after failed startup also failed");
            }
            Err(e)
        }
    }
}

const READ_CHUNK: usize = 8 * 1024;

/// Read `source` on a detached thread and expose it as an async stream.
///
/// Blocking reads such as an interactive stdin cannot be cancelled, and a
/// runtime waits for its blocking pool on shutdown. Here the read happens on
/// a plain thread the runtime never joins, so dropping the returned stream
/// lets the process exit while a read is still pending. The stream ends when
/// `source` reaches end of input or fails.
///
/// Must be called from inside a tokio runtime.
#[must_use]
pub fn detached_reader<R>(mut source: R) -> DuplexStream
where
    R: Read + Send + 'static,
{
    let (reader, mut writer) = tokio::io::duplex(READ_CHUNK);
    let handle = tokio::runtime::Handle::current();

    std::thread::spawn(move || {
        let mut buf = vec![0; READ_CHUNK];
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Input read failed");
                    break;
                }
            };
            // The reader side is gone once the consumer has stopped.
            if handle.block_on(writer.write_all(&buf[..n])).is_err() {
                break;
            }
        }
    });

    reader
}
