//! Prometheus metrics for observability and monitoring.
//!
//! Counters and histograms for both ends of the pipeline:
//! - Producer publishes and publish failures
//! - Consumer receives, drops and per-stage failures
//! - Publish and handler latency
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed, so the producer and consumer can record
//! unconditionally.
//!
//! # Example
//!
//! ```rust,no_run
//! use appointment_events_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use appointment_events_core::topic::EventCategory;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and start serving `/metrics`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built (e.g. the address is in
    /// use) or the recorder cannot be installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs
    /// a warning and leaves the existing recorder in place.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            // Configure histogram buckets for latency measurements
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                register_metrics();
                tokio::spawn(async move {
                    if let Err(e) = exporter.await {
                        tracing::error!(error = ?e, "Metrics exporter stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Producer Metrics
    describe_counter!(
        "appointment_events_published_total",
        "Total number of envelopes published, by category"
    );
    describe_counter!(
        "appointment_publish_errors_total",
        "Total number of publish requests that failed"
    );
    describe_histogram!(
        "appointment_publish_duration_seconds",
        "Time taken for the broker to acknowledge a publish"
    );

    // Consumer Metrics
    describe_counter!(
        "appointment_messages_received_total",
        "Total number of messages received from subscribed topics"
    );
    describe_counter!(
        "appointment_messages_dropped_total",
        "Total number of messages on topics without a category"
    );
    describe_counter!(
        "appointment_message_failures_total",
        "Total number of messages that failed, by stage (receive, decode, handler)"
    );
    describe_histogram!(
        "appointment_handler_duration_seconds",
        "Time taken to dispatch one message"
    );
}

/// Producer metrics recorder.
pub struct ProducerMetrics;

impl ProducerMetrics {
    /// Record a successful publish of `count` envelopes.
    pub fn record_published(category: EventCategory, count: usize, duration: Duration) {
        counter!("appointment_events_published_total", "event_type" => category.event_type())
            .increment(count as u64);
        histogram!("appointment_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed publish.
    pub fn record_publish_error(category: EventCategory) {
        counter!("appointment_publish_errors_total", "event_type" => category.event_type())
            .increment(1);
    }
}

/// Consumer metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a received message.
    pub fn record_received(topic: &str) {
        counter!("appointment_messages_received_total", "topic" => topic.to_string()).increment(1);
    }

    /// Record a message dropped for having no category.
    pub fn record_dropped(topic: &str) {
        counter!("appointment_messages_dropped_total", "topic" => topic.to_string()).increment(1);
    }

    /// Record a failure at `stage` (`receive`, `decode` or `handler`).
    pub fn record_failure(stage: &'static str) {
        counter!("appointment_message_failures_total", "stage" => stage).increment(1);
    }

    /// Record how long one dispatch took.
    pub fn record_dispatch(duration: Duration) {
        histogram!("appointment_handler_duration_seconds").record(duration.as_secs_f64());
    }
}
