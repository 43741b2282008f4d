//! Configuration management for the appointment service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! A `.env` file in the working directory is read first (see [`dotenvy`]).
//!
//! | Variable | Default |
//! |----------|---------|
//! | `KAFKA_BROKERS` | `localhost:9092` |
//! | `KAFKA_CLIENT_ID` | `appointment-service` |
//! | `KAFKA_GROUP_ID` | `appointment-consumer-group` |
//! | `KAFKA_START_POSITION` | `earliest` |
//! | `KAFKA_RETRIES` | `8` |
//! | `KAFKA_RETRY_BACKOFF_MS` | `100` |
//! | `APPOINTMENT_TOPIC` | `appointments-topic` |
//! | `APPOINTMENT_TOPIC_CREATED` | `appointments-created` |
//! | `APPOINTMENT_TOPIC_UPDATED` | `appointments-updated` |
//! | `APPOINTMENT_TOPIC_CANCELLED` | `appointments-cancelled` |
//! | `METRICS_ENABLED` | `false` |
//! | `METRICS_ADDR` | `0.0.0.0:9090` |

use anyhow::{Context, anyhow, bail};
use appointment_events_core::broker::{BrokerError, StartPosition};
use appointment_events_core::topic::{
    APPOINTMENTS_CANCELLED_TOPIC, APPOINTMENTS_CREATED_TOPIC, APPOINTMENTS_TOPIC,
    APPOINTMENTS_UPDATED_TOPIC, TopicRegistry,
};
use appointment_events_redpanda::{DEFAULT_CLIENT_ID, DEFAULT_CONSUMER_GROUP, RedpandaClient};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Broker connection settings
    pub kafka: KafkaConfig,
    /// Topic names, validated into a [`TopicRegistry`]
    pub topics: TopicRegistry,
    /// Prometheus exporter settings
    pub metrics: MetricsConfig,
}

/// Kafka/Redpanda connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    /// Client id reported to the broker
    pub client_id: String,
    /// Consumer group id
    pub group_id: String,
    /// Start position for a group without committed offsets
    pub start_position: StartPosition,
    /// Retries for transient failures
    pub retries: u32,
    /// Backoff between retries
    pub retry_backoff: Duration,
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Install the exporter
    pub enabled: bool,
    /// Listen address for `/metrics`
    pub addr: SocketAddr,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error naming the variable if a value cannot be parsed or
    /// the topic names are not distinct.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a
    /// variable if set.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let kafka = KafkaConfig {
            brokers: var("KAFKA_BROKERS", "localhost:9092"),
            client_id: var("KAFKA_CLIENT_ID", DEFAULT_CLIENT_ID),
            group_id: var("KAFKA_GROUP_ID", DEFAULT_CONSUMER_GROUP),
            start_position: parse_start_position(&var("KAFKA_START_POSITION", "earliest"))?,
            retries: parse(&lookup, "KAFKA_RETRIES", 8)?,
            retry_backoff: Duration::from_millis(parse(&lookup, "KAFKA_RETRY_BACKOFF_MS", 100)?),
        };

        let topics = TopicRegistry::new(
            var("APPOINTMENT_TOPIC", APPOINTMENTS_TOPIC),
            var("APPOINTMENT_TOPIC_CREATED", APPOINTMENTS_CREATED_TOPIC),
            var("APPOINTMENT_TOPIC_UPDATED", APPOINTMENTS_UPDATED_TOPIC),
            var("APPOINTMENT_TOPIC_CANCELLED", APPOINTMENTS_CANCELLED_TOPIC),
        )
        .ok_or_else(|| anyhow!("APPOINTMENT_TOPIC_* names must be non-empty and distinct"))?;

        let metrics = MetricsConfig {
            enabled: parse(&lookup, "METRICS_ENABLED", false)?,
            addr: parse(&lookup, "METRICS_ADDR", SocketAddr::from(([0, 0, 0, 0], 9090)))?,
        };

        Ok(Self {
            kafka,
            topics,
            metrics,
        })
    }

    /// Build the broker client these settings describe.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if no brokers are configured.
    pub fn redpanda_client(&self) -> Result<RedpandaClient, BrokerError> {
        RedpandaClient::builder()
            .brokers(&self.kafka.brokers)
            .client_id(&self.kafka.client_id)
            .consumer_group(&self.kafka.group_id)
            .start_position(self.kafka.start_position)
            .retries(self.kafka.retries)
            .retry_backoff(self.kafka.retry_backoff)
            .build()
    }
}

fn parse<T>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

fn parse_start_position(raw: &str) -> anyhow::Result<StartPosition> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "earliest" | "beginning" => Ok(StartPosition::Earliest),
        "latest" | "end" => Ok(StartPosition::Latest),
        other => bail!("invalid value for KAFKA_START_POSITION: {other:?} (expected earliest or latest)"),
    }
}
