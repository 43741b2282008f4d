//! Redpanda transport for the appointment event pipeline.
//!
//! This crate implements the broker capability traits from
//! `appointment-events-core` on top of rdkafka, so it works with Redpanda,
//! Apache Kafka or any other Kafka-compatible broker.
//!
//! - [`RedpandaProducer`] implements [`PublishTransport`](appointment_events_core::broker::PublishTransport)
//! - [`RedpandaConsumer`] implements [`ConsumeTransport`](appointment_events_core::broker::ConsumeTransport)
//!
//! Both are created from one [`RedpandaClient`], which holds the shared
//! connection settings. The client is an ordinary value: build it once and
//! hand its transports to the producer and consumer that need them.
//!
//! # Delivery Semantics
//!
//! - Publishing waits for the broker acknowledgement of every message and
//!   reports its partition and offset. librdkafka retries transient failures
//!   (`retries`, `retry_backoff`) before a publish is reported as failed.
//! - Consuming commits offsets automatically. Combined with the consumer's
//!   log-and-skip policy this is at-most-once processing per message.
//! - Ordering is guaranteed within a partition. Messages are keyed by
//!   appointment id, so all events of one appointment share a partition.
//!
//! # Example
//!
//! ```no_run
//! use appointment_events_redpanda::RedpandaClient;
//! use appointment_events_core::broker::StartPosition;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RedpandaClient::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("appointment-consumer-group")
//!     .start_position(StartPosition::Earliest)
//!     .build()?;
//!
//! let publish = Arc::new(client.producer());
//! let consume = Arc::new(client.consumer());
//! # Ok(())
//! # }
//! ```

/// Kafka consumer transport
pub mod consumer;

/// Kafka producer transport
pub mod producer;

pub use consumer::RedpandaConsumer;
pub use producer::RedpandaProducer;

use appointment_events_core::broker::{BrokerError, StartPosition};
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaResult;
use rdkafka::metadata::Metadata;
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;

/// Default client id.
pub const DEFAULT_CLIENT_ID: &str = "appointment-service";

/// Default consumer group.
pub const DEFAULT_CONSUMER_GROUP: &str = "appointment-consumer-group";

/// Resolved connection settings shared by a client's transports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedpandaSettings {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    /// Client id reported to the broker
    pub client_id: String,
    /// Consumer group id
    pub consumer_group: String,
    /// Producer acknowledgement mode (`0`, `1`, `all`)
    pub producer_acks: String,
    /// Compression codec (`none`, `gzip`, `snappy`, `lz4`, `zstd`)
    pub compression: String,
    /// Bound on metadata, seek and delivery waits
    pub timeout: Duration,
    /// Retries for transient failures
    pub retries: u32,
    /// Backoff between retries
    pub retry_backoff: Duration,
    /// Consumer group session timeout
    pub session_timeout: Duration,
    /// Consumer group heartbeat interval
    pub heartbeat_interval: Duration,
    /// Where a consumer without a committed offset starts
    pub start_position: StartPosition,
    /// Let the broker create topics on first use
    pub allow_auto_create_topics: bool,
}

impl RedpandaSettings {
    /// librdkafka configuration for a producer.
    #[must_use]
    pub fn producer_config(&self) -> ClientConfig {
        let mut config = self.common_config();
        config
            .set("acks", &self.producer_acks)
            .set("compression.type", &self.compression)
            .set("message.timeout.ms", millis(self.timeout))
            .set("message.send.max.retries", self.retries.to_string());
        config
    }

    /// librdkafka configuration for a consumer.
    #[must_use]
    pub fn consumer_config(&self) -> ClientConfig {
        let mut config = self.common_config();
        config
            .set("group.id", &self.consumer_group)
            .set("auto.offset.reset", self.start_position.as_str())
            .set("enable.auto.commit", "true")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", millis(self.session_timeout))
            .set("heartbeat.interval.ms", millis(self.heartbeat_interval));
        config
    }

    fn common_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_id)
            .set("retry.backoff.ms", millis(self.retry_backoff))
            .set("reconnect.backoff.ms", millis(self.retry_backoff))
            .set(
                "allow.auto.create.topics",
                self.allow_auto_create_topics.to_string(),
            );
        config
    }
}

fn millis(duration: Duration) -> String {
    duration.as_millis().to_string()
}

/// Redpanda client: shared settings plus transport factories.
///
/// # Example
///
/// ```no_run
/// use appointment_events_redpanda::RedpandaClient;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Basic configuration
/// let client = RedpandaClient::new("localhost:9092")?;
///
/// // Custom configuration
/// let client = RedpandaClient::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct RedpandaClient {
    settings: Arc<RedpandaSettings>,
}

impl RedpandaClient {
    /// Create a client with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if `brokers` is empty.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for configuring the client.
    #[must_use]
    pub fn builder() -> RedpandaClientBuilder {
        RedpandaClientBuilder::default()
    }

    /// The resolved settings.
    #[must_use]
    pub fn settings(&self) -> &RedpandaSettings {
        &self.settings
    }

    /// A disconnected publishing transport.
    #[must_use]
    pub fn producer(&self) -> RedpandaProducer {
        RedpandaProducer::new(Arc::clone(&self.settings))
    }

    /// A disconnected consuming transport.
    #[must_use]
    pub fn consumer(&self) -> RedpandaConsumer {
        RedpandaConsumer::new(Arc::clone(&self.settings))
    }
}

/// Builder for configuring a [`RedpandaClient`].
///
/// # Example
///
/// ```no_run
/// use appointment_events_redpanda::RedpandaClient;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RedpandaClient::builder()
///     .brokers("localhost:9092")
///     .client_id("appointment-service")
///     .retries(8)
///     .retry_backoff(Duration::from_millis(100))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaClientBuilder {
    brokers: Option<String>,
    client_id: Option<String>,
    consumer_group: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    retries: Option<u32>,
    retry_backoff: Option<Duration>,
    session_timeout: Option<Duration>,
    heartbeat_interval: Option<Duration>,
    start_position: Option<StartPosition>,
    allow_auto_create_topics: Option<bool>,
}

impl RedpandaClientBuilder {
    /// Set the broker addresses.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses (e.g., "localhost:9092")
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the client id. Default: `appointment-service`
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the consumer group. Default: `appointment-consumer-group`
    ///
    /// Instances sharing a group split the partitions between them.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the producer acknowledgment mode.
    ///
    /// - `acks`: "0" (no acks), "1" (leader ack), "all" (all replicas ack)
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd"
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Bound on delivery, metadata and seek waits. Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retries for transient failures. Default: 8
    #[must_use]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Backoff between retries and reconnects. Default: 100 ms
    #[must_use]
    pub const fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = Some(backoff);
        self
    }

    /// Consumer group session timeout. Default: 30 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Consumer group heartbeat interval. Default: 3 seconds
    #[must_use]
    pub const fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Where a consumer without a committed offset starts. Default: earliest
    #[must_use]
    pub const fn start_position(mut self, position: StartPosition) -> Self {
        self.start_position = Some(position);
        self
    }

    /// Let the broker create topics on first use. Default: true
    #[must_use]
    pub const fn allow_auto_create_topics(mut self, allow: bool) -> Self {
        self.allow_auto_create_topics = Some(allow);
        self
    }

    /// Build the [`RedpandaClient`].
    ///
    /// No connection is made here; transports connect on `connect()`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers are not set.
    pub fn build(self) -> Result<RedpandaClient, BrokerError> {
        let brokers = self
            .brokers
            .filter(|brokers| !brokers.trim().is_empty())
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;

        let settings = RedpandaSettings {
            brokers,
            client_id: self
                .client_id
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            producer_acks: self.producer_acks.unwrap_or_else(|| "all".to_string()),
            compression: self.compression.unwrap_or_else(|| "none".to_string()),
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            retries: self.retries.unwrap_or(8),
            retry_backoff: self.retry_backoff.unwrap_or(Duration::from_millis(100)),
            session_timeout: self.session_timeout.unwrap_or(Duration::from_secs(30)),
            heartbeat_interval: self.heartbeat_interval.unwrap_or(Duration::from_secs(3)),
            start_position: self.start_position.unwrap_or_default(),
            allow_auto_create_topics: self.allow_auto_create_topics.unwrap_or(true),
        };

        tracing::info!(
            brokers = %settings.brokers,
            client_id = %settings.client_id,
            consumer_group = %settings.consumer_group,
            acks = %settings.producer_acks,
            compression = %settings.compression,
            retries = settings.retries,
            start_position = %settings.start_position,
            "RedpandaClient configured"
        );

        Ok(RedpandaClient {
            settings: Arc::new(settings),
        })
    }
}

/// Run a blocking librdkafka call on the blocking pool.
async fn blocking<T, F>(call: F) -> Result<KafkaResult<T>, BrokerError>
where
    F: FnOnce() -> KafkaResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| BrokerError::Transport(format!("blocking task failed: {e}")))
}

/// Fetch cluster metadata to prove the session works.
async fn verify_session<F>(fetch: F, timeout: Duration) -> Result<(), BrokerError>
where
    F: FnOnce(Timeout) -> KafkaResult<Metadata> + Send + 'static,
{
    let fetched = blocking(move || {
        fetch(Timeout::After(timeout))
            .map(|metadata| (metadata.brokers().len(), metadata.topics().len()))
    })
    .await?;

    match fetched {
        Ok((brokers, topics)) => {
            tracing::debug!(brokers, topics, "Broker metadata fetched");
            Ok(())
        }
        Err(e) => Err(BrokerError::ConnectionFailed(format!(
            "Failed to reach brokers: {e}"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_brokers() {
        assert!(matches!(
            RedpandaClient::builder().build(),
            Err(BrokerError::ConnectionFailed(_))
        ));
        assert!(RedpandaClient::new("  ").is_err());
    }

    #[test]
    fn defaults_match_service_conventions() {
        let client = RedpandaClient::new("localhost:9092").unwrap();
        let settings = client.settings();

        assert_eq!(settings.client_id, "appointment-service");
        assert_eq!(settings.consumer_group, "appointment-consumer-group");
        assert_eq!(settings.retries, 8);
        assert_eq!(settings.retry_backoff, Duration::from_millis(100));
        assert_eq!(settings.session_timeout, Duration::from_secs(30));
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(3));
        assert_eq!(settings.start_position, StartPosition::Earliest);
    }

    #[test]
    fn consumer_config_carries_group_and_start_position() {
        let client = RedpandaClient::builder()
            .brokers("b1:9092,b2:9092")
            .consumer_group("audit")
            .start_position(StartPosition::Latest)
            .build()
            .unwrap();
        let config = client.settings().consumer_config();

        assert_eq!(config.get("bootstrap.servers"), Some("b1:9092,b2:9092"));
        assert_eq!(config.get("group.id"), Some("audit"));
        assert_eq!(config.get("auto.offset.reset"), Some("latest"));
        assert_eq!(config.get("session.timeout.ms"), Some("30000"));
        assert_eq!(config.get("heartbeat.interval.ms"), Some("3000"));
        assert_eq!(config.get("enable.partition.eof"), Some("false"));
    }

    #[test]
    fn producer_config_carries_retry_policy() {
        let client = RedpandaClient::builder()
            .brokers("localhost:9092")
            .retries(3)
            .retry_backoff(Duration::from_millis(250))
            .compression("lz4")
            .build()
            .unwrap();
        let config = client.settings().producer_config();

        assert_eq!(config.get("message.send.max.retries"), Some("3"));
        assert_eq!(config.get("retry.backoff.ms"), Some("250"));
        assert_eq!(config.get("compression.type"), Some("lz4"));
        assert_eq!(config.get("acks"), Some("all"));
        assert_eq!(config.get("client.id"), Some("appointment-service"));
        assert!(config.get("group.id").is_none());
    }

    #[test]
    fn transports_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<RedpandaClient>();
        assert_send_sync::<RedpandaProducer>();
        assert_send_sync::<RedpandaConsumer>();
    }
}
