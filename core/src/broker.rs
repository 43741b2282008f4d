//! Broker capability traits.
//!
//! The producer and consumer never talk to a concrete client. They depend on
//! two small capability sets, injected as `Arc<dyn …>`:
//!
//! - [`PublishTransport`]: connect, disconnect, publish a batch of envelopes
//! - [`ConsumeTransport`]: connect, disconnect, subscribe, stream messages,
//!   seek, list partitions
//!
//! # Connection Contract
//!
//! ```text
//! Disconnected ──connect()──► Connected ──disconnect()──► Disconnected
//! ```
//!
//! - `connect()` either establishes a session or fails with
//!   [`BrokerError::ConnectionFailed`]; there is no partially connected state.
//! - `disconnect()` is idempotent and releases every transport resource.
//!
//! # Retries
//!
//! Transports own retry and backoff for transient connectivity failures. An
//! error returned from [`PublishTransport::publish`] is final: callers decide
//! whether to try again.
//!
//! # Implementations
//!
//! - `InMemoryBroker` in `appointment-events-testing` - for tests (records calls, injects failures)
//! - `RedpandaClient` in `appointment-events-redpanda` - for production (Kafka-compatible)
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
//! traits can be used as trait objects.

use crate::envelope::{Envelope, Placement, ReceivedEnvelope};
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors reported by a transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Failed to establish or tear down a session
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation requires an open session
    #[error("Transport is not connected")]
    NotConnected,

    /// Broker rejected or failed to deliver a publish
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to join a topic
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed to subscribe
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Position reset was rejected
    #[error("Seek failed for {topic}[{partition}]: {reason}")]
    SeekFailed {
        /// The topic being reset
        topic: String,
        /// The partition being reset
        partition: i32,
        /// The reason for failure
        reason: String,
    },

    /// Topic metadata could not be fetched
    #[error("Metadata unavailable for topic '{topic}': {reason}")]
    MetadataFailed {
        /// The topic queried
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error while receiving
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Where a consumer starts reading a topic it has no committed position for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StartPosition {
    /// Oldest retained message
    #[default]
    Earliest,
    /// Only messages published after subscribing
    Latest,
}

impl StartPosition {
    /// Kafka `auto.offset.reset` value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

impl fmt::Display for StartPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boxed future returned by transport methods.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrokerError>> + Send + 'a>>;

/// Stream of received messages.
///
/// Receive failures are yielded as `Err` items; the stream keeps going.
pub type EnvelopeStream =
    Pin<Box<dyn Stream<Item = Result<ReceivedEnvelope, BrokerError>> + Send>>;

/// Publishing side of the broker.
///
/// Implementations must be `Send + Sync`: independent publishes may be issued
/// concurrently by callers.
pub trait PublishTransport: Send + Sync {
    /// Open a session.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if no session could be established.
    fn connect(&self) -> BrokerFuture<'_, ()>;

    /// Close the session. Safe to call when already disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if resources could not be
    /// released cleanly. The transport is disconnected either way.
    fn disconnect(&self) -> BrokerFuture<'_, ()>;

    /// Publish `envelopes` to `topic` as one request, preserving order.
    ///
    /// Returns one [`Placement`] per envelope, in input order.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::NotConnected`] outside a session
    /// - [`BrokerError::PublishFailed`] once the transport has exhausted its retries
    fn publish(&self, topic: &str, envelopes: Vec<Envelope>) -> BrokerFuture<'_, Vec<Placement>>;
}

/// Consuming side of the broker.
pub trait ConsumeTransport: Send + Sync {
    /// Open a session.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if no session could be established.
    fn connect(&self) -> BrokerFuture<'_, ()>;

    /// Close the session. Safe to call when already disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if resources could not be
    /// released cleanly. The transport is disconnected either way.
    fn disconnect(&self) -> BrokerFuture<'_, ()>;

    /// Add `topic` to the subscription.
    ///
    /// Topics joined by earlier calls stay subscribed.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::NotConnected`] outside a session
    /// - [`BrokerError::SubscriptionFailed`] if the topic could not be joined
    fn subscribe(&self, topic: &str) -> BrokerFuture<'_, ()>;

    /// Topics currently subscribed, in subscription order.
    fn subscriptions(&self) -> Vec<String>;

    /// Stream of messages from every subscribed topic.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotConnected`] outside a session.
    fn messages(&self) -> Result<EnvelopeStream, BrokerError>;

    /// Move the read position of `topic`/`partition` to `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SeekFailed`] if the broker rejects the reset.
    fn seek(&self, topic: &str, partition: i32, offset: i64) -> BrokerFuture<'_, ()>;

    /// Partition ids of `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::MetadataFailed`] if metadata is unavailable.
    fn partitions(&self, topic: &str) -> BrokerFuture<'_, Vec<i32>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_position_maps_to_offset_reset() {
        assert_eq!(StartPosition::default(), StartPosition::Earliest);
        assert_eq!(StartPosition::Earliest.as_str(), "earliest");
        assert_eq!(StartPosition::Latest.to_string(), "latest");
    }

    #[test]
    fn errors_render_context() {
        let err = BrokerError::SeekFailed {
            topic: "appointments-created".to_string(),
            partition: 0,
            reason: "not assigned".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Seek failed for appointments-created[0]: not assigned"
        );
    }

    #[test]
    fn traits_are_dyn_compatible() {
        fn assert_publish(_: Option<&dyn PublishTransport>) {}
        fn assert_consume(_: Option<&dyn ConsumeTransport>) {}
        assert_publish(None);
        assert_consume(None);
    }
}
