//! # Appointment Events Runtime
//!
//! Producer and consumer for the appointment lifecycle pipeline.
//!
//! ## Core Components
//!
//! - **[`AppointmentProducer`]**: validates appointments, builds envelopes and
//!   publishes them to the topic of their event category
//! - **[`AppointmentConsumer`]**: subscribes to the category topics, runs the
//!   receive loop and hands each message to the [`Dispatcher`]
//! - **[`HandlerSet`]**: one optional typed handler per event category, with
//!   [`DefaultHandler`] filling the gaps
//! - **[`Shutdown`]**: once-only shutdown trigger shared with signal handling
//!
//! Both sides talk to the broker through the capability traits in
//! `appointment_events_core::broker`, injected as `Arc<dyn …>`.
//!
//! ## Example
//!
//! ```ignore
//! use appointment_events_runtime::{AppointmentConsumer, HandlerSet, Shutdown};
//!
//! let consumer = AppointmentConsumer::new(transport, topics);
//! consumer.connect().await?;
//! consumer.subscribe::<&str>(&[]).await?; // the three category topics
//!
//! let shutdown = Shutdown::new();
//! let summary = consumer.run(HandlerSet::new(), &shutdown).await?;
//! consumer.disconnect().await?;
//! ```

/// Consumer lifecycle and receive loop
pub mod consumer;

/// Per-message decode and routing
pub mod dispatch;

/// Event handler traits and the default handler
pub mod handlers;

/// Prometheus metrics for observability
pub mod metrics;

/// Producer: validation and publishing
pub mod producer;

/// Once-only shutdown coordination
pub mod shutdown;

/// Error types for the pipeline runtime
pub mod error {
    use crate::consumer::ConsumerState;
    use appointment_events_core::broker::BrokerError;
    use appointment_events_core::topic::EventCategory;
    use thiserror::Error;

    /// Errors surfaced to callers of the producer and consumer.
    ///
    /// Per-message failures inside the receive loop never become a
    /// `PipelineError`; they are reported as [`DispatchError`] and logged.
    #[derive(Error, Debug)]
    pub enum PipelineError {
        /// The transport could not open or close a session
        #[error("Connection error: {0}")]
        Connection(#[source] BrokerError),

        /// The operation needs an open session
        #[error("Not connected")]
        NotConnected,

        /// The operation is not allowed in the current consumer state
        #[error("Cannot {operation} while {state}")]
        InvalidState {
            /// What was attempted
            operation: &'static str,
            /// State at the time
            state: ConsumerState,
        },

        /// The appointment failed its required-field checks; nothing was published
        #[error("Validation failed: {}", .errors.join(", "))]
        Validation {
            /// Validation messages in field order
            errors: Vec<String>,
        },

        /// At least one batch item failed validation; nothing was published
        #[error("Batch validation failed: {}", render_batch_failures(.failures))]
        BatchValidation {
            /// `(item index, messages)` for every failing item
            failures: Vec<(usize, Vec<String>)>,
        },

        /// An update or cancellation request was malformed
        #[error("Invalid request: {0}")]
        InvalidRequest(String),

        /// A payload could not be serialized
        #[error("Failed to encode payload: {0}")]
        Encode(#[from] serde_json::Error),

        /// The transport rejected or failed to deliver a publish
        #[error("Failed to publish to '{topic}': {source}")]
        Publish {
            /// Target topic
            topic: String,
            /// Transport error
            #[source]
            source: BrokerError,
        },

        /// Joining a topic failed
        ///
        /// `subscribed` lists what the consumer is subscribed to after the
        /// failure, so partial subscription is visible to the caller.
        #[error("Failed to subscribe to '{topic}' (subscribed: [{}]): {source}", .subscribed.join(", "))]
        Subscription {
            /// Topic that failed
            topic: String,
            /// Topics joined before the failure
            subscribed: Vec<String>,
            /// Transport error
            #[source]
            source: BrokerError,
        },

        /// Partition metadata for a topic was unavailable
        #[error("Failed to list partitions of '{topic}': {source}")]
        Metadata {
            /// Topic queried
            topic: String,
            /// Transport error
            #[source]
            source: BrokerError,
        },

        /// A read position reset was rejected
        #[error("Failed to seek {topic}[{partition}]: {source}")]
        Seek {
            /// Topic being reset
            topic: String,
            /// Partition being reset
            partition: i32,
            /// Transport error
            #[source]
            source: BrokerError,
        },
    }

    fn render_batch_failures(failures: &[(usize, Vec<String>)]) -> String {
        failures
            .iter()
            .map(|(index, errors)| format!("item {index}: {}", errors.join(", ")))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// A payload was not valid JSON for its category.
    #[derive(Error, Debug)]
    #[error("Invalid {category} payload: {source}")]
    pub struct DecodeError {
        /// Category the payload was decoded as
        pub category: EventCategory,
        /// Parser error
        #[source]
        pub source: serde_json::Error,
    }

    /// Why a single message could not be processed.
    #[derive(Error, Debug)]
    pub enum DispatchError {
        /// Payload decoding failed
        #[error(transparent)]
        Decode(#[from] DecodeError),

        /// The handler returned an error
        #[error("{category} handler failed: {source}")]
        Handler {
            /// Category of the message
            category: EventCategory,
            /// Error returned by the handler
            #[source]
            source: crate::handlers::HandlerError,
        },

        /// The handler panicked
        #[error("{category} handler panicked")]
        Panicked {
            /// Category of the message
            category: EventCategory,
        },
    }

    impl DispatchError {
        /// Metric label for the stage that failed.
        #[must_use]
        pub const fn stage(&self) -> &'static str {
            match self {
                Self::Decode(_) => "decode",
                Self::Handler { .. } | Self::Panicked { .. } => "handler",
            }
        }
    }
}

pub use consumer::{AppointmentConsumer, ConsumerState, RunSummary};
pub use dispatch::{AppointmentEvent, DispatchOutcome, Dispatcher};
pub use error::{DecodeError, DispatchError, PipelineError};
pub use handlers::{
    DefaultHandler, EventHandler, FnHandler, HandlerError, HandlerResult, HandlerSet, handler_fn,
};
pub use producer::{
    AppointmentProducer, PublishedAppointment, PublishedCancellation, PublishedUpdate,
};
pub use shutdown::{Shutdown, wait_for_signal};
