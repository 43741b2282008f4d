//! Appointment consumer: subscription lifecycle and receive loop.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect()──► Connected ──subscribe()──► Subscribed ──run()──► Running
//!      ▲                                                     ▲                    │
//!      │                                                     └── shutdown / end ──┘
//!      └──────────────────────── disconnect() (from any state) ───────────────────
//! ```
//!
//! # Receive Loop
//!
//! [`AppointmentConsumer::run`] processes messages one at a time, in the
//! order the transport yields them. Each message is logged, then handed to
//! the [`Dispatcher`]. Failures are contained per message:
//!
//! - receive errors from the transport are logged and the loop continues
//! - decode errors, handler errors and handler panics are logged with topic,
//!   partition and offset, and the message is skipped
//! - messages on topics without a category are logged and dropped
//!
//! Nothing is redelivered and nothing is parked for later; a failed message
//! is gone once logged. Routing failures to a dead-letter topic would hook
//! in where the loop logs a [`DispatchError`](crate::error::DispatchError).
//!
//! # Shutdown
//!
//! `run` watches a [`Shutdown`] handle between messages. Once it triggers,
//! the message being handled finishes, no further message is taken, and
//! `run` returns its [`RunSummary`]. The caller then disconnects.

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::PipelineError;
use crate::handlers::HandlerSet;
use crate::metrics::ConsumerMetrics;
use crate::shutdown::Shutdown;
use appointment_events_core::broker::ConsumeTransport;
use appointment_events_core::envelope::ReceivedEnvelope;
use appointment_events_core::topic::TopicRegistry;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Lifecycle state of an [`AppointmentConsumer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerState {
    /// No session
    Disconnected,
    /// Session open, no topics joined
    Connected,
    /// At least one topic joined
    Subscribed,
    /// Inside [`AppointmentConsumer::run`]
    Running,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Subscribed => "subscribed",
            Self::Running => "running",
        })
    }
}

/// Counters for one call to [`AppointmentConsumer::run`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Messages taken from the transport (receive errors excluded)
    pub received: u64,
    /// Messages a handler processed successfully
    pub dispatched: u64,
    /// Messages on topics without a category
    pub dropped: u64,
    /// Receive, decode and handler failures
    pub failed: u64,
}

/// Consumes appointment lifecycle events.
pub struct AppointmentConsumer {
    transport: Arc<dyn ConsumeTransport>,
    topics: Arc<TopicRegistry>,
    state: RwLock<ConsumerState>,
}

impl AppointmentConsumer {
    /// Create a disconnected consumer.
    #[must_use]
    pub fn new(transport: Arc<dyn ConsumeTransport>, topics: Arc<TopicRegistry>) -> Self {
        Self {
            transport,
            topics,
            state: RwLock::new(ConsumerState::Disconnected),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ConsumerState {
        *self.state.read().await
    }

    /// Topics currently subscribed.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.transport.subscriptions()
    }

    /// Open the transport session.
    ///
    /// Connecting an already connected consumer is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Connection`] if the session could not be
    /// established. The consumer stays disconnected.
    pub async fn connect(&self) -> Result<(), PipelineError> {
        let mut state = self.state.write().await;
        if *state != ConsumerState::Disconnected {
            return Ok(());
        }

        match self.transport.connect().await {
            Ok(()) => {
                *state = ConsumerState::Connected;
                info!("Consumer connected");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to connect consumer");
                Err(PipelineError::Connection(e))
            }
        }
    }

    /// Close the transport session. Safe to call at any time, repeatedly.
    ///
    /// A running receive loop stops once the transport stream ends.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Connection`] if the transport failed to
    /// release its resources cleanly. The consumer is disconnected either way.
    pub async fn disconnect(&self) -> Result<(), PipelineError> {
        *self.state.write().await = ConsumerState::Disconnected;
        match self.transport.disconnect().await {
            Ok(()) => {
                info!("Consumer disconnected");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Error disconnecting consumer");
                Err(PipelineError::Connection(e))
            }
        }
    }

    /// Join `topics`, or the three category topics when `topics` is empty.
    ///
    /// Topics are joined in order. Topics joined by earlier calls stay
    /// subscribed.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::NotConnected`] before [`connect`](Self::connect)
    /// - [`PipelineError::InvalidState`] while running
    /// - [`PipelineError::Subscription`] on the first topic that fails; the
    ///   error lists the topics subscribed at that point
    pub async fn subscribe<S: AsRef<str>>(&self, topics: &[S]) -> Result<(), PipelineError> {
        let mut state = self.state.write().await;
        match *state {
            ConsumerState::Disconnected => return Err(PipelineError::NotConnected),
            ConsumerState::Running => {
                return Err(PipelineError::InvalidState {
                    operation: "subscribe",
                    state: ConsumerState::Running,
                });
            }
            ConsumerState::Connected | ConsumerState::Subscribed => {}
        }

        let requested: Vec<String> = if topics.is_empty() {
            self.topics.category_topics()
        } else {
            topics.iter().map(|topic| topic.as_ref().to_string()).collect()
        };

        for topic in requested {
            if let Err(source) = self.transport.subscribe(&topic).await {
                let subscribed = self.transport.subscriptions();
                if !subscribed.is_empty() {
                    *state = ConsumerState::Subscribed;
                }
                error!(topic = %topic, error = %source, "Failed to subscribe");
                return Err(PipelineError::Subscription {
                    topic,
                    subscribed,
                    source,
                });
            }
            *state = ConsumerState::Subscribed;
            info!(topic = %topic, "Subscribed to topic");
        }

        Ok(())
    }

    /// Run the receive loop until `shutdown` triggers or the transport
    /// stream ends.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::NotConnected`] before [`connect`](Self::connect)
    /// - [`PipelineError::InvalidState`] if nothing is subscribed or the loop
    ///   is already running
    /// - [`PipelineError::Connection`] if the transport cannot open its stream
    ///
    /// Per-message failures are never returned; they are logged and counted
    /// in [`RunSummary::failed`].
    pub async fn run(
        &self,
        handlers: HandlerSet,
        shutdown: &Shutdown,
    ) -> Result<RunSummary, PipelineError> {
        let mut stream = {
            let mut state = self.state.write().await;
            match *state {
                ConsumerState::Subscribed => {}
                ConsumerState::Disconnected => return Err(PipelineError::NotConnected),
                other => {
                    return Err(PipelineError::InvalidState {
                        operation: "run",
                        state: other,
                    });
                }
            }
            let stream = self.transport.messages().map_err(PipelineError::Connection)?;
            *state = ConsumerState::Running;
            stream
        };

        let dispatcher = Dispatcher::new(Arc::clone(&self.topics), handlers);
        let mut summary = RunSummary::default();
        let stopped = shutdown.listener();
        tokio::pin!(stopped);

        info!(topics = ?self.transport.subscriptions(), "Consumer running");

        loop {
            let next = tokio::select! {
                biased;
                () = &mut stopped => {
                    info!("Shutdown requested, leaving receive loop");
                    break;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(message)) => {
                    summary.received += 1;
                    Self::process(&dispatcher, &message, &mut summary).await;
                }
                Some(Err(e)) => {
                    summary.failed += 1;
                    ConsumerMetrics::record_failure("receive");
                    warn!(error = %e, "Error receiving message");
                }
                None => {
                    info!("Message stream ended");
                    break;
                }
            }
        }

        {
            let mut state = self.state.write().await;
            if *state == ConsumerState::Running {
                *state = ConsumerState::Subscribed;
            }
        }

        info!(
            received = summary.received,
            dispatched = summary.dispatched,
            dropped = summary.dropped,
            failed = summary.failed,
            "Consumer stopped"
        );
        Ok(summary)
    }

    async fn process(dispatcher: &Dispatcher, message: &ReceivedEnvelope, summary: &mut RunSummary) {
        ConsumerMetrics::record_received(&message.topic);
        info!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            event_type = %message.envelope.event_type(),
            key = %message.envelope.key,
            "Received message"
        );

        let started = Instant::now();
        let outcome = dispatcher.dispatch(message).await;
        ConsumerMetrics::record_dispatch(started.elapsed());

        match outcome {
            Ok(DispatchOutcome::Handled(_)) => summary.dispatched += 1,
            Ok(DispatchOutcome::Dropped) => {
                summary.dropped += 1;
                ConsumerMetrics::record_dropped(&message.topic);
                warn!(
                    topic = %message.topic,
                    offset = message.offset,
                    "Unknown topic, message dropped"
                );
            }
            Err(e) => {
                summary.failed += 1;
                ConsumerMetrics::record_failure(e.stage());
                error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Error processing message"
                );
            }
        }
    }

    /// Reset partition 0 of every subscribed topic to offset 0.
    ///
    /// Other partitions keep their positions. Use
    /// [`rewind_all_partitions`](Self::rewind_all_partitions) to reset every
    /// partition.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::NotConnected`] before [`connect`](Self::connect)
    /// - [`PipelineError::Seek`] on the first reset the transport rejects
    pub async fn seek_to_beginning(&self) -> Result<(), PipelineError> {
        self.ensure_connected().await?;

        for topic in self.transport.subscriptions() {
            self.seek(&topic, 0).await?;
        }
        Ok(())
    }

    /// Reset every partition of every subscribed topic to offset 0.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::NotConnected`] before [`connect`](Self::connect)
    /// - [`PipelineError::Metadata`] if a topic's partitions cannot be listed
    /// - [`PipelineError::Seek`] on the first reset the transport rejects
    pub async fn rewind_all_partitions(&self) -> Result<(), PipelineError> {
        self.ensure_connected().await?;

        for topic in self.transport.subscriptions() {
            let partitions = self
                .transport
                .partitions(&topic)
                .await
                .map_err(|source| PipelineError::Metadata {
                    topic: topic.clone(),
                    source,
                })?;

            for partition in partitions {
                self.seek(&topic, partition).await?;
            }
        }
        Ok(())
    }

    async fn seek(&self, topic: &str, partition: i32) -> Result<(), PipelineError> {
        match self.transport.seek(topic, partition, 0).await {
            Ok(()) => {
                info!(topic = %topic, partition, "Reset position to beginning");
                Ok(())
            }
            Err(source) => {
                error!(topic = %topic, partition, error = %source, "Failed to seek");
                Err(PipelineError::Seek {
                    topic: topic.to_string(),
                    partition,
                    source,
                })
            }
        }
    }

    async fn ensure_connected(&self) -> Result<(), PipelineError> {
        if self.state().await == ConsumerState::Disconnected {
            Err(PipelineError::NotConnected)
        } else {
            Ok(())
        }
    }
}
