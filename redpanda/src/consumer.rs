use crate::{RedpandaSettings, blocking, verify_session};
use appointment_events_core::broker::{
    BrokerError, BrokerFuture, ConsumeTransport, EnvelopeStream,
};
use appointment_events_core::envelope::{Envelope, Headers, ReceivedEnvelope};
use rdkafka::Offset;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Headers as _, Message};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

struct Session {
    consumer: Arc<StreamConsumer>,
    closed: watch::Sender<bool>,
    topics: Vec<String>,
}

/// Consuming transport backed by an rdkafka [`StreamConsumer`].
///
/// Joins the configured consumer group on `connect()`. Offsets are committed
/// automatically; a consumer without a committed offset starts at the
/// configured start position.
pub struct RedpandaConsumer {
    settings: Arc<RedpandaSettings>,
    session: RwLock<Option<Session>>,
}

impl RedpandaConsumer {
    pub(crate) const fn new(settings: Arc<RedpandaSettings>) -> Self {
        Self {
            settings,
            session: RwLock::new(None),
        }
    }

    fn current(&self) -> Option<Arc<StreamConsumer>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| Arc::clone(&session.consumer))
    }

    fn add_subscription(&self, topic: &str) -> Result<(), BrokerError> {
        let mut guard = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let session = guard.as_mut().ok_or(BrokerError::NotConnected)?;

        if session.topics.iter().any(|existing| existing == topic) {
            return Ok(());
        }

        // rdkafka replaces the whole subscription on every call
        let mut topics: Vec<&str> = session.topics.iter().map(String::as_str).collect();
        topics.push(topic);

        session
            .consumer
            .subscribe(&topics)
            .map_err(|e| BrokerError::SubscriptionFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(topic = %topic, "Subscribed to topic");
        session.topics.push(topic.to_string());
        Ok(())
    }
}

fn received(message: &BorrowedMessage<'_>) -> ReceivedEnvelope {
    let key = message
        .key()
        .map(|key| String::from_utf8_lossy(key).into_owned())
        .unwrap_or_default();
    let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| {
                    let value = header
                        .value
                        .map(|value| String::from_utf8_lossy(value).into_owned())
                        .unwrap_or_default();
                    (header.key.to_string(), value)
                })
                .collect::<Headers>()
        })
        .unwrap_or_default();

    ReceivedEnvelope {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        envelope: Envelope::raw(key, payload, headers),
    }
}

impl ConsumeTransport for RedpandaConsumer {
    fn connect(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            if self.current().is_some() {
                return Ok(());
            }

            let consumer: StreamConsumer =
                self.settings.consumer_config().create().map_err(|e| {
                    BrokerError::ConnectionFailed(format!("Failed to create consumer: {e}"))
                })?;
            let consumer = Arc::new(consumer);

            let session = Arc::clone(&consumer);
            verify_session(
                move |timeout| session.fetch_metadata(None, timeout),
                self.settings.timeout,
            )
            .await?;

            let (closed, _) = watch::channel(false);
            *self
                .session
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(Session {
                consumer,
                closed,
                topics: Vec::new(),
            });

            tracing::info!(
                brokers = %self.settings.brokers,
                group = %self.settings.consumer_group,
                "Kafka consumer connected"
            );
            Ok(())
        })
    }

    fn disconnect(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            let session = self
                .session
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take();

            if let Some(session) = session {
                // Ends every open message stream
                session.closed.send_replace(true);
                session.consumer.unsubscribe();
                tracing::info!("Kafka consumer disconnected");
            }
            Ok(())
        })
    }

    fn subscribe(&self, topic: &str) -> BrokerFuture<'_, ()> {
        let result = self.add_subscription(topic);
        Box::pin(async move { result })
    }

    fn subscriptions(&self) -> Vec<String> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| session.topics.clone())
            .unwrap_or_default()
    }

    fn messages(&self) -> Result<EnvelopeStream, BrokerError> {
        let (consumer, mut closed) = {
            let guard = self.session.read().unwrap_or_else(PoisonError::into_inner);
            let session = guard.as_ref().ok_or(BrokerError::NotConnected)?;
            (Arc::clone(&session.consumer), session.closed.subscribe())
        };

        Ok(Box::pin(async_stream::stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = closed.changed() => None,
                    received_message = consumer.recv() => Some(
                        received_message
                            .as_ref()
                            .map(received)
                            .map_err(|e: &KafkaError| BrokerError::Transport(e.to_string())),
                    ),
                };

                match next {
                    Some(item) => yield item,
                    None => break,
                }
            }
        }))
    }

    fn seek(&self, topic: &str, partition: i32, offset: i64) -> BrokerFuture<'_, ()> {
        let topic = topic.to_string();

        Box::pin(async move {
            let consumer = self.current().ok_or(BrokerError::NotConnected)?;
            let timeout = self.settings.timeout;

            let target = topic.clone();
            let result = blocking(move || {
                consumer.seek(&target, partition, Offset::Offset(offset), timeout)
            })
            .await?;

            result.map_err(|e| BrokerError::SeekFailed {
                topic,
                partition,
                reason: e.to_string(),
            })
        })
    }

    fn partitions(&self, topic: &str) -> BrokerFuture<'_, Vec<i32>> {
        let topic = topic.to_string();

        Box::pin(async move {
            let consumer = self.current().ok_or(BrokerError::NotConnected)?;
            let timeout = self.settings.timeout;

            let target = topic.clone();
            let fetched = blocking(move || {
                consumer
                    .fetch_metadata(Some(&target), timeout)
                    .map(|metadata| {
                        metadata
                            .topics()
                            .iter()
                            .find(|entry| entry.name() == target && entry.error().is_none())
                            .map(|entry| {
                                entry
                                    .partitions()
                                    .iter()
                                    .map(|partition| partition.id())
                                    .collect::<Vec<_>>()
                            })
                    })
            })
            .await?;

            match fetched {
                Ok(Some(partitions)) if !partitions.is_empty() => Ok(partitions),
                Ok(_) => Err(BrokerError::MetadataFailed {
                    topic,
                    reason: "topic has no partitions".to_string(),
                }),
                Err(e) => Err(BrokerError::MetadataFailed {
                    topic,
                    reason: e.to_string(),
                }),
            }
        })
    }
}
