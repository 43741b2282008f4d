use crate::{RedpandaSettings, blocking, verify_session};
use appointment_events_core::broker::{BrokerError, BrokerFuture, PublishTransport};
use appointment_events_core::envelope::{Envelope, Placement};
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders, OwnedMessage};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::{Arc, PoisonError, RwLock};

/// Publishing transport backed by an rdkafka [`FutureProducer`].
///
/// The producer is created on `connect()` and dropped on `disconnect()`.
///
/// `publish` sends the batch one record at a time, each waiting for its
/// acknowledgement. A full local queue is waited out for up to the configured
/// timeout. Kafka has no multi-message atomicity here: when a record fails,
/// the records before it in the batch stay published.
pub struct RedpandaProducer {
    settings: Arc<RedpandaSettings>,
    producer: RwLock<Option<FutureProducer>>,
}

impl RedpandaProducer {
    pub(crate) const fn new(settings: Arc<RedpandaSettings>) -> Self {
        Self {
            settings,
            producer: RwLock::new(None),
        }
    }

    fn current(&self) -> Option<FutureProducer> {
        self.producer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn headers(envelope: &Envelope) -> OwnedHeaders {
    envelope
        .headers
        .iter()
        .fold(
            OwnedHeaders::new_with_capacity(envelope.headers.len()),
            |headers, (key, value)| {
                headers.insert(Header {
                    key,
                    value: Some(value),
                })
            },
        )
}

fn placement(
    topic: &str,
    delivery: Result<(i32, i64), (KafkaError, OwnedMessage)>,
) -> Result<Placement, BrokerError> {
    match delivery {
        Ok((partition, offset)) => {
            tracing::debug!(
                topic = %topic,
                partition = partition,
                offset = offset,
                "Message delivered"
            );
            Ok(Placement { partition, offset })
        }
        Err((kafka_error, _)) => {
            tracing::error!(
                topic = %topic,
                error = %kafka_error,
                "Failed to deliver message"
            );
            Err(BrokerError::PublishFailed {
                topic: topic.to_string(),
                reason: kafka_error.to_string(),
            })
        }
    }
}

impl PublishTransport for RedpandaProducer {
    fn connect(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            if self.current().is_some() {
                return Ok(());
            }

            let producer: FutureProducer = self.settings.producer_config().create().map_err(|e| {
                BrokerError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

            let session = producer.clone();
            verify_session(
                move |timeout| session.client().fetch_metadata(None, timeout),
                self.settings.timeout,
            )
            .await?;

            *self
                .producer
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(producer);

            tracing::info!(brokers = %self.settings.brokers, "Kafka producer connected");
            Ok(())
        })
    }

    fn disconnect(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            let producer = self
                .producer
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take();

            let Some(producer) = producer else {
                return Ok(());
            };

            let timeout = self.settings.timeout;
            match blocking(move || producer.flush(Timeout::After(timeout))).await? {
                Ok(()) => {
                    tracing::info!("Kafka producer disconnected");
                    Ok(())
                }
                Err(e) => Err(BrokerError::ConnectionFailed(format!(
                    "Failed to flush pending messages: {e}"
                ))),
            }
        })
    }

    fn publish(&self, topic: &str, envelopes: Vec<Envelope>) -> BrokerFuture<'_, Vec<Placement>> {
        let topic = topic.to_string();

        Box::pin(async move {
            let producer = self.current().ok_or(BrokerError::NotConnected)?;

            let mut placements = Vec::with_capacity(envelopes.len());
            for envelope in &envelopes {
                let record = FutureRecord::to(&topic)
                    .key(&envelope.key)
                    .payload(&envelope.payload)
                    .headers(headers(envelope));

                let delivery = producer
                    .send(record, Timeout::After(self.settings.timeout))
                    .await;
                placements.push(placement(&topic, delivery)?);
            }

            Ok(placements)
        })
    }
}
