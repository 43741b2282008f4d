//! Appointment producer.
//!
//! Turns lifecycle operations into envelopes and publishes them:
//!
//! | Operation                | Payload               | Topic     |
//! |--------------------------|-----------------------|-----------|
//! | `create_appointment`     | [`Appointment`]       | created   |
//! | `update_appointment`     | [`AppointmentUpdate`] | updated   |
//! | `cancel_appointment`     | [`Cancellation`]      | cancelled |
//! | `send_batch`             | [`Appointment`] × n   | created   |
//!
//! Creation validates first: an invalid appointment never reaches the
//! transport. Updates and cancellations are partial and are not validated
//! beyond requiring an id.
//!
//! # Batches
//!
//! A batch is all-or-nothing at the validation step. Every item is
//! validated; if any fails, the whole batch is rejected with
//! [`PipelineError::BatchValidation`] and nothing is published. Otherwise
//! the batch goes out as a single publish request, in input order. Delivery
//! is not atomic: if the transport fails partway, the items before the
//! failure may already be on the topic.
//!
//! # Retries
//!
//! The producer does not retry. Transient failures are retried by the
//! transport; whatever it gives up on comes back as [`PipelineError::Publish`].

use crate::error::PipelineError;
use crate::metrics::ProducerMetrics;
use appointment_events_core::appointment::{
    Appointment, AppointmentChanges, AppointmentUpdate, Cancellation, NewAppointment,
};
use appointment_events_core::broker::{BrokerError, PublishTransport};
use appointment_events_core::envelope::{Envelope, Placement};
use appointment_events_core::environment::{Clock, iso8601};
use appointment_events_core::topic::{EventCategory, TopicRegistry};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{error, info, warn};

/// A created appointment and where it landed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedAppointment {
    /// The validated appointment as published
    pub appointment: Appointment,
    /// Broker-assigned position
    pub placement: Placement,
}

/// A published partial update and where it landed.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishedUpdate {
    /// The merged update payload
    pub update: AppointmentUpdate,
    /// Broker-assigned position
    pub placement: Placement,
}

/// A published cancellation and where it landed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedCancellation {
    /// The cancellation payload
    pub cancellation: Cancellation,
    /// Broker-assigned position
    pub placement: Placement,
}

/// Publishes appointment lifecycle events.
///
/// Independent publishes may run concurrently; the producer holds no state
/// besides its connection flag.
pub struct AppointmentProducer {
    transport: Arc<dyn PublishTransport>,
    topics: Arc<TopicRegistry>,
    clock: Arc<dyn Clock>,
    connected: AtomicBool,
}

impl AppointmentProducer {
    /// Create a disconnected producer.
    #[must_use]
    pub fn new(
        transport: Arc<dyn PublishTransport>,
        topics: Arc<TopicRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            topics,
            clock,
            connected: AtomicBool::new(false),
        }
    }

    /// Whether [`connect`](Self::connect) has succeeded and no disconnect followed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Open the transport session.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Connection`] if the session could not be
    /// established. The producer stays disconnected.
    pub async fn connect(&self) -> Result<(), PipelineError> {
        match self.transport.connect().await {
            Ok(()) => {
                self.connected.store(true, Ordering::Release);
                info!("Producer connected");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to connect producer");
                Err(PipelineError::Connection(e))
            }
        }
    }

    /// Close the transport session. Safe to call at any time, repeatedly.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Connection`] if the transport failed to
    /// release its resources cleanly. The producer is disconnected either way.
    pub async fn disconnect(&self) -> Result<(), PipelineError> {
        self.connected.store(false, Ordering::Release);
        match self.transport.disconnect().await {
            Ok(()) => {
                info!("Producer disconnected");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Error disconnecting producer");
                Err(PipelineError::Connection(e))
            }
        }
    }

    /// Validate and publish a new appointment.
    ///
    /// Missing `id`, `status` and timestamps are filled in.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Validation`] if a required field is empty; nothing is published
    /// - [`PipelineError::NotConnected`] before [`connect`](Self::connect)
    /// - [`PipelineError::Publish`] if the transport failed
    pub async fn create_appointment(
        &self,
        data: NewAppointment,
    ) -> Result<PublishedAppointment, PipelineError> {
        let appointment = Appointment::construct(data, self.clock.as_ref());

        let report = appointment.validate();
        if !report.is_valid() {
            warn!(
                appointment_id = %appointment.id(),
                errors = %report.joined(),
                "Rejected invalid appointment"
            );
            return Err(PipelineError::Validation {
                errors: report.errors,
            });
        }

        self.ensure_connected()?;

        let envelope = self.envelope(EventCategory::Created, appointment.id(), &appointment)?;
        let placement = self.publish_one(EventCategory::Created, envelope).await?;

        info!(
            appointment_id = %appointment.id(),
            partition = placement.partition,
            offset = placement.offset,
            "Appointment created event sent"
        );

        Ok(PublishedAppointment {
            appointment,
            placement,
        })
    }

    /// Publish a partial update.
    ///
    /// `changes` is merged with `{id, updatedAt: now}`; the merged `id` and
    /// `updatedAt` replace any same-named keys in `changes`. Required fields
    /// are not re-validated.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidRequest`] if `id` is empty
    /// - [`PipelineError::NotConnected`] before [`connect`](Self::connect)
    /// - [`PipelineError::Publish`] if the transport failed
    pub async fn update_appointment(
        &self,
        id: &str,
        changes: Map<String, Value>,
    ) -> Result<PublishedUpdate, PipelineError> {
        require_id(id)?;
        self.ensure_connected()?;

        let update = AppointmentUpdate::merge(id, changes, self.clock.as_ref());
        let envelope = self.envelope(EventCategory::Updated, id, &update)?;
        let placement = self.publish_one(EventCategory::Updated, envelope).await?;

        info!(
            appointment_id = %id,
            partition = placement.partition,
            offset = placement.offset,
            "Appointment updated event sent"
        );

        Ok(PublishedUpdate { update, placement })
    }

    /// Publish a partial update from typed changes.
    ///
    /// # Errors
    ///
    /// Same as [`update_appointment`](Self::update_appointment).
    pub async fn update_with(
        &self,
        id: &str,
        changes: &AppointmentChanges,
    ) -> Result<PublishedUpdate, PipelineError> {
        let Value::Object(map) = serde_json::to_value(changes)? else {
            return Err(PipelineError::InvalidRequest(
                "changes must serialize to a JSON object".to_string(),
            ));
        };
        self.update_appointment(id, map).await
    }

    /// Publish a cancellation. `reason` may be absent.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidRequest`] if `id` is empty
    /// - [`PipelineError::NotConnected`] before [`connect`](Self::connect)
    /// - [`PipelineError::Publish`] if the transport failed
    pub async fn cancel_appointment(
        &self,
        id: &str,
        reason: Option<&str>,
    ) -> Result<PublishedCancellation, PipelineError> {
        require_id(id)?;
        self.ensure_connected()?;

        let cancellation = Cancellation::new(id, reason.map(str::to_string), self.clock.as_ref());
        let envelope = self.envelope(EventCategory::Cancelled, id, &cancellation)?;
        let placement = self.publish_one(EventCategory::Cancelled, envelope).await?;

        info!(
            appointment_id = %id,
            reason = %cancellation.reason_or_default(),
            partition = placement.partition,
            offset = placement.offset,
            "Appointment cancelled event sent"
        );

        Ok(PublishedCancellation {
            cancellation,
            placement,
        })
    }

    /// Validate every item, then publish all of them as one request.
    ///
    /// An empty batch publishes nothing and returns an empty list.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::BatchValidation`] if any item is invalid; nothing is published
    /// - [`PipelineError::NotConnected`] before [`connect`](Self::connect)
    /// - [`PipelineError::Publish`] if the transport failed
    pub async fn send_batch(
        &self,
        items: Vec<NewAppointment>,
    ) -> Result<Vec<PublishedAppointment>, PipelineError> {
        let appointments: Vec<Appointment> = items
            .into_iter()
            .map(|data| Appointment::construct(data, self.clock.as_ref()))
            .collect();

        let failures: Vec<(usize, Vec<String>)> = appointments
            .iter()
            .enumerate()
            .filter_map(|(index, appointment)| {
                let report = appointment.validate();
                (!report.is_valid()).then_some((index, report.errors))
            })
            .collect();

        if !failures.is_empty() {
            warn!(
                batch_size = appointments.len(),
                invalid = failures.len(),
                "Rejected batch with invalid items"
            );
            return Err(PipelineError::BatchValidation { failures });
        }

        if appointments.is_empty() {
            return Ok(Vec::new());
        }

        self.ensure_connected()?;

        let envelopes = appointments
            .iter()
            .map(|appointment| self.envelope(EventCategory::Created, appointment.id(), appointment))
            .collect::<Result<Vec<_>, _>>()?;

        let placements = self.publish(EventCategory::Created, envelopes).await?;
        if placements.len() != appointments.len() {
            return Err(self.missing_placement(EventCategory::Created));
        }

        info!(count = placements.len(), "Batch sent");

        Ok(appointments
            .into_iter()
            .zip(placements)
            .map(|(appointment, placement)| PublishedAppointment {
                appointment,
                placement,
            })
            .collect())
    }

    fn ensure_connected(&self) -> Result<(), PipelineError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(PipelineError::NotConnected)
        }
    }

    fn envelope<T: serde::Serialize>(
        &self,
        category: EventCategory,
        key: &str,
        payload: &T,
    ) -> Result<Envelope, PipelineError> {
        Ok(Envelope::for_event(
            category,
            key,
            payload,
            iso8601(self.clock.now()),
        )?)
    }

    async fn publish_one(
        &self,
        category: EventCategory,
        envelope: Envelope,
    ) -> Result<Placement, PipelineError> {
        self.publish(category, vec![envelope])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| self.missing_placement(category))
    }

    async fn publish(
        &self,
        category: EventCategory,
        envelopes: Vec<Envelope>,
    ) -> Result<Vec<Placement>, PipelineError> {
        let topic = self.topics.topic(category);
        let count = envelopes.len();
        let started = Instant::now();

        match self.transport.publish(topic, envelopes).await {
            Ok(placements) => {
                ProducerMetrics::record_published(category, count, started.elapsed());
                Ok(placements)
            }
            Err(source) => {
                ProducerMetrics::record_publish_error(category);
                error!(topic = %topic, count, error = %source, "Failed to publish");
                Err(PipelineError::Publish {
                    topic: topic.to_string(),
                    source,
                })
            }
        }
    }

    fn missing_placement(&self, category: EventCategory) -> PipelineError {
        let topic = self.topics.topic(category).to_string();
        PipelineError::Publish {
            topic: topic.clone(),
            source: BrokerError::PublishFailed {
                topic,
                reason: "broker did not acknowledge every message".to_string(),
            },
        }
    }
}

fn require_id(id: &str) -> Result<(), PipelineError> {
    if id.is_empty() {
        Err(PipelineError::InvalidRequest(
            "appointment id is required".to_string(),
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use appointment_events_core::envelope::EVENT_TYPE_HEADER;
    use appointment_events_testing::{InMemoryBroker, TEST_CLOCK_ISO, test_clock};
    use serde_json::json;

    fn producer(broker: &InMemoryBroker) -> AppointmentProducer {
        AppointmentProducer::new(
            Arc::new(broker.producer()),
            Arc::new(TopicRegistry::default()),
            Arc::new(test_clock()),
        )
    }

    fn valid(patient: &str) -> NewAppointment {
        NewAppointment {
            patient_name: Some(patient.to_string()),
            doctor_name: Some("Dr. Smith".to_string()),
            appointment_date: Some("2025-01-01".to_string()),
            appointment_time: Some("09:00".to_string()),
            ..NewAppointment::default()
        }
    }

    #[tokio::test]
    async fn create_publishes_one_envelope_to_created_topic() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        producer.connect().await.unwrap();

        let published = producer.create_appointment(valid("A")).await.unwrap();

        let calls = broker.publish_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].topic, "appointments-created");
        assert_eq!(calls[0].envelopes.len(), 1);

        let envelope = &calls[0].envelopes[0];
        assert_eq!(envelope.key, published.appointment.id());
        assert_eq!(
            envelope.headers.get(EVENT_TYPE_HEADER),
            Some("APPOINTMENT_CREATED")
        );
        assert_eq!(envelope.headers.timestamp(), Some(TEST_CLOCK_ISO));
        assert_eq!(published.placement, Placement { partition: 0, offset: 0 });
    }

    #[tokio::test]
    async fn invalid_create_never_reaches_transport() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        producer.connect().await.unwrap();

        let result = producer
            .create_appointment(NewAppointment {
                patient_name: Some("A".to_string()),
                ..NewAppointment::default()
            })
            .await;

        match result {
            Err(PipelineError::Validation { errors }) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(broker.publish_calls().is_empty());
    }

    #[tokio::test]
    async fn publishing_while_disconnected_fails_without_transport_call() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);

        let result = producer.cancel_appointment("appt-1", None).await;

        assert!(matches!(result, Err(PipelineError::NotConnected)));
        assert!(broker.publish_calls().is_empty());
    }

    #[tokio::test]
    async fn update_merges_id_and_timestamp() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        producer.connect().await.unwrap();

        let changes = json!({ "status": "CONFIRMED", "id": "other", "updatedAt": "stale" });
        let published = producer
            .update_appointment("appt-1", changes.as_object().cloned().unwrap())
            .await
            .unwrap();

        assert_eq!(published.update.id, "appt-1");
        assert_eq!(published.update.updated_at, TEST_CLOCK_ISO);

        let call = &broker.publish_calls()[0];
        assert_eq!(call.topic, "appointments-updated");
        let payload: Value = serde_json::from_slice(&call.envelopes[0].payload).unwrap();
        assert_eq!(
            payload,
            json!({ "id": "appt-1", "updatedAt": TEST_CLOCK_ISO, "status": "CONFIRMED" })
        );
    }

    #[tokio::test]
    async fn typed_update_only_carries_changed_fields() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        producer.connect().await.unwrap();

        let changes = AppointmentChanges {
            appointment_time: Some("10:30".to_string()),
            ..AppointmentChanges::default()
        };
        let published = producer.update_with("appt-1", &changes).await.unwrap();

        assert_eq!(published.update.changes.len(), 1);
        assert_eq!(published.update.changes["appointmentTime"], "10:30");
    }

    #[tokio::test]
    async fn cancel_without_reason_sends_null_reason() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        producer.connect().await.unwrap();

        let published = producer.cancel_appointment("id-1", None).await.unwrap();
        assert_eq!(published.cancellation.reason_or_default(), "Not specified");

        let call = &broker.publish_calls()[0];
        assert_eq!(call.topic, "appointments-cancelled");
        assert_eq!(call.envelopes[0].key, "id-1");
        let payload: Value = serde_json::from_slice(&call.envelopes[0].payload).unwrap();
        assert_eq!(payload["status"], "CANCELLED");
        assert!(payload["cancellationReason"].is_null());
        assert_eq!(payload["cancelledAt"], TEST_CLOCK_ISO);
    }

    #[tokio::test]
    async fn empty_id_is_rejected() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        producer.connect().await.unwrap();

        let result = producer.cancel_appointment("", Some("sick")).await;

        assert!(matches!(result, Err(PipelineError::InvalidRequest(_))));
        assert!(broker.publish_calls().is_empty());
    }

    #[tokio::test]
    async fn batch_is_one_request_in_input_order() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        producer.connect().await.unwrap();

        let published = producer
            .send_batch(vec![valid("A"), valid("B"), valid("C")])
            .await
            .unwrap();

        let calls = broker.publish_calls();
        assert_eq!(calls.len(), 1);
        let keys: Vec<&str> = calls[0].envelopes.iter().map(|e| e.key.as_str()).collect();
        let ids: Vec<&str> = published.iter().map(|p| p.appointment.id()).collect();
        assert_eq!(keys, ids);
        let offsets: Vec<i64> = published.iter().map(|p| p.placement.offset).collect();
        assert_eq!(offsets, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn batch_with_invalid_item_publishes_nothing() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        producer.connect().await.unwrap();

        let mut missing_doctor = valid("B");
        missing_doctor.doctor_name = None;

        let result = producer
            .send_batch(vec![valid("A"), missing_doctor, valid("C")])
            .await;

        match result {
            Err(PipelineError::BatchValidation { failures }) => {
                assert_eq!(failures, vec![(1, vec!["Doctor name is required".to_string()])]);
            }
            other => panic!("expected batch validation error, got {other:?}"),
        }
        assert!(broker.publish_calls().is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        producer.connect().await.unwrap();

        let published = producer.send_batch(Vec::new()).await.unwrap();

        assert!(published.is_empty());
        assert!(broker.publish_calls().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_surfaces_as_publish_error() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        producer.connect().await.unwrap();
        broker.fail_next_publish("leader not available");

        let result = producer.create_appointment(valid("A")).await;

        match result {
            Err(PipelineError::Publish { topic, source }) => {
                assert_eq!(topic, "appointments-created");
                assert!(source.to_string().contains("leader not available"));
            }
            other => panic!("expected publish error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_failure_is_a_connection_error() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        broker.fail_next_connect("no brokers");

        let result = producer.connect().await;

        assert!(matches!(result, Err(PipelineError::Connection(_))));
        assert!(!producer.is_connected());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);

        producer.disconnect().await.unwrap();
        producer.connect().await.unwrap();
        producer.disconnect().await.unwrap();
        producer.disconnect().await.unwrap();

        assert!(!producer.is_connected());
    }

    mod batch_properties {
        use super::*;
        use proptest::prelude::*;

        fn item(valid_item: bool, index: usize) -> NewAppointment {
            if valid_item {
                valid(&format!("patient-{index}"))
            } else {
                NewAppointment {
                    patient_name: Some(format!("patient-{index}")),
                    ..NewAppointment::default()
                }
            }
        }

        proptest! {
            #[test]
            fn batch_is_all_or_nothing(flags in prop::collection::vec(any::<bool>(), 1..12)) {
                let broker = InMemoryBroker::new();
                let producer = producer(&broker);
                let items: Vec<NewAppointment> = flags
                    .iter()
                    .enumerate()
                    .map(|(index, valid_item)| item(*valid_item, index))
                    .collect();

                let result = tokio_test::block_on(async {
                    producer.connect().await.unwrap();
                    producer.send_batch(items).await
                });

                let invalid: Vec<usize> = flags
                    .iter()
                    .enumerate()
                    .filter(|(_, valid_item)| !**valid_item)
                    .map(|(index, _)| index)
                    .collect();

                if invalid.is_empty() {
                    let published = result.unwrap();
                    prop_assert_eq!(published.len(), flags.len());
                    prop_assert_eq!(broker.messages_on("appointments-created").len(), flags.len());
                } else {
                    match result {
                        Err(PipelineError::BatchValidation { failures }) => {
                            let indices: Vec<usize> =
                                failures.iter().map(|(index, _)| *index).collect();
                            prop_assert_eq!(indices, invalid);
                        }
                        other => prop_assert!(false, "expected batch rejection, got {:?}", other),
                    }
                    prop_assert!(broker.publish_calls().is_empty());
                }
            }
        }
    }
}
