//! Per-message decode and routing.
//!
//! For each received envelope the [`Dispatcher`]:
//!
//! 1. Maps the envelope's **topic** to an [`EventCategory`]. A topic outside
//!    the three category topics yields [`DispatchOutcome::Dropped`]: no
//!    handler runs and no error is raised.
//! 2. Decodes the JSON payload into the category's payload type.
//! 3. Invokes the registered handler, or [`DefaultHandler`].
//!
//! The `eventType` header is informational: routing never depends on it, and
//! a header that disagrees with the topic is only logged.
//!
//! Handler errors and panics are returned as [`DispatchError`] so the
//! receive loop can log them and move on.

use crate::error::{DecodeError, DispatchError};
use crate::handlers::{DefaultHandler, EventHandler, HandlerResult, HandlerSet};
use appointment_events_core::appointment::{Appointment, AppointmentUpdate, Cancellation};
use appointment_events_core::envelope::{EventType, ReceivedEnvelope};
use appointment_events_core::topic::{EventCategory, TopicRegistry};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::debug;

/// A decoded lifecycle event.
#[derive(Clone, Debug, PartialEq)]
pub enum AppointmentEvent {
    /// Payload of `APPOINTMENT_CREATED`
    Created(Appointment),
    /// Payload of `APPOINTMENT_UPDATED`
    Updated(AppointmentUpdate),
    /// Payload of `APPOINTMENT_CANCELLED`
    Cancelled(Cancellation),
}

impl AppointmentEvent {
    /// Decode `payload` as the payload type of `category`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the bytes are not valid JSON for that type.
    /// Updates and cancellations require an `id`; a created record decodes
    /// with whatever fields it carries.
    pub fn decode(category: EventCategory, payload: &[u8]) -> Result<Self, DecodeError> {
        fn parse<T: DeserializeOwned>(
            category: EventCategory,
            payload: &[u8],
        ) -> Result<T, DecodeError> {
            serde_json::from_slice(payload).map_err(|source| DecodeError { category, source })
        }

        Ok(match category {
            EventCategory::Created => Self::Created(parse(category, payload)?),
            EventCategory::Updated => Self::Updated(parse(category, payload)?),
            EventCategory::Cancelled => Self::Cancelled(parse(category, payload)?),
        })
    }

    /// Category of the event.
    #[must_use]
    pub const fn category(&self) -> EventCategory {
        match self {
            Self::Created(_) => EventCategory::Created,
            Self::Updated(_) => EventCategory::Updated,
            Self::Cancelled(_) => EventCategory::Cancelled,
        }
    }

    /// Id of the appointment the event is about.
    #[must_use]
    pub fn appointment_id(&self) -> &str {
        match self {
            Self::Created(appointment) => appointment.id(),
            Self::Updated(update) => &update.id,
            Self::Cancelled(cancellation) => &cancellation.id,
        }
    }
}

/// What happened to a message that did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler for this category processed the message
    Handled(EventCategory),
    /// The topic is not a category topic; the message was ignored
    Dropped,
}

/// Routes received envelopes to handlers.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    topics: Arc<TopicRegistry>,
    handlers: HandlerSet,
}

impl Dispatcher {
    /// Create a dispatcher over `topics` with the given handlers.
    #[must_use]
    pub const fn new(topics: Arc<TopicRegistry>, handlers: HandlerSet) -> Self {
        Self { topics, handlers }
    }

    /// Process one message.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Decode`] if the payload is not valid for its category
    /// - [`DispatchError::Handler`] if the handler returned an error
    /// - [`DispatchError::Panicked`] if the handler panicked
    pub async fn dispatch(
        &self,
        message: &ReceivedEnvelope,
    ) -> Result<DispatchOutcome, DispatchError> {
        let Some(category) = self.topics.category_of(&message.topic) else {
            return Ok(DispatchOutcome::Dropped);
        };

        let header = message.envelope.event_type();
        if header != EventType::Known(category) {
            debug!(
                topic = %message.topic,
                event_type = %header,
                routed_as = %category,
                "eventType header does not match topic, routing by topic"
            );
        }

        let event = AppointmentEvent::decode(category, &message.envelope.payload)?;

        let result = AssertUnwindSafe(self.invoke(event, message))
            .catch_unwind()
            .await
            .map_err(|_| DispatchError::Panicked { category })?;

        result.map_err(|source| DispatchError::Handler { category, source })?;
        Ok(DispatchOutcome::Handled(category))
    }

    async fn invoke(&self, event: AppointmentEvent, message: &ReceivedEnvelope) -> HandlerResult {
        match event {
            AppointmentEvent::Created(payload) => match &self.handlers.created {
                Some(handler) => handler.handle(payload, message).await,
                None => DefaultHandler.handle(payload, message).await,
            },
            AppointmentEvent::Updated(payload) => match &self.handlers.updated {
                Some(handler) => handler.handle(payload, message).await,
                None => DefaultHandler.handle(payload, message).await,
            },
            AppointmentEvent::Cancelled(payload) => match &self.handlers.cancelled {
                Some(handler) => handler.handle(payload, message).await,
                None => DefaultHandler.handle(payload, message).await,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::handlers::handler_fn;
    use appointment_events_core::envelope::{Envelope, Headers};

    fn message(topic: &str, payload: &str) -> ReceivedEnvelope {
        ReceivedEnvelope {
            topic: topic.to_string(),
            partition: 0,
            offset: 0,
            envelope: Envelope::raw("appt-1", payload.as_bytes().to_vec(), Headers::new()),
        }
    }

    fn dispatcher(handlers: HandlerSet) -> Dispatcher {
        Dispatcher::new(Arc::new(TopicRegistry::default()), handlers)
    }

    #[test]
    fn update_decode_requires_id() {
        let result = AppointmentEvent::decode(EventCategory::Updated, br#"{"status":"CONFIRMED"}"#);
        assert!(result.is_err());

        let event =
            AppointmentEvent::decode(EventCategory::Updated, br#"{"id":"a","status":"CONFIRMED"}"#)
                .unwrap();
        assert_eq!(event.category(), EventCategory::Updated);
        assert_eq!(event.appointment_id(), "a");
    }

    #[tokio::test]
    async fn incomplete_created_records_reach_the_handler() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        let handlers = HandlerSet::new().on_created(handler_fn(
            move |appointment: Appointment, _: ReceivedEnvelope| {
                let recorded = Arc::clone(&recorded);
                async move {
                    recorded.lock().unwrap().push(appointment);
                    Ok(())
                }
            },
        ));
        let dispatcher = dispatcher(handlers);

        for payload in [
            r#"{"patientName":"Ada","doctorName":"Dr. Grey"}"#,
            r#"{"id":"appt-2","patientName":null}"#,
            r#"{"id":"appt-3","status":"RESCHEDULED"}"#,
        ] {
            let outcome = dispatcher
                .dispatch(&message("appointments-created", payload))
                .await
                .unwrap();
            assert_eq!(outcome, DispatchOutcome::Handled(EventCategory::Created));
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].id(), "");
        assert_eq!(seen[0].patient_name, "Ada");
        assert_eq!(seen[1].patient_name, "");
        assert_eq!(seen[2].status.as_str(), "RESCHEDULED");
    }

    #[tokio::test]
    async fn unknown_topic_is_dropped() {
        let outcome = dispatcher(HandlerSet::new())
            .dispatch(&message("appointments-topic", "not json"))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Dropped);
    }

    #[tokio::test]
    async fn invalid_json_is_a_decode_error() {
        let result = dispatcher(HandlerSet::new())
            .dispatch(&message("appointments-created", "{not json"))
            .await;
        assert!(matches!(result, Err(DispatchError::Decode(_))));
    }

    #[tokio::test]
    async fn missing_handler_falls_back_to_default() {
        let outcome = dispatcher(HandlerSet::new())
            .dispatch(&message(
                "appointments-cancelled",
                r#"{"id":"appt-1","status":"CANCELLED","cancellationReason":null}"#,
            ))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Handled(EventCategory::Cancelled));
    }

    #[tokio::test]
    async fn handler_error_is_reported_with_category() {
        let handlers = HandlerSet::new().on_updated(handler_fn(
            |_: AppointmentUpdate, _: ReceivedEnvelope| async { Err("calendar offline".into()) },
        ));

        let result = dispatcher(handlers)
            .dispatch(&message("appointments-updated", r#"{"id":"appt-1"}"#))
            .await;

        match result {
            Err(DispatchError::Handler { category, source }) => {
                assert_eq!(category, EventCategory::Updated);
                assert_eq!(source.to_string(), "calendar offline");
            }
            other => panic!("expected handler error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let handlers = HandlerSet::new().on_created(handler_fn(
            |_: Appointment, _: ReceivedEnvelope| async { panic!("boom") },
        ));

        let result = dispatcher(handlers)
            .dispatch(&message("appointments-created", r#"{"id":"appt-1"}"#))
            .await;

        assert!(matches!(
            result,
            Err(DispatchError::Panicked {
                category: EventCategory::Created
            })
        ));
    }
}
