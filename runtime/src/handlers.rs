//! Event handler traits and the default handler.
//!
//! A handler receives the decoded payload of one category together with the
//! raw envelope it came from:
//!
//! | Category  | Payload               | Registered with            |
//! |-----------|-----------------------|----------------------------|
//! | Created   | [`Appointment`]       | [`HandlerSet::on_created`]   |
//! | Updated   | [`AppointmentUpdate`] | [`HandlerSet::on_updated`]   |
//! | Cancelled | [`Cancellation`]      | [`HandlerSet::on_cancelled`] |
//!
//! Categories without a registered handler go to [`DefaultHandler`], which
//! only logs. It stands in for the downstream side effects (persistence,
//! notifications, calendar sync) and does nothing else.
//!
//! # Error Handling
//!
//! Handlers return [`HandlerResult`]. Errors are logged by the consumer with
//! the message coordinates and do not stop the receive loop. The message is
//! not redelivered.
//!
//! # Example
//!
//! ```
//! use appointment_events_runtime::{HandlerSet, handler_fn};
//! use appointment_events_core::{Appointment, ReceivedEnvelope};
//!
//! let handlers = HandlerSet::new().on_created(handler_fn(
//!     |appointment: Appointment, _envelope: ReceivedEnvelope| async move {
//!         println!("booked {}", appointment.id());
//!         Ok(())
//!     },
//! ));
//! ```

use appointment_events_core::appointment::{Appointment, AppointmentUpdate, Cancellation};
use appointment_events_core::envelope::ReceivedEnvelope;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Error returned by a handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of handling one message.
pub type HandlerResult = Result<(), HandlerError>;

/// Handler for one payload type.
///
/// # Thread Safety
///
/// Handlers are shared with the receive loop as `Arc<dyn EventHandler<P>>`
/// and must be `Send + Sync`. The loop awaits one handler at a time.
#[async_trait]
pub trait EventHandler<P>: Send + Sync
where
    P: Send + 'static,
{
    /// Process one decoded message.
    ///
    /// # Errors
    ///
    /// Any error is logged by the consumer; processing continues with the
    /// next message.
    async fn handle(&self, payload: P, envelope: &ReceivedEnvelope) -> HandlerResult;
}

/// Closure adapter returned by [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as an [`EventHandler`].
///
/// The closure receives an owned copy of the envelope so the returned future
/// does not borrow from the receive loop.
#[must_use]
pub const fn handler_fn<P, F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(P, ReceivedEnvelope) -> Fut,
    Fut: Future<Output = HandlerResult>,
{
    FnHandler { f }
}

#[async_trait]
impl<P, F, Fut> EventHandler<P> for FnHandler<F>
where
    P: Send + 'static,
    F: Fn(P, ReceivedEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, payload: P, envelope: &ReceivedEnvelope) -> HandlerResult {
        (self.f)(payload, envelope.clone()).await
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Logging-only handler used for categories with nothing registered.
///
/// Logs the fields relevant to each category:
/// - created: patient, doctor, date, time, status
/// - updated: id, update time
/// - cancelled: id, cancellation time, reason (`"Not specified"` when absent)
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHandler;

#[async_trait]
impl EventHandler<Appointment> for DefaultHandler {
    async fn handle(&self, payload: Appointment, _envelope: &ReceivedEnvelope) -> HandlerResult {
        info!(
            appointment_id = %payload.id(),
            patient = %payload.patient_name,
            doctor = %payload.doctor_name,
            date = %payload.appointment_date,
            time = %payload.appointment_time,
            status = %payload.status,
            "New appointment created"
        );
        Ok(())
    }
}

#[async_trait]
impl EventHandler<AppointmentUpdate> for DefaultHandler {
    async fn handle(
        &self,
        payload: AppointmentUpdate,
        _envelope: &ReceivedEnvelope,
    ) -> HandlerResult {
        info!(
            appointment_id = %payload.id,
            updated_at = %payload.updated_at,
            changed_fields = payload.changes.len(),
            "Appointment updated"
        );
        Ok(())
    }
}

#[async_trait]
impl EventHandler<Cancellation> for DefaultHandler {
    async fn handle(&self, payload: Cancellation, _envelope: &ReceivedEnvelope) -> HandlerResult {
        info!(
            appointment_id = %payload.id,
            cancelled_at = %payload.cancelled_at,
            reason = %payload.reason_or_default(),
            "Appointment cancelled"
        );
        Ok(())
    }
}

/// Handlers for the three event categories.
///
/// The set is closed: there is exactly one slot per category, so a handler
/// cannot be registered under a misspelled or unknown key.
#[derive(Clone, Default)]
pub struct HandlerSet {
    pub(crate) created: Option<Arc<dyn EventHandler<Appointment>>>,
    pub(crate) updated: Option<Arc<dyn EventHandler<AppointmentUpdate>>>,
    pub(crate) cancelled: Option<Arc<dyn EventHandler<Cancellation>>>,
}

impl HandlerSet {
    /// Empty set: every category goes to [`DefaultHandler`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle `APPOINTMENT_CREATED` messages.
    #[must_use]
    pub fn on_created(mut self, handler: impl EventHandler<Appointment> + 'static) -> Self {
        self.created = Some(Arc::new(handler));
        self
    }

    /// Handle `APPOINTMENT_UPDATED` messages.
    #[must_use]
    pub fn on_updated(mut self, handler: impl EventHandler<AppointmentUpdate> + 'static) -> Self {
        self.updated = Some(Arc::new(handler));
        self
    }

    /// Handle `APPOINTMENT_CANCELLED` messages.
    #[must_use]
    pub fn on_cancelled(mut self, handler: impl EventHandler<Cancellation> + 'static) -> Self {
        self.cancelled = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSet")
            .field("created", &self.created.is_some())
            .field("updated", &self.updated.is_some())
            .field("cancelled", &self.cancelled.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use appointment_events_core::envelope::{Envelope, Headers};
    use appointment_events_core::environment::SystemClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn received() -> ReceivedEnvelope {
        ReceivedEnvelope {
            topic: "appointments-cancelled".to_string(),
            partition: 0,
            offset: 7,
            envelope: Envelope::raw("appt-1", b"{}".to_vec(), Headers::new()),
        }
    }

    #[tokio::test]
    async fn closure_handler_sees_payload_and_envelope() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handler = handler_fn(move |cancellation: Cancellation, envelope: ReceivedEnvelope| {
            let seen = Arc::clone(&seen);
            async move {
                assert_eq!(cancellation.id, "appt-1");
                assert_eq!(envelope.offset, 7);
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let payload = Cancellation::new("appt-1", None, &SystemClock);
        handler.handle(payload, &received()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn default_handler_accepts_missing_reason() {
        let payload: Cancellation = serde_json::from_str(r#"{"id":"appt-1"}"#).unwrap();
        let result = DefaultHandler.handle(payload, &received()).await;
        assert!(result.is_ok());
    }

    #[test]
    fn handler_set_tracks_registrations() {
        let handlers = HandlerSet::new().on_updated(DefaultHandler);
        assert!(handlers.created.is_none());
        assert!(handlers.updated.is_some());
        assert!(handlers.cancelled.is_none());
        assert_eq!(
            format!("{handlers:?}"),
            "HandlerSet { created: false, updated: true, cancelled: false }"
        );
    }
}
