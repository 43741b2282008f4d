//! Recording event handlers.
//!
//! [`RecordingHandler`] captures every payload and envelope it receives and
//! can be told to fail or panic on chosen keys, to exercise the consumer's
//! failure isolation.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use appointment_events_core::envelope::ReceivedEnvelope;
use appointment_events_runtime::handlers::{EventHandler, HandlerResult};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Behaviour {
    fail_keys: HashSet<String>,
    panic_keys: HashSet<String>,
}

/// Handler that records what it is given.
///
/// Clones share the same recording, so a test can keep one clone and
/// register another with a `HandlerSet`.
///
/// # Example
///
/// ```
/// use appointment_events_testing::RecordingHandler;
/// use appointment_events_core::Cancellation;
///
/// let handler: RecordingHandler<Cancellation> = RecordingHandler::new().failing_on("appt-2");
/// assert!(handler.payloads().is_empty());
/// ```
pub struct RecordingHandler<P> {
    calls: Arc<Mutex<Vec<(P, ReceivedEnvelope)>>>,
    behaviour: Arc<Mutex<Behaviour>>,
}

impl<P: Clone> RecordingHandler<P> {
    /// A handler that succeeds on every message.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            behaviour: Arc::new(Mutex::new(Behaviour::default())),
        }
    }

    /// Record, then return an error, for messages keyed `key`.
    #[must_use]
    pub fn failing_on(self, key: impl Into<String>) -> Self {
        self.behaviour.lock().unwrap().fail_keys.insert(key.into());
        self
    }

    /// Record, then panic, for messages keyed `key`.
    #[must_use]
    pub fn panicking_on(self, key: impl Into<String>) -> Self {
        self.behaviour.lock().unwrap().panic_keys.insert(key.into());
        self
    }

    /// Payloads received, in order.
    #[must_use]
    pub fn payloads(&self) -> Vec<P> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(payload, _)| payload.clone())
            .collect()
    }

    /// Envelopes received, in order.
    #[must_use]
    pub fn envelopes(&self) -> Vec<ReceivedEnvelope> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, envelope)| envelope.clone())
            .collect()
    }

    /// Keys of the envelopes received, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, envelope)| envelope.envelope.key.clone())
            .collect()
    }

    /// Number of messages received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl<P: Clone> Default for RecordingHandler<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Clone for RecordingHandler<P> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
            behaviour: Arc::clone(&self.behaviour),
        }
    }
}

#[async_trait]
impl<P> EventHandler<P> for RecordingHandler<P>
where
    P: Clone + Send + 'static,
{
    #[allow(clippy::panic)]
    async fn handle(&self, payload: P, envelope: &ReceivedEnvelope) -> HandlerResult {
        let key = envelope.envelope.key.clone();
        self.calls.lock().unwrap().push((payload, envelope.clone()));

        let (should_fail, should_panic) = {
            let behaviour = self.behaviour.lock().unwrap();
            (
                behaviour.fail_keys.contains(&key),
                behaviour.panic_keys.contains(&key),
            )
        };

        if should_panic {
            panic!("recording handler told to panic on {key}");
        }
        if should_fail {
            return Err(format!("recording handler told to fail on {key}").into());
        }
        Ok(())
    }
}
