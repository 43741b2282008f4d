//! # Appointment Events Core
//!
//! Core types and traits for the appointment lifecycle event pipeline.
//!
//! This crate holds everything the producing and consuming sides must agree on:
//!
//! - **Entity Model** ([`appointment`]): the appointment record, its defaults and validation
//! - **Topic Registry** ([`topic`]): the closed mapping from event category to topic name
//! - **Envelope** ([`envelope`]): the key + payload + headers unit exchanged with the broker
//! - **Broker capability** ([`broker`]): the transport traits the producer and consumer
//!   depend on, with no knowledge of a concrete client
//! - **Environment** ([`environment`]): injected clock
//!
//! ## Data Flow
//!
//! ```text
//! create/update/cancel ──► Appointment::validate ──► Envelope::for_event
//!                                                        │
//!                                                        ▼
//!                                               PublishTransport::publish
//!                                                        │
//!                                                     (broker)
//!                                                        │
//!                                                        ▼
//!                     handler ◄── dispatch ◄── ConsumeTransport::messages
//! ```
//!
//! ## Example
//!
//! ```
//! use appointment_events_core::appointment::{Appointment, NewAppointment};
//! use appointment_events_core::environment::SystemClock;
//!
//! let appointment = Appointment::construct(
//!     NewAppointment {
//!         patient_name: Some("Ada".to_string()),
//!         doctor_name: Some("Dr. Who".to_string()),
//!         appointment_date: Some("2025-01-01".to_string()),
//!         appointment_time: Some("09:00".to_string()),
//!         ..NewAppointment::default()
//!     },
//!     &SystemClock,
//! );
//!
//! assert!(appointment.validate().is_valid());
//! ```

/// Appointment entity, defaults and structural validation
pub mod appointment;

/// Broker capability traits and transport errors
pub mod broker;

/// Message envelope, headers and placements
pub mod envelope;

/// Topic registry and event categories
pub mod topic;

/// Environment traits for dependency injection
///
/// All time-dependent behaviour reads the clock through the [`Clock`](environment::Clock)
/// trait so producers can be driven deterministically in tests.
pub mod environment {
    use chrono::{DateTime, SecondsFormat, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use appointment_events_core::environment::{Clock, SystemClock};
    ///
    /// let now = SystemClock.now();
    /// assert!(now.timestamp() > 0);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Render a timestamp in the ISO-8601 form used on the wire
    /// (`2025-01-01T09:00:00.000Z`).
    #[must_use]
    pub fn iso8601(time: DateTime<Utc>) -> String {
        time.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

}

// Re-export commonly used types
pub use appointment::{
    Appointment, AppointmentChanges, AppointmentStatus, AppointmentUpdate, Cancellation,
    NewAppointment, ValidationReport,
};
pub use broker::{BrokerError, ConsumeTransport, PublishTransport, StartPosition};
pub use envelope::{Envelope, EventType, Headers, Placement, ReceivedEnvelope};
pub use topic::{EventCategory, TopicRegistry};
