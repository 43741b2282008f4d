//! # Appointment Events Testing
//!
//! Testing utilities for the appointment event pipeline.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: a broker double with publish/consume handles, call
//!   recording and failure injection
//! - [`FixedClock`]: deterministic time
//! - [`RecordingHandler`]: an event handler that captures what it is given
//!
//! ## Example
//!
//! ```ignore
//! use appointment_events_testing::{InMemoryBroker, test_clock};
//!
//! #[tokio::test]
//! async fn publishes_one_envelope() {
//!     let broker = InMemoryBroker::new();
//!     let producer = AppointmentProducer::new(
//!         Arc::new(broker.producer()),
//!         Arc::new(TopicRegistry::default()),
//!         Arc::new(test_clock()),
//!     );
//!     // ...
//!     assert_eq!(broker.publish_calls().len(), 1);
//! }
//! ```

/// In-memory broker double
pub mod broker;

/// Recording event handlers
pub mod handlers;

/// Mock implementations of environment traits.
pub mod mocks {
    use appointment_events_core::environment::Clock;
    use chrono::{DateTime, TimeZone, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use appointment_events_testing::mocks::FixedClock;
    /// use appointment_events_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        )
    }

    /// The wire rendering of [`test_clock`]'s time.
    pub const TEST_CLOCK_ISO: &str = "2025-01-01T00:00:00.000Z";
}

// Re-export commonly used items
pub use broker::{InMemoryBroker, InMemoryConsumer, InMemoryProducer, PublishCall};
pub use handlers::RecordingHandler;
pub use mocks::{FixedClock, TEST_CLOCK_ISO, test_clock};
