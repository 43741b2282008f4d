//! Message envelope: the unit exchanged with the broker.
//!
//! An [`Envelope`] is a key (the appointment id), a UTF-8 JSON payload and a
//! small header map. Two headers are always present on envelopes built by
//! [`Envelope::for_event`]:
//!
//! - `eventType`: `APPOINTMENT_CREATED`, `APPOINTMENT_UPDATED` or `APPOINTMENT_CANCELLED`
//! - `timestamp`: ISO-8601 time the envelope was built
//!
//! The header is derived from the same [`EventCategory`] the producer uses to
//! pick the topic, so header and topic cannot disagree.

use crate::topic::EventCategory;
use serde::Serialize;
use std::fmt;

/// Header carrying the event type.
pub const EVENT_TYPE_HEADER: &str = "eventType";

/// Header carrying the envelope build time.
pub const TIMESTAMP_HEADER: &str = "timestamp";

/// Event type reported when the header is missing.
pub const UNKNOWN_EVENT_TYPE: &str = "UNKNOWN";

/// Ordered header list with unique names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Empty header list.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Set `name` to `value`, replacing an existing entry of the same name.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set `name` to `value`, replacing an existing entry of the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Look up a header value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    /// Iterate over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `eventType` header, defaulted to `UNKNOWN` when absent.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self.get(EVENT_TYPE_HEADER) {
            Some(value) => EventCategory::from_event_type(value)
                .map_or_else(|| EventType::Unknown(value.to_string()), EventType::Known),
            None => EventType::Unknown(UNKNOWN_EVENT_TYPE.to_string()),
        }
    }

    /// The `timestamp` header, if present.
    #[must_use]
    pub fn timestamp(&self) -> Option<&str> {
        self.get(TIMESTAMP_HEADER)
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Event type as read from an envelope header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventType {
    /// One of the three lifecycle categories
    Known(EventCategory),
    /// Anything else, including the `UNKNOWN` default for a missing header
    Unknown(String),
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(category) => f.write_str(category.event_type()),
            Self::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// Key + payload + headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Partitioning key (the appointment id)
    pub key: String,
    /// UTF-8 JSON payload
    pub payload: Vec<u8>,
    /// Header map
    pub headers: Headers,
}

impl Envelope {
    /// Build the envelope for a lifecycle event.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` cannot be serialized to JSON.
    pub fn for_event<T: Serialize + ?Sized>(
        category: EventCategory,
        key: impl Into<String>,
        payload: &T,
        timestamp: impl Into<String>,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            key: key.into(),
            payload: serde_json::to_vec(payload)?,
            headers: Headers::new()
                .with(EVENT_TYPE_HEADER, category.event_type())
                .with(TIMESTAMP_HEADER, timestamp),
        })
    }

    /// Build an envelope from raw parts with no header guarantees.
    ///
    /// Used by transports when materializing received messages.
    #[must_use]
    pub fn raw(key: impl Into<String>, payload: impl Into<Vec<u8>>, headers: Headers) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            headers,
        }
    }

    /// Event type header with the `UNKNOWN` default applied.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.headers.event_type()
    }
}

/// Broker-assigned position of a published message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Placement {
    /// Partition the message landed in
    pub partition: i32,
    /// Offset within that partition
    pub offset: i64,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition {} offset {}", self.partition, self.offset)
    }
}

/// Envelope as delivered to a consumer, with its coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedEnvelope {
    /// Topic it was read from
    pub topic: String,
    /// Partition it was read from
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// The message itself
    pub envelope: Envelope,
}

impl ReceivedEnvelope {
    /// The message coordinates as a [`Placement`].
    #[must_use]
    pub const fn placement(&self) -> Placement {
        Placement {
            partition: self.partition,
            offset: self.offset,
        }
    }
}
