//! Topic registry shared by producer and consumer.
//!
//! Routing is a closed mapping: three event categories, each bound to exactly
//! one topic, plus one reserved topic that no handler listens to. Both sides of
//! the pipeline hold the same [`TopicRegistry`] (usually behind an `Arc`) so a
//! topic name is written down once.
//!
//! # Default Topic Names
//!
//! | Category | Topic |
//! |---|---|
//! | (reserved) | `appointments-topic` |
//! | [`EventCategory::Created`] | `appointments-created` |
//! | [`EventCategory::Updated`] | `appointments-updated` |
//! | [`EventCategory::Cancelled`] | `appointments-cancelled` |

use std::fmt;

/// Reserved topic, kept for compatibility with existing deployments.
pub const APPOINTMENTS_TOPIC: &str = "appointments-topic";
/// Topic for [`EventCategory::Created`].
pub const APPOINTMENTS_CREATED_TOPIC: &str = "appointments-created";
/// Topic for [`EventCategory::Updated`].
pub const APPOINTMENTS_UPDATED_TOPIC: &str = "appointments-updated";
/// Topic for [`EventCategory::Cancelled`].
pub const APPOINTMENTS_CANCELLED_TOPIC: &str = "appointments-cancelled";

/// Logical category of a lifecycle event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// A new appointment was booked
    Created,
    /// Fields of an existing appointment changed
    Updated,
    /// An appointment was cancelled
    Cancelled,
}

impl EventCategory {
    /// Every category, in routing order.
    pub const ALL: [Self; 3] = [Self::Created, Self::Updated, Self::Cancelled];

    /// Value of the `eventType` header for this category.
    #[must_use]
    pub const fn event_type(self) -> &'static str {
        match self {
            Self::Created => "APPOINTMENT_CREATED",
            Self::Updated => "APPOINTMENT_UPDATED",
            Self::Cancelled => "APPOINTMENT_CANCELLED",
        }
    }

    /// Parse an `eventType` header value.
    #[must_use]
    pub fn from_event_type(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.event_type() == value)
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_type())
    }
}

/// Mapping from event category to topic name.
///
/// # Example
///
/// ```
/// use appointment_events_core::topic::{EventCategory, TopicRegistry};
///
/// let topics = TopicRegistry::default();
/// assert_eq!(topics.topic(EventCategory::Created), "appointments-created");
/// assert_eq!(
///     topics.category_of("appointments-cancelled"),
///     Some(EventCategory::Cancelled)
/// );
/// assert_eq!(topics.category_of("appointments-topic"), None);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicRegistry {
    reserved: String,
    created: String,
    updated: String,
    cancelled: String,
}

impl TopicRegistry {
    /// Build a registry with custom topic names.
    ///
    /// Returns `None` if two categories would share a topic, or a category
    /// topic collides with the reserved one, since routing by topic would then
    /// be ambiguous.
    #[must_use]
    pub fn new(
        reserved: impl Into<String>,
        created: impl Into<String>,
        updated: impl Into<String>,
        cancelled: impl Into<String>,
    ) -> Option<Self> {
        let registry = Self {
            reserved: reserved.into(),
            created: created.into(),
            updated: updated.into(),
            cancelled: cancelled.into(),
        };

        let names = [
            &registry.reserved,
            &registry.created,
            &registry.updated,
            &registry.cancelled,
        ];
        let distinct = names
            .iter()
            .enumerate()
            .all(|(i, name)| !name.is_empty() && names[i + 1..].iter().all(|other| other != name));

        distinct.then_some(registry)
    }

    /// Topic that carries events of `category`.
    #[must_use]
    pub fn topic(&self, category: EventCategory) -> &str {
        match category {
            EventCategory::Created => &self.created,
            EventCategory::Updated => &self.updated,
            EventCategory::Cancelled => &self.cancelled,
        }
    }

    /// Category routed to by `topic`, or `None` for any other topic
    /// (including the reserved one).
    #[must_use]
    pub fn category_of(&self, topic: &str) -> Option<EventCategory> {
        EventCategory::ALL
            .into_iter()
            .find(|category| self.topic(*category) == topic)
    }

    /// The three category topics, in routing order.
    #[must_use]
    pub fn category_topics(&self) -> Vec<String> {
        EventCategory::ALL
            .into_iter()
            .map(|category| self.topic(category).to_string())
            .collect()
    }

    /// The reserved, handler-less topic.
    #[must_use]
    pub fn reserved(&self) -> &str {
        &self.reserved
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self {
            reserved: APPOINTMENTS_TOPIC.to_string(),
            created: APPOINTMENTS_CREATED_TOPIC.to_string(),
            updated: APPOINTMENTS_UPDATED_TOPIC.to_string(),
            cancelled: APPOINTMENTS_CANCELLED_TOPIC.to_string(),
        }
    }
}
