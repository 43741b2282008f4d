//! In-memory broker for fast, deterministic pipeline tests.
//!
//! [`InMemoryBroker`] keeps an append-only log per topic partition and hands
//! out two kinds of handles that share it:
//!
//! - [`InMemoryProducer`]: implements [`PublishTransport`], records every publish call
//! - [`InMemoryConsumer`]: implements [`ConsumeTransport`], reads the log with its own cursors
//!
//! Failures can be injected per operation (connect, publish, subscribe, seek,
//! receive) to exercise the error paths of the producer and consumer.
//!
//! Message streams stay open while the consumer is connected, waiting for new
//! messages. After [`InMemoryBroker::close`] a stream drains what is left and
//! then ends, which lets a test run a consumer to completion.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use appointment_events_core::broker::{
    BrokerError, BrokerFuture, ConsumeTransport, EnvelopeStream, PublishTransport, StartPosition,
};
use appointment_events_core::envelope::{Envelope, Placement, ReceivedEnvelope};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// One recorded call to [`PublishTransport::publish`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishCall {
    /// Topic passed to the call
    pub topic: String,
    /// Envelopes passed to the call, in order
    pub envelopes: Vec<Envelope>,
}

#[derive(Default)]
struct FailurePlan {
    connect: Option<String>,
    publish: Option<String>,
    subscribe: HashSet<String>,
    seek: Option<String>,
    receive: VecDeque<String>,
}

#[derive(Default)]
struct BrokerState {
    log: Vec<ReceivedEnvelope>,
    partition_counts: HashMap<String, i32>,
    next_offsets: HashMap<(String, i32), i64>,
    publish_calls: Vec<PublishCall>,
    failures: FailurePlan,
    closed: bool,
}

impl BrokerState {
    fn partition_count(&self, topic: &str) -> i32 {
        self.partition_counts.get(topic).copied().unwrap_or(1)
    }

    fn partition_for(&self, topic: &str, key: &str) -> i32 {
        let count = self.partition_count(topic);
        if count <= 1 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        i32::try_from(hasher.finish() % u64::from(count.unsigned_abs())).unwrap_or(0)
    }

    fn append(&mut self, topic: &str, partition: i32, envelope: Envelope) -> Placement {
        let next = self
            .next_offsets
            .entry((topic.to_string(), partition))
            .or_insert(0);
        let offset = *next;
        *next += 1;

        self.log.push(ReceivedEnvelope {
            topic: topic.to_string(),
            partition,
            offset,
            envelope,
        });

        Placement { partition, offset }
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// In-memory broker shared by producer and consumer handles.
///
/// # Example
///
/// ```
/// use appointment_events_testing::InMemoryBroker;
/// use appointment_events_core::broker::PublishTransport;
/// use appointment_events_core::envelope::{Envelope, Headers};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// let producer = broker.producer();
///
/// producer.connect().await?;
/// let placements = producer
///     .publish("appointments-created", vec![Envelope::raw("k", b"{}".to_vec(), Headers::new())])
///     .await?;
///
/// assert_eq!(placements[0].offset, 0);
/// assert_eq!(broker.publish_calls().len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Create an empty broker. Every topic has one partition unless
    /// configured otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Give `topic` `count` partitions. Keys are hashed across them.
    #[must_use]
    pub fn with_partitions(self, topic: impl Into<String>, count: i32) -> Self {
        self.state().partition_counts.insert(topic.into(), count.max(1));
        self
    }

    /// A publishing handle.
    #[must_use]
    pub fn producer(&self) -> InMemoryProducer {
        InMemoryProducer {
            shared: Arc::clone(&self.shared),
            connected: Arc::new(Mutex::new(false)),
        }
    }

    /// A consuming handle reading from the earliest message.
    #[must_use]
    pub fn consumer(&self) -> InMemoryConsumer {
        self.consumer_from(StartPosition::Earliest)
    }

    /// A consuming handle with an explicit start position.
    #[must_use]
    pub fn consumer_from(&self, start: StartPosition) -> InMemoryConsumer {
        InMemoryConsumer {
            shared: Arc::clone(&self.shared),
            session: Arc::new(Mutex::new(ConsumerSession::default())),
            start,
        }
    }

    /// Append an envelope directly, bypassing any producer.
    ///
    /// Used to plant malformed payloads or messages on unexpected topics.
    pub fn inject(&self, topic: &str, envelope: Envelope) -> Placement {
        let placement = {
            let mut state = self.state();
            let partition = state.partition_for(topic, &envelope.key);
            state.append(topic, partition, envelope)
        };
        self.shared.notify.notify_waiters();
        placement
    }

    /// Every publish call made through producer handles, in order.
    #[must_use]
    pub fn publish_calls(&self) -> Vec<PublishCall> {
        self.state().publish_calls.clone()
    }

    /// Every message in the log, in append order.
    #[must_use]
    pub fn messages(&self) -> Vec<ReceivedEnvelope> {
        self.state().log.clone()
    }

    /// Messages appended to `topic`, in append order.
    #[must_use]
    pub fn messages_on(&self, topic: &str) -> Vec<ReceivedEnvelope> {
        self.state()
            .log
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    /// Make the next `connect` on any handle fail.
    pub fn fail_next_connect(&self, reason: impl Into<String>) {
        self.state().failures.connect = Some(reason.into());
    }

    /// Make the next publish fail after being recorded.
    pub fn fail_next_publish(&self, reason: impl Into<String>) {
        self.state().failures.publish = Some(reason.into());
    }

    /// Make every subscribe to `topic` fail.
    pub fn fail_subscribe(&self, topic: impl Into<String>) {
        self.state().failures.subscribe.insert(topic.into());
    }

    /// Make the next seek fail.
    pub fn fail_next_seek(&self, reason: impl Into<String>) {
        self.state().failures.seek = Some(reason.into());
    }

    /// Queue a receive error, yielded by the next message stream poll.
    pub fn inject_receive_error(&self, reason: impl Into<String>) {
        self.state().failures.receive.push_back(reason.into());
        self.shared.notify.notify_waiters();
    }

    /// Stop waiting for new messages: open streams drain and then end.
    pub fn close(&self) {
        self.state().closed = true;
        self.shared.notify.notify_waiters();
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.shared.state.lock().unwrap()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn take_connect_failure(shared: &Shared) -> Result<(), BrokerError> {
    match shared.state.lock().unwrap().failures.connect.take() {
        Some(reason) => Err(BrokerError::ConnectionFailed(reason)),
        None => Ok(()),
    }
}

/// Publishing handle of an [`InMemoryBroker`].
#[derive(Clone)]
pub struct InMemoryProducer {
    shared: Arc<Shared>,
    connected: Arc<Mutex<bool>>,
}

impl InMemoryProducer {
    /// Whether the handle has an open session.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }
}

impl PublishTransport for InMemoryProducer {
    fn connect(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            take_connect_failure(&self.shared)?;
            *self.connected.lock().unwrap() = true;
            Ok(())
        })
    }

    fn disconnect(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            *self.connected.lock().unwrap() = false;
            Ok(())
        })
    }

    fn publish(&self, topic: &str, envelopes: Vec<Envelope>) -> BrokerFuture<'_, Vec<Placement>> {
        let topic = topic.to_string();
        Box::pin(async move {
            if !self.is_connected() {
                return Err(BrokerError::NotConnected);
            }

            let placements = {
                let mut state = self.shared.state.lock().unwrap();
                state.publish_calls.push(PublishCall {
                    topic: topic.clone(),
                    envelopes: envelopes.clone(),
                });

                if let Some(reason) = state.failures.publish.take() {
                    return Err(BrokerError::PublishFailed { topic, reason });
                }

                envelopes
                    .into_iter()
                    .map(|envelope| {
                        let partition = state.partition_for(&topic, &envelope.key);
                        state.append(&topic, partition, envelope)
                    })
                    .collect::<Vec<_>>()
            };

            self.shared.notify.notify_waiters();
            Ok(placements)
        })
    }
}

#[derive(Default)]
struct ConsumerSession {
    connected: bool,
    subscriptions: Vec<String>,
    cursors: HashMap<(String, i32), i64>,
}

/// Consuming handle of an [`InMemoryBroker`].
#[derive(Clone)]
pub struct InMemoryConsumer {
    shared: Arc<Shared>,
    session: Arc<Mutex<ConsumerSession>>,
    start: StartPosition,
}

impl InMemoryConsumer {
    /// Whether the handle has an open session.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.lock().unwrap().connected
    }

    /// Next offset this handle will read on `topic`/`partition`.
    #[must_use]
    pub fn position(&self, topic: &str, partition: i32) -> i64 {
        self.session
            .lock()
            .unwrap()
            .cursors
            .get(&(topic.to_string(), partition))
            .copied()
            .unwrap_or(0)
    }
}

enum Next {
    Message(ReceivedEnvelope),
    Failure(BrokerError),
    Wait,
    End,
}

fn next_message(shared: &Shared, session: &Mutex<ConsumerSession>) -> Next {
    let mut state = shared.state.lock().unwrap();
    let mut session = session.lock().unwrap();

    if !session.connected {
        return Next::End;
    }

    if let Some(reason) = state.failures.receive.pop_front() {
        return Next::Failure(BrokerError::Transport(reason));
    }

    let found = state
        .log
        .iter()
        .find(|message| {
            session.subscriptions.contains(&message.topic)
                && message.offset
                    >= session
                        .cursors
                        .get(&(message.topic.clone(), message.partition))
                        .copied()
                        .unwrap_or(0)
        })
        .cloned();

    match found {
        Some(message) => {
            session.cursors.insert(
                (message.topic.clone(), message.partition),
                message.offset + 1,
            );
            Next::Message(message)
        }
        None if state.closed => Next::End,
        None => Next::Wait,
    }
}

impl ConsumeTransport for InMemoryConsumer {
    fn connect(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            take_connect_failure(&self.shared)?;
            self.session.lock().unwrap().connected = true;
            Ok(())
        })
    }

    fn disconnect(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            {
                let mut session = self.session.lock().unwrap();
                session.connected = false;
                session.subscriptions.clear();
            }
            self.shared.notify.notify_waiters();
            Ok(())
        })
    }

    fn subscribe(&self, topic: &str) -> BrokerFuture<'_, ()> {
        let topic = topic.to_string();
        Box::pin(async move {
            let state = self.shared.state.lock().unwrap();
            let mut session = self.session.lock().unwrap();

            if !session.connected {
                return Err(BrokerError::NotConnected);
            }
            if state.failures.subscribe.contains(&topic) {
                return Err(BrokerError::SubscriptionFailed {
                    topic,
                    reason: "injected subscribe failure".to_string(),
                });
            }
            if session.subscriptions.contains(&topic) {
                return Ok(());
            }

            for partition in 0..state.partition_count(&topic) {
                let key = (topic.clone(), partition);
                let start = match self.start {
                    StartPosition::Earliest => 0,
                    StartPosition::Latest => state.next_offsets.get(&key).copied().unwrap_or(0),
                };
                session.cursors.entry(key).or_insert(start);
            }
            session.subscriptions.push(topic);
            Ok(())
        })
    }

    fn subscriptions(&self) -> Vec<String> {
        self.session.lock().unwrap().subscriptions.clone()
    }

    fn messages(&self) -> Result<EnvelopeStream, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }

        let shared = Arc::clone(&self.shared);
        let session = Arc::clone(&self.session);

        let stream = async_stream::stream! {
            loop {
                let notified = shared.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                match next_message(&shared, &session) {
                    Next::Message(message) => yield Ok(message),
                    Next::Failure(error) => yield Err(error),
                    Next::Wait => notified.await,
                    Next::End => break,
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn seek(&self, topic: &str, partition: i32, offset: i64) -> BrokerFuture<'_, ()> {
        let topic = topic.to_string();
        Box::pin(async move {
            let mut state = self.shared.state.lock().unwrap();
            let mut session = self.session.lock().unwrap();

            if let Some(reason) = state.failures.seek.take() {
                return Err(BrokerError::SeekFailed {
                    topic,
                    partition,
                    reason,
                });
            }
            if !session.subscriptions.contains(&topic) || partition >= state.partition_count(&topic)
            {
                return Err(BrokerError::SeekFailed {
                    topic,
                    partition,
                    reason: "partition not assigned".to_string(),
                });
            }

            session.cursors.insert((topic, partition), offset);
            Ok(())
        })
    }

    fn partitions(&self, topic: &str) -> BrokerFuture<'_, Vec<i32>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let count = self.shared.state.lock().unwrap().partition_count(&topic);
            Ok((0..count).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appointment_events_core::envelope::Headers;
    use futures::StreamExt;

    fn envelope(key: &str) -> Envelope {
        Envelope::raw(key, format!(r#"{{"id":"{key}"}}"#).into_bytes(), Headers::new())
    }

    #[tokio::test]
    async fn publish_requires_connection() {
        let broker = InMemoryBroker::new();
        let producer = broker.producer();

        let result = producer.publish("t", vec![envelope("a")]).await;

        assert_eq!(result, Err(BrokerError::NotConnected));
        assert!(broker.publish_calls().is_empty());
    }

    #[tokio::test]
    async fn publish_assigns_sequential_offsets() {
        let broker = InMemoryBroker::new();
        let producer = broker.producer();
        producer.connect().await.unwrap();

        let placements = producer
            .publish("t", vec![envelope("a"), envelope("b")])
            .await
            .unwrap();

        assert_eq!(
            placements,
            vec![
                Placement { partition: 0, offset: 0 },
                Placement { partition: 0, offset: 1 },
            ]
        );
        assert_eq!(broker.publish_calls().len(), 1);
        assert_eq!(broker.messages_on("t").len(), 2);
    }

    #[tokio::test]
    async fn failed_publish_is_recorded_but_not_appended() {
        let broker = InMemoryBroker::new();
        let producer = broker.producer();
        producer.connect().await.unwrap();
        broker.fail_next_publish("leader not available");

        let result = producer.publish("t", vec![envelope("a")]).await;

        assert!(matches!(result, Err(BrokerError::PublishFailed { .. })));
        assert_eq!(broker.publish_calls().len(), 1);
        assert!(broker.messages().is_empty());
    }

    #[tokio::test]
    async fn consumer_reads_subscribed_topics_until_closed() {
        let broker = InMemoryBroker::new();
        broker.inject("a", envelope("1"));
        broker.inject("b", envelope("2"));
        broker.inject("a", envelope("3"));
        broker.close();

        let consumer = broker.consumer();
        consumer.connect().await.unwrap();
        consumer.subscribe("a").await.unwrap();

        let keys: Vec<String> = consumer
            .messages()
            .unwrap()
            .map(|item| item.unwrap().envelope.key)
            .collect()
            .await;

        assert_eq!(keys, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn latest_start_skips_history() {
        let broker = InMemoryBroker::new();
        broker.inject("a", envelope("old"));

        let consumer = broker.consumer_from(StartPosition::Latest);
        consumer.connect().await.unwrap();
        consumer.subscribe("a").await.unwrap();
        broker.inject("a", envelope("new"));
        broker.close();

        let keys: Vec<String> = consumer
            .messages()
            .unwrap()
            .map(|item| item.unwrap().envelope.key)
            .collect()
            .await;

        assert_eq!(keys, vec!["new"]);
    }

    #[tokio::test]
    async fn seek_rewinds_cursor() {
        let broker = InMemoryBroker::new();
        broker.inject("a", envelope("1"));
        broker.close();

        let consumer = broker.consumer();
        consumer.connect().await.unwrap();
        consumer.subscribe("a").await.unwrap();
        let first: Vec<_> = consumer.messages().unwrap().collect().await;
        assert_eq!(first.len(), 1);
        assert_eq!(consumer.position("a", 0), 1);

        consumer.seek("a", 0, 0).await.unwrap();
        let again: Vec<_> = consumer.messages().unwrap().collect().await;
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn seek_on_unassigned_partition_fails() {
        let broker = InMemoryBroker::new();
        let consumer = broker.consumer();
        consumer.connect().await.unwrap();

        let result = consumer.seek("a", 0, 0).await;

        assert!(matches!(result, Err(BrokerError::SeekFailed { .. })));
    }

    #[tokio::test]
    async fn partitioned_topic_spreads_keys() {
        let broker = InMemoryBroker::new().with_partitions("p", 4);
        let consumer = broker.consumer();

        assert_eq!(consumer.partitions("p").await.unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(consumer.partitions("other").await.unwrap(), vec![0]);
    }
}
