//! Topic-keyed publish/subscribe registry.
//!
//! [`EventBus`] keeps a table of subscriptions per [`Topic`]. Mutation
//! (`subscribe` / `unsubscribe`) takes the write lock; `publish` takes the
//! read lock only long enough to clone the subscriber list for the topic and
//! then invokes handlers with no lock held. Handlers may therefore re-enter
//! the bus (subscribe, unsubscribe, publish) without deadlocking, and a
//! mutation that races with a publish never disturbs the in-flight delivery.
//!
//! Delivery is synchronous, at-most-once per registered handler per publish,
//! with no buffering: a publish with zero subscribers is dropped. Handlers
//! run on the publisher's task and must not block; sessions hand events to
//! their own queue and do the slow work elsewhere.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;

use super::{Event, Topic};
use crate::error::HandlerError;

/// Identity of a subscriber (one per session, cache, gate bridge, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SubscriberId(uuid::Uuid);

impl SubscriberId {
    /// Creates a new random subscriber id.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback invoked for every event published on a subscribed topic.
///
/// Implemented for plain closures, so most subscribers are written as
/// `Arc::new(|event: &Event| { ...; Ok(()) })`.
pub trait EventHandler: Send + Sync {
    /// Handles one event.
    ///
    /// # Errors
    ///
    /// Any error is logged by the bus and otherwise ignored; it never
    /// reaches the publisher or other subscribers.
    fn on_event(&self, event: &Event) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync,
{
    fn on_event(&self, event: &Event) -> Result<(), HandlerError> {
        self(event)
    }
}

/// Shared handler reference. Its allocation address is part of the
/// subscription identity.
pub type Listener = Arc<dyn EventHandler>;

#[derive(Clone)]
struct Subscription {
    subscriber: SubscriberId,
    handler: Listener,
}

impl Subscription {
    fn is(&self, subscriber: SubscriberId, handler: &Listener) -> bool {
        self.subscriber == subscriber
            && std::ptr::addr_eq(Arc::as_ptr(&self.handler), Arc::as_ptr(handler))
    }
}

type SubscriberTable = HashMap<Topic, Vec<Subscription>>;

struct BusInner {
    table: RwLock<SubscriberTable>,
    published: AtomicU64,
    handler_failures: AtomicU64,
}

/// Per-topic subscriber count, as reported by [`EventBus::topics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct TopicStats {
    /// Topic name.
    #[schema(value_type = String)]
    pub topic: Topic,
    /// Number of live subscriptions on the topic.
    pub subscribers: usize,
}

/// Process-wide event bus. Cloning yields another handle to the same table.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                table: RwLock::new(HashMap::new()),
                published: AtomicU64::new(0),
                handler_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Registers `handler` under `subscriber` for each of `topics`.
    ///
    /// Takes effect for publishes issued after this call returns. A topic
    /// on which the same `(subscriber, handler)` pair is already registered
    /// is left untouched, so a pair is delivered to at most once per publish.
    pub fn subscribe(&self, topics: &[Topic], subscriber: SubscriberId, handler: &Listener) {
        let mut table = self
            .inner
            .table
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for topic in topics {
            let subs = table.entry(topic.clone()).or_default();
            if subs.iter().any(|s| s.is(subscriber, handler)) {
                continue;
            }
            subs.push(Subscription {
                subscriber,
                handler: Arc::clone(handler),
            });
        }
        drop(table);
        tracing::debug!(%subscriber, topics = ?topics, "subscribed");
    }

    /// Removes the `(subscriber, handler)` registration from each of
    /// `topics`. Absent registrations are ignored, so repeated calls are
    /// harmless.
    ///
    /// Returns the number of registrations actually removed.
    pub fn unsubscribe(
        &self,
        topics: &[Topic],
        subscriber: SubscriberId,
        handler: &Listener,
    ) -> usize {
        let mut removed = 0;
        let mut table = self
            .inner
            .table
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for topic in topics {
            let Some(subs) = table.get_mut(topic) else {
                continue;
            };
            let before = subs.len();
            subs.retain(|s| !s.is(subscriber, handler));
            removed += before - subs.len();
            if subs.is_empty() {
                table.remove(topic);
            }
        }
        drop(table);
        if removed > 0 {
            tracing::debug!(%subscriber, topics = ?topics, removed, "unsubscribed");
        }
        removed
    }

    /// Publishes `payload` on `topic`.
    ///
    /// Returns the number of handlers that completed without error.
    pub fn publish(&self, topic: Topic, payload: Value) -> usize {
        self.emit(&Event::new(topic, payload))
    }

    /// Delivers a prepared event to a snapshot of the topic's subscribers,
    /// in registration order.
    ///
    /// A handler that returns an error or panics is logged and skipped;
    /// delivery to the remaining handlers continues.
    pub fn emit(&self, event: &Event) -> usize {
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let snapshot = {
            let table = self
                .inner
                .table
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            table.get(&event.topic).cloned().unwrap_or_default()
        };

        if snapshot.is_empty() {
            tracing::trace!(topic = %event.topic, "event dropped (no subscribers)");
            return 0;
        }

        let mut delivered = 0;
        for sub in &snapshot {
            match catch_unwind(AssertUnwindSafe(|| sub.handler.on_event(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    self.inner.handler_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        topic = %event.topic,
                        subscriber = %sub.subscriber,
                        error = %err,
                        "event handler failed"
                    );
                }
                Err(panic) => {
                    self.inner.handler_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        topic = %event.topic,
                        subscriber = %sub.subscriber,
                        panic = %panic_message(panic.as_ref()),
                        "event handler panicked"
                    );
                }
            }
        }
        delivered
    }

    /// Number of subscriptions currently registered on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Topics with at least one subscriber, sorted by name.
    #[must_use]
    pub fn topics(&self) -> Vec<TopicStats> {
        let table = self
            .inner
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut stats: Vec<TopicStats> = table
            .iter()
            .map(|(topic, subs)| TopicStats {
                topic: topic.clone(),
                subscribers: subs.len(),
            })
            .collect();
        stats.sort_by(|a, b| a.topic.cmp(&b.topic));
        stats
    }

    /// Total number of publish calls since the bus was created.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Total number of handler invocations that failed or panicked.
    #[must_use]
    pub fn handler_failures(&self) -> u64 {
        self.inner.handler_failures.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.topics().len())
            .field("published", &self.published())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
