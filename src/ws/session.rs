//! Per-peer connection sessions.
//!
//! A [`ConnectionSession`] moves through `Pending → Active → Closed`.
//! [`prepare`](ConnectionSession::prepare) checks the viewer against the
//! [`PermissionPolicy`] and only then subscribes to the bus; the bus handler
//! filters each event by the bound [`SessionContext`], redacts it and hands
//! it to a bounded queue drained by the connection task. The handler checks
//! the session state under the same lock [`cleanup`](ConnectionSession::cleanup)
//! takes, so nothing is queued once cleanup has returned.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::messages::{WsCommand, WsMessage};
use super::permission::{PermissionPolicy, SessionContext, Viewer};
use crate::domain::{EntitySource, Event, EventBus, Listener, SubscriberId, Topic};
use crate::error::{HandlerError, SessionError};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not yet authorized.
    Pending,
    /// Subscribed and forwarding events.
    Active,
    /// Terminal.
    Closed,
}

/// Work queued for the connection task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A rendered message ready to send.
    Message(WsMessage),
    /// A batch notification; the listed entities must be re-fetched and
    /// sent through [`ConnectionSession::refresh`].
    Refetch(Vec<String>),
}

/// Shared dependencies for opening sessions.
#[derive(Clone)]
pub struct SessionHub {
    bus: EventBus,
    policy: Arc<dyn PermissionPolicy>,
    source: Arc<dyn EntitySource>,
    topics: Vec<Topic>,
    capacity: usize,
}

impl SessionHub {
    /// Creates a hub whose sessions subscribe to `topics`.
    #[must_use]
    pub fn new(
        bus: EventBus,
        policy: Arc<dyn PermissionPolicy>,
        source: Arc<dyn EntitySource>,
        topics: Vec<Topic>,
        capacity: usize,
    ) -> Self {
        Self {
            bus,
            policy,
            source,
            topics,
            capacity: capacity.max(1),
        }
    }

    /// Opens a pending session for `viewer` and returns it with the
    /// receiving end of its outbound queue.
    #[must_use]
    pub fn open(&self, viewer: Viewer) -> (ConnectionSession, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let session = ConnectionSession {
            id: SubscriberId::new(),
            viewer,
            hub: self.clone(),
            state: Arc::new(Mutex::new(SessionState::Pending)),
            context: None,
            listener: None,
            tx,
        };
        (session, rx)
    }
}

impl fmt::Debug for SessionHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHub")
            .field("policy", &self.policy)
            .field("topics", &self.topics)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// One live channel to a remote peer.
pub struct ConnectionSession {
    id: SubscriberId,
    viewer: Viewer,
    hub: SessionHub,
    state: Arc<Mutex<SessionState>>,
    context: Option<SessionContext>,
    listener: Option<Listener>,
    tx: mpsc::Sender<Outbound>,
}

impl ConnectionSession {
    /// Subscriber identity of this session on the bus.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bound context, once prepared.
    #[must_use]
    pub fn context(&self) -> Option<&SessionContext> {
        self.context.as_ref()
    }

    /// Authorizes the viewer for `context` and subscribes.
    ///
    /// On success the session is `Active`. An entity-bound session also
    /// queues the entity's current state, if known.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyPrepared`] if the session is not pending.
    /// - [`SessionError::Unauthorized`] if the policy refuses the viewer,
    ///   for the context or for the bound entity's current snapshot; the
    ///   session is then `Closed` and holds no subscription.
    /// - [`SessionError::Fetch`] if the bound entity cannot be looked up;
    ///   the session is then `Closed`.
    pub async fn prepare(&mut self, context: SessionContext) -> Result<(), SessionError> {
        if self.state() != SessionState::Pending {
            return Err(SessionError::AlreadyPrepared);
        }

        let mut allowed = self.hub.policy.can_view(&context, &self.viewer).await;
        if allowed {
            allowed = self
                .entity_visible(&context)
                .await
                .inspect_err(|_| self.set_state(SessionState::Closed))?;
        }
        if !allowed {
            self.set_state(SessionState::Closed);
            tracing::warn!(session = %self.id, %context, uid = ?self.viewer.uid, "unauthorized session");
            return Err(SessionError::Unauthorized(context.to_string()));
        }

        let listener = self.listener_for(context.clone());
        self.set_state(SessionState::Active);
        self.hub.bus.subscribe(&self.hub.topics, self.id, &listener);
        self.listener = Some(listener);
        tracing::debug!(session = %self.id, %context, "session active");

        let initial = match &context {
            SessionContext::Entity(id) => Some(vec![id.clone()]),
            SessionContext::Group(_) => None,
        };
        self.context = Some(context);

        if let Some(ids) = initial {
            for message in self.refresh(&ids).await? {
                self.enqueue(Outbound::Message(message));
            }
        }
        Ok(())
    }

    /// Handles an inbound command and returns the replies to send.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] unless the session is active, or
    /// [`SessionError::Fetch`] if a refresh cannot reach the entity source.
    pub async fn message(
        &self,
        request_id: &str,
        command: WsCommand,
    ) -> Result<Vec<WsMessage>, SessionError> {
        match command {
            WsCommand::Refresh { ids } => self.refresh(&ids).await,
            WsCommand::Ping => {
                self.ensure_active()?;
                Ok(vec![WsMessage::response(
                    request_id,
                    serde_json::json!({ "pong": true }),
                )])
            }
        }
    }

    /// Renders the current state of `ids` that fall inside the bound
    /// context. Unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] unless the session is active, or
    /// [`SessionError::Fetch`] if the entity source fails.
    pub async fn refresh(&self, ids: &[String]) -> Result<Vec<WsMessage>, SessionError> {
        self.ensure_active()?;
        let Some(context) = &self.context else {
            return Err(SessionError::Closed);
        };
        let snapshots = self
            .hub
            .source
            .fetch(ids)
            .await
            .map_err(|e| SessionError::Fetch(e.to_string()))?;
        let topic = self.hub.topics.first();
        Ok(snapshots
            .into_iter()
            .filter(|snapshot| context.matches(snapshot))
            .filter(|snapshot| self.hub.policy.can_see(snapshot, &self.viewer))
            .map(|snapshot| render(topic, snapshot, self.hub.policy.as_ref(), &self.viewer))
            .collect())
    }

    /// Tears the session down: marks it `Closed` and removes its
    /// subscriptions. Only the first call has an effect; returns whether
    /// this call performed the teardown.
    pub fn cleanup(&mut self) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == SessionState::Closed && self.listener.is_none() {
                return false;
            }
            *state = SessionState::Closed;
        }
        if let Some(listener) = self.listener.take() {
            let removed = self.hub.bus.unsubscribe(&self.hub.topics, self.id, &listener);
            tracing::debug!(session = %self.id, removed, "session closed");
        }
        true
    }

    async fn entity_visible(&self, context: &SessionContext) -> Result<bool, SessionError> {
        let SessionContext::Entity(id) = context else {
            return Ok(true);
        };
        let snapshots = self
            .hub
            .source
            .fetch(std::slice::from_ref(id))
            .await
            .map_err(|e| SessionError::Fetch(e.to_string()))?;
        Ok(snapshots
            .iter()
            .all(|snapshot| self.hub.policy.can_see(snapshot, &self.viewer)))
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.state() == SessionState::Active {
            Ok(())
        } else {
            Err(SessionError::Closed)
        }
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn enqueue(&self, item: Outbound) {
        if let Err(err) = self.tx.try_send(item) {
            tracing::warn!(session = %self.id, error = %err, "dropping outbound message");
        }
    }

    fn listener_for(&self, context: SessionContext) -> Listener {
        let state = Arc::clone(&self.state);
        let policy = Arc::clone(&self.hub.policy);
        let viewer = self.viewer.clone();
        let tx = self.tx.clone();
        Arc::new(move |event: &Event| {
            let item = match event.value() {
                Some(snapshot) if context.matches(snapshot) && policy.can_see(snapshot, &viewer) => {
                    Outbound::Message(render(
                        Some(&event.topic),
                        snapshot.clone(),
                        policy.as_ref(),
                        &viewer,
                    ))
                }
                Some(_) => return Ok(()),
                None => {
                    let ids = context.narrow(event.ids());
                    if ids.is_empty() {
                        return Ok(());
                    }
                    Outbound::Refetch(ids)
                }
            };

            let state = state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != SessionState::Active {
                return Ok(());
            }
            tx.try_send(item).map_err(|err| match err {
                TrySendError::Full(_) => HandlerError::QueueFull,
                TrySendError::Closed(_) => HandlerError::Closed,
            })
        })
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("id", &self.id)
            .field("viewer", &self.viewer)
            .field("state", &self.state())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

fn render(
    topic: Option<&Topic>,
    snapshot: Value,
    policy: &dyn PermissionPolicy,
    viewer: &Viewer,
) -> WsMessage {
    WsMessage::event(serde_json::json!({
        "topic": topic,
        "value": policy.redact(snapshot, viewer),
    }))
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::domain::EntityCache;
    use crate::ws::permission::StandardPolicy;
    use serde_json::json;

    fn hub(bus: &EventBus, cache: Arc<EntityCache>, policy: StandardPolicy) -> SessionHub {
        SessionHub::new(
            bus.clone(),
            Arc::new(policy),
            cache,
            vec![Topic::record_change()],
            16,
        )
    }

    fn publish(bus: &EventBus, snapshot: Value) -> usize {
        bus.emit(&Event::changed(Topic::record_change(), snapshot))
    }

    #[tokio::test]
    async fn unauthorized_prepare_closes_without_subscribing() {
        let bus = EventBus::new();
        let policy = StandardPolicy::new().with_hidden_groups(["secret"]);
        let (mut session, _rx) = hub(&bus, Arc::new(EntityCache::new()), policy).open(Viewer::anonymous());

        let result = session
            .prepare(SessionContext::Group(Some("secret".to_string())))
            .await;
        assert!(matches!(result, Err(SessionError::Unauthorized(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(bus.subscriber_count(&Topic::record_change()), 0);
    }

    #[tokio::test]
    async fn entity_in_hidden_group_is_refused() {
        let bus = EventBus::new();
        let cache = Arc::new(EntityCache::new());
        cache.upsert(json!({ "id": "r1", "group": "secret", "status": 1 }));
        let policy = StandardPolicy::new().with_hidden_groups(["secret"]);
        let (mut session, mut rx) = hub(&bus, cache, policy).open(Viewer::anonymous());

        let result = session.prepare(SessionContext::Entity("r1".to_string())).await;
        assert!(matches!(result, Err(SessionError::Unauthorized(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(bus.subscriber_count(&Topic::record_change()), 0);

        publish(&bus, json!({ "id": "r1", "group": "secret", "status": 2 }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn entity_moved_into_hidden_group_stops_updates() {
        let bus = EventBus::new();
        let cache = Arc::new(EntityCache::new());
        cache.upsert(json!({ "id": "r1", "status": 1 }));
        let policy = StandardPolicy::new().with_hidden_groups(["secret"]);
        let (mut session, mut rx) = hub(&bus, Arc::clone(&cache), policy).open(Viewer::anonymous());
        assert!(session.prepare(SessionContext::Entity("r1".to_string())).await.is_ok());
        assert!(matches!(rx.try_recv(), Ok(Outbound::Message(_))));

        publish(&bus, json!({ "id": "r1", "group": "secret", "status": 2 }));
        assert!(rx.try_recv().is_err());

        cache.upsert(json!({ "id": "r1", "group": "secret", "status": 2 }));
        let Ok(replies) = session.refresh(&["r1".to_string()]).await else {
            panic!("refresh failed");
        };
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn prepare_twice_is_rejected() {
        let bus = EventBus::new();
        let (mut session, _rx) =
            hub(&bus, Arc::new(EntityCache::new()), StandardPolicy::new()).open(Viewer::anonymous());
        assert!(session.prepare(SessionContext::Group(None)).await.is_ok());
        assert!(matches!(
            session.prepare(SessionContext::Group(None)).await,
            Err(SessionError::AlreadyPrepared)
        ));
    }

    #[tokio::test]
    async fn events_outside_context_are_filtered() {
        let bus = EventBus::new();
        let (mut session, mut rx) =
            hub(&bus, Arc::new(EntityCache::new()), StandardPolicy::new()).open(Viewer::anonymous());
        assert!(session.prepare(SessionContext::Group(Some("c1".to_string()))).await.is_ok());

        publish(&bus, json!({ "id": "r1", "group": "c2" }));
        assert!(rx.try_recv().is_err());

        publish(&bus, json!({ "id": "r2", "group": "c1", "code": "secret" }));
        let Ok(Outbound::Message(msg)) = rx.try_recv() else {
            panic!("expected a message");
        };
        assert_eq!(msg.payload["value"]["id"], "r2");
        assert!(msg.payload["value"].get("code").is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cleanup_stops_delivery_and_is_idempotent() {
        let bus = EventBus::new();
        let (mut session, mut rx) =
            hub(&bus, Arc::new(EntityCache::new()), StandardPolicy::new()).open(Viewer::anonymous());
        assert!(session.prepare(SessionContext::Group(None)).await.is_ok());
        assert_eq!(bus.subscriber_count(&Topic::record_change()), 1);

        assert!(session.cleanup());
        assert!(!session.cleanup());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(publish(&bus, json!({ "id": "r1" })), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drop_unsubscribes() {
        let bus = EventBus::new();
        {
            let (mut session, _rx) =
                hub(&bus, Arc::new(EntityCache::new()), StandardPolicy::new()).open(Viewer::anonymous());
            assert!(session.prepare(SessionContext::Group(None)).await.is_ok());
            assert_eq!(bus.subscriber_count(&Topic::record_change()), 1);
        }
        assert_eq!(bus.subscriber_count(&Topic::record_change()), 0);
    }

    #[tokio::test]
    async fn entity_session_pushes_current_state_on_prepare() {
        let bus = EventBus::new();
        let cache = Arc::new(EntityCache::new());
        cache.upsert(json!({ "id": "r9", "status": 1 }));
        let (mut session, mut rx) = hub(&bus, cache, StandardPolicy::new()).open(Viewer::anonymous());

        assert!(session.prepare(SessionContext::Entity("r9".to_string())).await.is_ok());
        let Ok(Outbound::Message(msg)) = rx.try_recv() else {
            panic!("expected initial push");
        };
        assert_eq!(msg.payload["value"]["status"], 1);

        publish(&bus, json!({ "id": "other" }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn batch_notifications_become_refetch_requests() {
        let bus = EventBus::new();
        let (mut session, mut rx) =
            hub(&bus, Arc::new(EntityCache::new()), StandardPolicy::new()).open(Viewer::anonymous());
        assert!(session.prepare(SessionContext::Entity("b".to_string())).await.is_ok());

        let ids = vec!["a".to_string(), "b".to_string()];
        bus.emit(&Event::batch(Topic::record_change(), &ids));
        let Ok(Outbound::Refetch(wanted)) = rx.try_recv() else {
            panic!("expected refetch");
        };
        assert_eq!(wanted, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn refresh_filters_by_context() {
        let bus = EventBus::new();
        let cache = Arc::new(EntityCache::new());
        cache.upsert(json!({ "id": "a", "group": "c1" }));
        cache.upsert(json!({ "id": "b", "group": "c2" }));
        let (mut session, _rx) = hub(&bus, cache, StandardPolicy::new()).open(Viewer::anonymous());
        assert!(session.prepare(SessionContext::Group(Some("c1".to_string()))).await.is_ok());

        let ids = vec!["a".to_string(), "b".to_string(), "missing".to_string()];
        let Ok(replies) = session.message("req", WsCommand::Refresh { ids }).await else {
            panic!("refresh failed");
        };
        assert_eq!(replies.len(), 1);
        assert_eq!(replies.first().map(|m| m.payload["value"]["id"].clone()), Some(json!("a")));
    }

    #[tokio::test]
    async fn pending_session_rejects_commands() {
        let bus = EventBus::new();
        let (session, _rx) =
            hub(&bus, Arc::new(EntityCache::new()), StandardPolicy::new()).open(Viewer::anonymous());
        assert!(matches!(
            session.message("p", WsCommand::Ping).await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test]
    async fn full_queue_is_reported_to_the_bus() {
        let bus = EventBus::new();
        let hub = SessionHub::new(
            bus.clone(),
            Arc::new(StandardPolicy::new()),
            Arc::new(EntityCache::new()),
            vec![Topic::record_change()],
            1,
        );
        let (mut session, _rx) = hub.open(Viewer::anonymous());
        assert!(session.prepare(SessionContext::Group(None)).await.is_ok());

        publish(&bus, json!({ "id": "1" }));
        publish(&bus, json!({ "id": "2" }));
        assert_eq!(bus.handler_failures(), 1);
    }
}
