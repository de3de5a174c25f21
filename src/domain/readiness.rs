//! One-shot readiness signal.
//!
//! [`ReadinessGate`] moves from waiting to fired exactly once. Waiters
//! suspend on a [`tokio::sync::watch`] channel rather than polling, and a
//! waiter that arrives after the gate fired returns immediately. Further
//! `fire` calls are no-ops.
//!
//! The gate can be fed from the bus with [`ReadinessGate::bridge`], which
//! subscribes a listener that fires the gate when the readiness topic is
//! published. The bridge unsubscribes itself when dropped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::{Event, EventBus, Listener, SubscriberId, Topic};
use crate::error::BootError;

/// One-shot signal with states waiting and fired.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadinessGate {
    /// Creates a gate in the waiting state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fires the gate. Returns `true` only for the call that performed the
    /// waiting-to-fired transition.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    /// Returns `true` once the gate has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Suspends until the gate fires.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::ReadinessAborted`] if the channel closes first,
    /// which cannot happen while this gate handle is alive.
    pub async fn wait(&self) -> Result<(), BootError> {
        let mut rx = self.tx.subscribe();
        rx.wait_for(|fired| *fired)
            .await
            .map(|_| ())
            .map_err(|_| BootError::ReadinessAborted)
    }

    /// Like [`wait`](Self::wait), bounded by `limit` when one is given.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::ReadinessTimeout`] when the bound elapses first.
    pub async fn wait_timeout(&self, limit: Option<Duration>) -> Result<(), BootError> {
        match limit {
            None => self.wait().await,
            Some(limit) => tokio::time::timeout(limit, self.wait())
                .await
                .map_err(|_| BootError::ReadinessTimeout(limit))?,
        }
    }

    /// Subscribes a listener on `topic` that fires this gate.
    #[must_use]
    pub fn bridge(&self, bus: &EventBus, topic: Topic) -> GateBridge {
        let gate = self.clone();
        let listener: Listener = Arc::new(move |event: &Event| {
            if gate.fire() {
                tracing::info!(topic = %event.topic, "readiness signal received");
            } else {
                tracing::debug!(topic = %event.topic, "readiness already signalled, ignoring");
            }
            Ok(())
        });
        let subscriber = SubscriberId::new();
        bus.subscribe(std::slice::from_ref(&topic), subscriber, &listener);
        GateBridge {
            bus: bus.clone(),
            topic,
            subscriber,
            listener,
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Bus subscription feeding a [`ReadinessGate`]. Unsubscribes on drop.
pub struct GateBridge {
    bus: EventBus,
    topic: Topic,
    subscriber: SubscriberId,
    listener: Listener,
}

impl GateBridge {
    /// Removes the bridge's subscription now.
    pub fn detach(self) {
        drop(self);
    }
}

impl Drop for GateBridge {
    fn drop(&mut self) {
        self.bus.unsubscribe(
            std::slice::from_ref(&self.topic),
            self.subscriber,
            &self.listener,
        );
    }
}

impl fmt::Debug for GateBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateBridge")
            .field("topic", &self.topic)
            .field("subscriber", &self.subscriber)
            .finish_non_exhaustive()
    }
}
