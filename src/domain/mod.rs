//! Domain layer: topics, events, the event bus and readiness signalling.
//!
//! The [`EventBus`] is the only shared mutable structure in the core.
//! Everything else (boot phases, sessions, the entity cache) interacts with
//! it through `subscribe`, `unsubscribe` and `publish`.

pub mod entity_cache;
pub mod event;
pub mod event_bus;
pub mod readiness;
pub mod topic;

pub use entity_cache::{EntityCache, EntitySource};
pub use event::Event;
pub use event_bus::{EventBus, EventHandler, Listener, SubscriberId, TopicStats};
pub use readiness::{GateBridge, ReadinessGate};
pub use topic::Topic;
