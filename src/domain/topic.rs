//! Topic names used as event-bus routing keys.
//!
//! [`Topic`] is a newtype around a shared string so that topic keys cannot
//! be confused with entity identifiers or other strings. Topics are never
//! created implicitly by the bus: producers and consumers agree on names
//! out of band, typically through the constants below.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Immutable topic identifier naming a class of event.
///
/// Cloning is cheap (reference-counted string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(Arc<str>);

impl Topic {
    /// Reserved topic published by the storage driver once connectivity is
    /// established. Boot blocks on it before loading any library module.
    pub const DATABASE_CONNECTED: &'static str = "system_database_connected";

    /// Published whenever a judging record changes state.
    pub const RECORD_CHANGE: &'static str = "record_change";

    /// Creates a topic from any string-like value.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The reserved storage-readiness topic.
    #[must_use]
    pub fn database_connected() -> Self {
        Self::new(Self::DATABASE_CONNECTED)
    }

    /// The record-changed topic.
    #[must_use]
    pub fn record_change() -> Self {
        Self::new(Self::RECORD_CHANGE)
    }

    /// Returns the topic name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for names following the `<entity>_changed` (or
    /// `<entity>_change`) convention. Advisory only; the bus does not
    /// enforce it.
    #[must_use]
    pub fn is_entity_change(&self) -> bool {
        self.0.ends_with("_changed") || self.0.ends_with("_change")
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}
