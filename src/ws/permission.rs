//! Viewer identity, session contexts and the permission policy sessions
//! consult before subscribing and before forwarding a payload.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::Value;

use crate::domain::event::{GROUP_FIELD, ID_FIELD, OWNER_FIELD, field_key};

/// Header carrying the authenticated user id.
pub const VIEWER_ID_HEADER: &str = "x-viewer-id";
/// Header carrying a comma-separated permission list.
pub const VIEWER_PERMS_HEADER: &str = "x-viewer-perms";

/// Snapshot field with the submitted source code.
const CODE_FIELD: &str = "code";
/// Snapshot field naming the entity kind; only `run` keeps its output.
const KIND_FIELD: &str = "kind";
const OUTPUT_FIELDS: [&str; 2] = ["stdout", "stderr"];

/// The peer on the other end of a session, as asserted by the
/// authenticating proxy in front of the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    /// User id; `None` for anonymous peers.
    pub uid: Option<String>,
    /// May observe hidden groups.
    pub view_hidden: bool,
    /// May read other users' code.
    pub read_code: bool,
}

impl Viewer {
    /// Anonymous viewer with no permissions.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Reads the viewer from [`VIEWER_ID_HEADER`] and
    /// [`VIEWER_PERMS_HEADER`]. Unknown permission names are ignored.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let uid = headers
            .get(VIEWER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ToString::to_string);
        let perms: HashSet<&str> = headers
            .get(VIEWER_PERMS_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|raw| raw.split(',').map(str::trim).collect())
            .unwrap_or_default();
        Self {
            uid,
            view_hidden: perms.contains("view_hidden"),
            read_code: perms.contains("read_code"),
        }
    }

    fn owns(&self, snapshot: &Value) -> bool {
        match (&self.uid, field_key(snapshot, OWNER_FIELD)) {
            (Some(uid), Some(owner)) => *uid == owner,
            _ => false,
        }
    }
}

/// What a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionContext {
    /// Entities of one group. Ungrouped entities always pass; `None` binds
    /// to ungrouped entities only.
    Group(Option<String>),
    /// A single entity.
    Entity(String),
}

impl SessionContext {
    /// Returns `true` if `snapshot` belongs to this context.
    #[must_use]
    pub fn matches(&self, snapshot: &Value) -> bool {
        match self {
            Self::Group(bound) => match field_key(snapshot, GROUP_FIELD) {
                None => true,
                Some(group) => bound.as_deref() == Some(group.as_str()),
            },
            Self::Entity(id) => field_key(snapshot, ID_FIELD).as_deref() == Some(id.as_str()),
        }
    }

    /// Narrows batch identifiers to those this context can possibly match
    /// without fetching the entities.
    #[must_use]
    pub fn narrow(&self, ids: Vec<String>) -> Vec<String> {
        match self {
            Self::Group(_) => ids,
            Self::Entity(bound) => ids.into_iter().filter(|id| id == bound).collect(),
        }
    }
}

impl fmt::Display for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(Some(group)) => write!(f, "group {group}"),
            Self::Group(None) => f.write_str("ungrouped entities"),
            Self::Entity(id) => write!(f, "entity {id}"),
        }
    }
}

/// Visibility and redaction rules applied by sessions.
#[async_trait]
pub trait PermissionPolicy: Send + Sync + fmt::Debug {
    /// Whether `viewer` may observe `context` at all.
    async fn can_view(&self, context: &SessionContext, viewer: &Viewer) -> bool;

    /// Whether `viewer` may observe this particular entity snapshot.
    fn can_see(&self, snapshot: &Value, viewer: &Viewer) -> bool;

    /// Strips what `viewer` must not see from an entity snapshot.
    fn redact(&self, snapshot: Value, viewer: &Viewer) -> Value;
}

/// Default policy.
///
/// - Hidden groups, and entities inside them, require `view_hidden`.
/// - `code` is removed unless the viewer owns the entity or has `read_code`.
/// - `stdout` / `stderr` are blanked unless the entity `kind` is `run`.
#[derive(Debug, Clone, Default)]
pub struct StandardPolicy {
    hidden_groups: HashSet<String>,
}

impl StandardPolicy {
    /// Policy with no hidden groups.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `groups` as hidden.
    #[must_use]
    pub fn with_hidden_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden_groups.extend(groups.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl PermissionPolicy for StandardPolicy {
    async fn can_view(&self, context: &SessionContext, viewer: &Viewer) -> bool {
        match context {
            SessionContext::Group(Some(group)) if self.hidden_groups.contains(group) => {
                viewer.view_hidden
            }
            _ => true,
        }
    }

    fn can_see(&self, snapshot: &Value, viewer: &Viewer) -> bool {
        match field_key(snapshot, GROUP_FIELD) {
            Some(group) if self.hidden_groups.contains(&group) => viewer.view_hidden,
            _ => true,
        }
    }

    fn redact(&self, mut snapshot: Value, viewer: &Viewer) -> Value {
        let keep_code = viewer.read_code || viewer.owns(&snapshot);
        let keep_output = snapshot.get(KIND_FIELD).and_then(Value::as_str) == Some("run");
        if let Some(fields) = snapshot.as_object_mut() {
            if !keep_code {
                fields.remove(CODE_FIELD);
            }
            if !keep_output {
                for field in OUTPUT_FIELDS {
                    if let Some(slot) = fields.get_mut(field) {
                        *slot = Value::String(String::new());
                    }
                }
            }
        }
        snapshot
    }
}
