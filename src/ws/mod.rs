//! WebSocket layer: connection sessions, permissions and message routing.
//!
//! `/record-conn` and `/record-detail-conn` open a
//! [`ConnectionSession`](session::ConnectionSession) bound to a group or a
//! single entity and push permission-scrubbed entity changes to the peer.

pub mod connection;
pub mod handler;
pub mod messages;
pub mod permission;
pub mod session;

pub use permission::{PermissionPolicy, SessionContext, StandardPolicy, Viewer};
pub use session::{ConnectionSession, Outbound, SessionHub, SessionState};
