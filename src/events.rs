//! Event envelope and wire frames
//!
//! All events follow the "object.action" naming convention and share one flat
//! JSON structure on the wire:
//!
//! ```json
//! {
//!     "id": 42,
//!     "type": "issue.created",
//!     "workspace_id": "uuid",
//!     "project_id": "uuid",
//!     "payload": { ... },
//!     "user_id": "uuid",
//!     "timestamp": "2026-08-29T10:30:00Z"
//! }
//! ```
//!
//! Events are immutable facts. They are created in exactly one place
//! ([`EventBus::broadcast`](crate::bus::EventBus::broadcast)), which assigns
//! the id and timestamp, and destroyed only by eviction from the replay
//! buffer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Event types
///
/// The enum is exhaustive - all events the bus can carry are explicitly
/// listed. Business logic picks a variant; it never invents type strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "issue.created")]
    IssueCreated,
    #[serde(rename = "issue.updated")]
    IssueUpdated,
    #[serde(rename = "issue.deleted")]
    IssueDeleted,

    #[serde(rename = "comment.created")]
    CommentCreated,
    #[serde(rename = "comment.updated")]
    CommentUpdated,
    #[serde(rename = "comment.deleted")]
    CommentDeleted,

    #[serde(rename = "project.created")]
    ProjectCreated,
    #[serde(rename = "project.updated")]
    ProjectUpdated,
    #[serde(rename = "project.deleted")]
    ProjectDeleted,

    /// A user's first live connection to a workspace opened
    #[serde(rename = "member.joined")]
    MemberJoined,
    /// A user's live connection to a workspace closed
    #[serde(rename = "member.left")]
    MemberLeft,
}

impl EventType {
    /// Get event type as string (e.g., "issue.created")
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IssueCreated => "issue.created",
            Self::IssueUpdated => "issue.updated",
            Self::IssueDeleted => "issue.deleted",
            Self::CommentCreated => "comment.created",
            Self::CommentUpdated => "comment.updated",
            Self::CommentDeleted => "comment.deleted",
            Self::ProjectCreated => "project.created",
            Self::ProjectUpdated => "project.updated",
            Self::ProjectDeleted => "project.deleted",
            Self::MemberJoined => "member.joined",
            Self::MemberLeft => "member.left",
        }
    }

    /// Presence events maintain the online-user set rather than announce data
    /// changes; clients route them to their presence mirror, not to event
    /// callbacks.
    pub fn is_presence(&self) -> bool {
        matches!(self, Self::MemberJoined | Self::MemberLeft)
    }
}

/// An immutable event as broadcast to subscribers.
///
/// `id` is a per-bus monotonic sequence number: ids strictly increase in
/// broadcast order within one bus instance, and double as replay cursors.
/// There is no ordering guarantee across bus instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub workspace_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<Uuid>,
    pub payload: Value,
    /// The user whose action caused this event
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// The caller-supplied part of an event, before the bus assigns id and
/// timestamp.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub workspace_id: Uuid,
    pub project_id: Option<Uuid>,
    pub issue_id: Option<Uuid>,
    pub user_id: Uuid,
    pub payload: Value,
}

impl NewEvent {
    pub fn new(event_type: EventType, workspace_id: Uuid, user_id: Uuid) -> Self {
        Self {
            event_type,
            workspace_id,
            project_id: None,
            issue_id: None,
            user_id,
            payload: serde_json::json!({}),
        }
    }

    pub fn with_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_issue(mut self, issue_id: Uuid) -> Self {
        self.issue_id = Some(issue_id);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Presence event for a user joining, carrying the refreshed online list.
    pub fn member_joined(workspace_id: Uuid, user_id: Uuid, online_users: Vec<Uuid>) -> Self {
        Self::new(EventType::MemberJoined, workspace_id, user_id)
            .with_payload(serde_json::json!({ "online_users": online_users }))
    }

    /// Presence event for a user leaving, carrying the refreshed online list.
    pub fn member_left(workspace_id: Uuid, user_id: Uuid, online_users: Vec<Uuid>) -> Self {
        Self::new(EventType::MemberLeft, workspace_id, user_id)
            .with_payload(serde_json::json!({ "online_users": online_users }))
    }
}

/// Bootstrap frame sent once, immediately after a stream opens.
///
/// Carries the connection id and the workspace's current presence list so a
/// client has presence state before any `member.joined` broadcast arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedFrame {
    pub connection_id: Uuid,
    pub workspace_id: Uuid,
    pub online_users: Vec<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl ConnectedFrame {
    /// Wire JSON with the discriminating `type` field.
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "type": "connected",
            "connection_id": self.connection_id,
            "workspace_id": self.workspace_id,
            "online_users": self.online_users,
            "timestamp": self.timestamp,
        })
    }
}

/// One outbound frame on a streaming connection.
///
/// The registry hands these to each connection's transport channel; the
/// stream endpoint encodes them as SSE frames. Heartbeats become comment-only
/// frames (no `data:` line), so they keep intermediary proxies from idling
/// the connection out without ever reaching client event handlers.
#[derive(Debug, Clone)]
pub enum Frame {
    Connected(ConnectedFrame),
    Event(Event),
    Heartbeat,
}
