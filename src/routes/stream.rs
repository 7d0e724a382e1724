//! SSE stream endpoint
//!
//! Bridges an authenticated, workspace-authorized request into a registered
//! connection plus an initial catch-up replay, then leaves the transport to
//! the bus for the rest of its life.
//!
//! Ordering matters: the connection is registered *before* replay is read, so
//! an event landing between the two is caught by the live channel. The client
//! may consequently see an event twice across the replay/live boundary and
//! must apply idempotently; it can never see a gap.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, Sse};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::warn;
use uuid::Uuid;

use crate::auth::bearer_token;
use crate::bus::{Connection, EventBus};
use crate::error::{AppError, AppResult};
use crate::events::{ConnectedFrame, Frame, NewEvent};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    /// Replay cursor; the standard `Last-Event-ID` header works too.
    pub last_event_id: Option<u64>,
}

pub async fn stream_handler(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> AppResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let token = bearer_token(&headers).ok_or(AppError::Unauthorized)?;
    let user_id = state
        .directory
        .authenticate(token)
        .await
        .ok_or(AppError::Unauthorized)?;
    if !state.directory.is_member(user_id, workspace_id).await {
        return Err(AppError::Forbidden);
    }

    let cursor = match params.last_event_id {
        Some(id) => Some(id),
        None => last_event_id_header(&headers)?,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let connection = Connection::new(user_id, workspace_id, tx.clone());
    let connection_id = connection.id;

    // Queue the bootstrap frame before the bus can reach this sender, so
    // nothing ever precedes `connected` on the wire. The online list counts
    // this user even though the connection is not registered yet.
    let mut online_users = state.bus.online_users(workspace_id);
    if !online_users.contains(&user_id) {
        online_users.push(user_id);
        online_users.sort_unstable();
    }
    let _ = tx.send(Frame::Connected(ConnectedFrame {
        connection_id,
        workspace_id,
        online_users,
        timestamp: Utc::now(),
    }));

    // Register before replay so no event can fall between replay and live
    // delivery.
    state.bus.add_connection(connection);

    if let Some(after_id) = cursor {
        for event in state.bus.events_since(workspace_id, after_id) {
            let _ = tx.send(Frame::Event(event));
        }
    }

    state.bus.broadcast(NewEvent::member_joined(
        workspace_id,
        user_id,
        state.bus.online_users(workspace_id),
    ));

    // Dropped together with the response body when the client goes away.
    let guard = DisconnectGuard {
        bus: Arc::clone(&state.bus),
        connection_id,
        workspace_id,
        user_id,
    };

    let stream = UnboundedReceiverStream::new(rx).map(move |frame| {
        let _ = &guard;
        Ok(encode_frame(frame))
    });

    Ok(Sse::new(stream))
}

fn last_event_id_header(headers: &HeaderMap) -> AppResult<Option<u64>> {
    match headers.get("last-event-id") {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Some)
            .ok_or_else(|| AppError::BadRequest("invalid Last-Event-ID".into())),
    }
}

fn encode_frame(frame: Frame) -> SseEvent {
    match frame {
        Frame::Heartbeat => SseEvent::default().comment("keepalive"),
        Frame::Connected(connected) => match serde_json::to_string(&connected.to_wire()) {
            Ok(data) => SseEvent::default().data(data),
            Err(e) => {
                warn!(error = %e, "failed to encode connected frame");
                SseEvent::default().comment("encode-error")
            }
        },
        Frame::Event(event) => match serde_json::to_string(&event) {
            Ok(data) => SseEvent::default().id(event.id.to_string()).data(data),
            Err(e) => {
                warn!(error = %e, event_id = event.id, "failed to encode event");
                SseEvent::default().comment("encode-error")
            }
        },
    }
}

/// Cleans up after a connection when its response stream is dropped: remove
/// from the registry (idempotent against bus-side pruning) and announce the
/// departure with a refreshed online list.
struct DisconnectGuard {
    bus: Arc<EventBus>,
    connection_id: Uuid,
    workspace_id: Uuid,
    user_id: Uuid,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.bus.remove_connection(self.connection_id);
        self.bus.broadcast(NewEvent::member_left(
            self.workspace_id,
            self.user_id,
            self.bus.online_users(self.workspace_id),
        ));
    }
}
