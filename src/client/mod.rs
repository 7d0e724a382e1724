//! Client reconnection engine
//!
//! Keeps one logical subscription alive across physical reconnects. Each
//! engine instance owns its own connection, replay cursor, backoff state and
//! presence mirror; a dashboard watching several workspaces runs several
//! independent instances with nothing shared between them.
//!
//! State machine: Disconnected -> Connecting -> Connected -> (on transport
//! error) -> Backoff -> Connecting -> ... with terminal Disabled once
//! [`EventStreamClient::close`] is called or the server rejects the
//! credentials. Auth rejections (401/403) are never retried automatically.

pub mod backoff;
pub mod decode;
pub mod presence;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use futures_util::StreamExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::events::{Event, EventType};
pub use backoff::BackoffPolicy;
pub use decode::{ClientFrame, SseDecoder, SseMessage};
pub use presence::PresenceSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
    Disabled,
}

/// Which events reach the caller's event callback.
///
/// Presence events never do - they feed the presence mirror instead.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// None matches every type.
    pub types: Option<Vec<EventType>>,
    /// Project scope; events without a project id always match.
    pub project_id: Option<Uuid>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(types) = &self.types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let (Some(scope), Some(event_project)) = (self.project_id, event.project_id) {
            if scope != event_project {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Server origin, e.g. `http://127.0.0.1:3000`.
    pub base_url: String,
    pub token: String,
    pub workspace_id: Uuid,
    pub filter: EventFilter,
    pub backoff: BackoffPolicy,
}

impl SubscriptionConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, workspace_id: Uuid) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            workspace_id,
            filter: EventFilter::default(),
            backoff: BackoffPolicy::default(),
        }
    }
}

type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;
type StatusCallback = Arc<dyn Fn() + Send + Sync>;

pub struct EventHandlers {
    on_event: EventCallback,
    on_connect: Option<StatusCallback>,
    on_disconnect: Option<StatusCallback>,
}

impl EventHandlers {
    pub fn new(on_event: impl Fn(Event) + Send + Sync + 'static) -> Self {
        Self {
            on_event: Arc::new(on_event),
            on_connect: None,
            on_disconnect: None,
        }
    }

    pub fn on_connect(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    /// Invoked on the first failure of a streak only, so a long outage does
    /// not turn into a notification storm.
    pub fn on_disconnect(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(callback));
        self
    }
}

/// A live subscription to one workspace's event stream.
pub struct EventStreamClient {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventStreamClient {
    /// Open the subscription and start the reconnect loop.
    pub fn connect(config: SubscriptionConfig, handlers: EventHandlers) -> Self {
        let shared = Arc::new(Shared {
            config,
            handlers,
            http: reqwest::Client::new(),
            status: Mutex::new(ConnectionStatus::Disconnected),
            connection_id: Mutex::new(None),
            cursor: Mutex::new(None),
            presence: Mutex::new(PresenceSet::new()),
            attempt: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            resync_requested: AtomicBool::new(false),
            wake: Notify::new(),
        });

        let task = tokio::spawn(run(Arc::clone(&shared)));
        Self {
            shared,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.lock().expect("client status poisoned")
    }

    /// Connection id assigned by the server for the current physical
    /// connection, if one is open.
    pub fn connection_id(&self) -> Option<Uuid> {
        *self
            .shared
            .connection_id
            .lock()
            .expect("connection id poisoned")
    }

    /// Replay cursor: the id of the last event seen on the stream.
    pub fn last_event_id(&self) -> Option<u64> {
        *self.shared.cursor.lock().expect("cursor poisoned")
    }

    /// Local presence mirror for the workspace.
    pub fn online_users(&self) -> Vec<Uuid> {
        self.shared
            .presence
            .lock()
            .expect("presence poisoned")
            .users()
    }

    /// Force a clean resync: drop the cursor and attempt counter, cancel any
    /// pending backoff delay, and reconnect immediately. The next connect
    /// carries no cursor, so the server performs no replay.
    pub fn reconnect(&self) {
        let shared = &self.shared;
        *shared.cursor.lock().expect("cursor poisoned") = None;
        shared.attempt.store(0, Ordering::Relaxed);
        shared.resync_requested.store(true, Ordering::Relaxed);
        shared.wake.notify_one();
    }

    /// Tear the subscription down. Cancels any pending backoff timer and
    /// closes the transport; the engine will not resurrect the connection.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Relaxed);
        self.shared.wake.notify_one();
        if let Some(task) = self.task.lock().expect("client task poisoned").take() {
            task.abort();
        }
        *self.shared.status.lock().expect("client status poisoned") = ConnectionStatus::Disabled;
    }
}

impl Drop for EventStreamClient {
    fn drop(&mut self) {
        self.close();
    }
}

struct Shared {
    config: SubscriptionConfig,
    handlers: EventHandlers,
    http: reqwest::Client,
    status: Mutex<ConnectionStatus>,
    connection_id: Mutex<Option<Uuid>>,
    cursor: Mutex<Option<u64>>,
    presence: Mutex<PresenceSet>,
    attempt: AtomicU32,
    closed: AtomicBool,
    resync_requested: AtomicBool,
    /// Woken by `reconnect` and `close`; interrupts both the read loop and a
    /// pending backoff delay.
    wake: Notify,
}

enum ConnectError {
    /// 401/403: retrying cannot help, the engine disables itself.
    Terminal(StatusCode),
    Transient(String),
}

async fn run(shared: Arc<Shared>) {
    let mut failure_streak = false;

    loop {
        if shared.closed.load(Ordering::Relaxed) {
            break;
        }
        // A pending resync is consumed by the connect attempt below; the flag
        // must never survive into an established connection.
        shared.resync_requested.store(false, Ordering::Relaxed);
        shared.set_status(ConnectionStatus::Connecting);

        match shared.open_stream().await {
            Ok(response) => {
                shared.attempt.store(0, Ordering::Relaxed);
                failure_streak = false;
                shared.set_status(ConnectionStatus::Connected);
                if let Some(callback) = &shared.handlers.on_connect {
                    callback();
                }

                shared.read_stream(response).await;
                *shared
                    .connection_id
                    .lock()
                    .expect("connection id poisoned") = None;
            }
            Err(ConnectError::Terminal(status)) => {
                error!(%status, workspace_id = %shared.config.workspace_id, "subscription rejected, giving up");
                shared.set_status(ConnectionStatus::Disabled);
                return;
            }
            Err(ConnectError::Transient(reason)) => {
                debug!(reason, workspace_id = %shared.config.workspace_id, "stream connect failed");
            }
        }

        if shared.closed.load(Ordering::Relaxed) {
            break;
        }
        if shared.resync_requested.swap(false, Ordering::Relaxed) {
            // Manual reconnect: skip failure handling and the delay
            continue;
        }

        if !failure_streak {
            failure_streak = true;
            if let Some(callback) = &shared.handlers.on_disconnect {
                callback();
            }
        }

        let attempt = shared.attempt.fetch_add(1, Ordering::Relaxed);
        let delay = shared.config.backoff.delay(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
        shared.set_status(ConnectionStatus::Backoff);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shared.wake.notified() => {}
        }
    }

    shared.set_status(ConnectionStatus::Disabled);
}

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().expect("client status poisoned") = status;
    }

    async fn open_stream(&self) -> Result<reqwest::Response, ConnectError> {
        let url = format!(
            "{}/api/v1/workspaces/{}/events",
            self.config.base_url.trim_end_matches('/'),
            self.config.workspace_id,
        );

        let mut request = self
            .http
            .get(&url)
            .bearer_auth(&self.config.token)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(cursor) = *self.cursor.lock().expect("cursor poisoned") {
            request = request.header("Last-Event-ID", cursor.to_string());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ConnectError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ConnectError::Terminal(status));
        }
        if !status.is_success() {
            return Err(ConnectError::Transient(format!("unexpected status {status}")));
        }
        Ok(response)
    }

    /// Pump the open stream until it ends, errors, or a wake interrupts it.
    async fn read_stream(&self, response: reqwest::Response) {
        let mut decoder = SseDecoder::new();
        let mut stream = response.bytes_stream();

        loop {
            tokio::select! {
                _ = self.wake.notified() => return,
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for message in decoder.push(&bytes) {
                            self.handle_message(message);
                        }
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "stream read error");
                        return;
                    }
                    None => {
                        debug!("stream closed by server");
                        return;
                    }
                },
            }
        }
    }

    fn handle_message(&self, message: SseMessage) {
        if let Some(id) = message.id.as_deref().and_then(|s| s.parse::<u64>().ok()) {
            *self.cursor.lock().expect("cursor poisoned") = Some(id);
        }

        match decode::parse_frame(&message.data) {
            Err(e) => {
                // Malformed frames are dropped; the connection stays up
                warn!(error = %e, "dropping malformed frame");
            }
            Ok(ClientFrame::Connected(frame)) => {
                *self
                    .connection_id
                    .lock()
                    .expect("connection id poisoned") = Some(frame.connection_id);
                self.presence
                    .lock()
                    .expect("presence poisoned")
                    .seed(frame.online_users);
            }
            Ok(ClientFrame::Event(event)) => {
                if event.event_type.is_presence() {
                    self.presence
                        .lock()
                        .expect("presence poisoned")
                        .apply(&event);
                } else if self.config.filter.matches(&event) {
                    (self.handlers.on_event)(event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(event_type: EventType, project_id: Option<Uuid>) -> Event {
        Event {
            id: 1,
            event_type,
            workspace_id: Uuid::new_v4(),
            project_id,
            issue_id: None,
            payload: serde_json::json!({}),
            user_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn default_filter_matches_everything() {
        let filter = EventFilter::default();
        assert!(filter.matches(&event(EventType::IssueCreated, None)));
        assert!(filter.matches(&event(EventType::ProjectDeleted, Some(Uuid::new_v4()))));
    }

    #[test]
    fn type_filter_is_exact() {
        let filter = EventFilter {
            types: Some(vec![EventType::IssueCreated, EventType::IssueUpdated]),
            project_id: None,
        };
        assert!(filter.matches(&event(EventType::IssueUpdated, None)));
        assert!(!filter.matches(&event(EventType::CommentCreated, None)));
    }

    #[test]
    fn project_scope_matches_same_project_or_absent() {
        let project = Uuid::new_v4();
        let filter = EventFilter {
            types: None,
            project_id: Some(project),
        };
        assert!(filter.matches(&event(EventType::IssueCreated, Some(project))));
        // Workspace-wide events carry no project id and always match
        assert!(filter.matches(&event(EventType::ProjectUpdated, None)));
        assert!(!filter.matches(&event(EventType::IssueCreated, Some(Uuid::new_v4()))));
    }
}
