//! In-process event bus
//!
//! One bus instance per process owns the connection registry and the replay
//! buffer, and runs the heartbeat timer. Business logic calls
//! [`EventBus::broadcast`] fire-and-forget; the stream endpoint registers
//! connections and queries replay/presence. There is no cross-process
//! coordination - scaling beyond one process means swapping the fan-out path
//! for a shared pub/sub transport, which is out of scope here.
//!
//! The bus is explicitly constructed and injected (no global singleton), and
//! carries its own lifecycle: [`EventBus::start`] spawns the heartbeat task,
//! [`EventBus::stop`] aborts it. Tests run isolated bus instances.

pub mod registry;
pub mod replay;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::{Event, Frame, NewEvent};
pub use registry::{Connection, ConnectionRegistry};
pub use replay::ReplayBuffer;

pub struct EventBus {
    registry: ConnectionRegistry,
    buffer: Mutex<ReplayBuffer>,
    next_id: AtomicU64,
    heartbeat_interval: Duration,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    pub fn new(replay_capacity: usize, heartbeat_interval: Duration) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            buffer: Mutex::new(ReplayBuffer::new(replay_capacity)),
            next_id: AtomicU64::new(1),
            heartbeat_interval,
            heartbeat: Mutex::new(None),
        }
    }

    /// Start the heartbeat timer. Idempotent; the second call is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.heartbeat.lock().expect("heartbeat handle poisoned");
        if guard.is_some() {
            return;
        }

        let bus = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(bus.heartbeat_interval);
            // The immediate first tick is pointless as a keepalive
            interval.tick().await;
            loop {
                interval.tick().await;
                bus.heartbeat();
            }
        });
        *guard = Some(handle);
        info!(interval_secs = self.heartbeat_interval.as_secs(), "event bus started");
    }

    /// Stop the heartbeat timer. Safe to call without a prior `start`.
    pub fn stop(&self) {
        if let Some(handle) = self
            .heartbeat
            .lock()
            .expect("heartbeat handle poisoned")
            .take()
        {
            handle.abort();
            info!("event bus stopped");
        }
    }

    /// Assign id and timestamp, record the event in the replay buffer, and
    /// fan it out to every live connection in its workspace.
    ///
    /// Delivery is best-effort: a dead connection is removed from the
    /// registry as a side effect and never aborts delivery to the others.
    /// The connection snapshot is taken under the registry lock; sends happen
    /// outside it.
    pub fn broadcast(&self, new_event: NewEvent) -> Event {
        let event = Event {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            event_type: new_event.event_type,
            workspace_id: new_event.workspace_id,
            project_id: new_event.project_id,
            issue_id: new_event.issue_id,
            payload: new_event.payload,
            user_id: new_event.user_id,
            timestamp: Utc::now(),
        };

        self.buffer
            .lock()
            .expect("replay buffer poisoned")
            .push(event.clone());

        let targets = self.registry.connections_for(event.workspace_id);
        self.deliver(targets, Frame::Event(event.clone()));
        event
    }

    /// Buffered events for a workspace newer than the cursor, oldest first.
    ///
    /// Best-effort: the buffer is global, so other-workspace traffic may have
    /// evicted older entries. Callers must not treat this as authoritative
    /// history.
    pub fn events_since(&self, workspace_id: Uuid, after_id: u64) -> Vec<Event> {
        self.buffer
            .lock()
            .expect("replay buffer poisoned")
            .events_since(workspace_id, after_id)
    }

    /// Distinct users with at least one live connection in the workspace.
    pub fn online_users(&self, workspace_id: Uuid) -> Vec<Uuid> {
        self.registry.users_for(workspace_id)
    }

    pub fn add_connection(&self, connection: Connection) {
        debug!(
            connection_id = %connection.id,
            workspace_id = %connection.workspace_id,
            user_id = %connection.user_id,
            "connection opened"
        );
        self.registry.add(connection);
    }

    /// Idempotent; returns whether the connection was still registered.
    pub fn remove_connection(&self, connection_id: Uuid) -> bool {
        let removed = self.registry.remove(connection_id);
        if removed {
            debug!(connection_id = %connection_id, "connection closed");
        }
        removed
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Send a comment-only keepalive frame to every live connection.
    ///
    /// Defeats idle-timeout behavior of intermediary proxies. Dead peers are
    /// pruned exactly as in `broadcast`.
    fn heartbeat(&self) {
        let targets = self.registry.connections();
        self.deliver(targets, Frame::Heartbeat);
    }

    fn deliver(&self, targets: Vec<Connection>, frame: Frame) {
        let mut dead = Vec::new();
        for connection in &targets {
            if connection.sender.send(frame.clone()).is_err() {
                dead.push(connection.id);
            }
        }
        for connection_id in dead {
            if self.registry.remove(connection_id) {
                debug!(connection_id = %connection_id, "pruned dead connection");
            }
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn bus() -> EventBus {
        EventBus::new(100, Duration::from_secs(30))
    }

    fn subscribe(bus: &EventBus, workspace_id: Uuid, user_id: Uuid) -> (Uuid, UnboundedReceiver<Frame>) {
        let (tx, rx) = unbounded_channel();
        let connection = Connection::new(user_id, workspace_id, tx);
        let id = connection.id;
        bus.add_connection(connection);
        (id, rx)
    }

    fn received_event(rx: &mut UnboundedReceiver<Frame>) -> Option<Event> {
        match rx.try_recv() {
            Ok(Frame::Event(event)) => Some(event),
            _ => None,
        }
    }

    #[test]
    fn broadcast_survives_dead_connections_and_prunes_them() {
        let bus = bus();
        let workspace = Uuid::new_v4();

        let (_, mut live_a) = subscribe(&bus, workspace, Uuid::new_v4());
        let (_, mut live_b) = subscribe(&bus, workspace, Uuid::new_v4());
        let (dead_id, dead_rx) = subscribe(&bus, workspace, Uuid::new_v4());
        drop(dead_rx);

        bus.broadcast(NewEvent::new(EventType::IssueCreated, workspace, Uuid::new_v4()));

        assert!(received_event(&mut live_a).is_some());
        assert!(received_event(&mut live_b).is_some());
        assert_eq!(bus.connection_count(), 2);
        assert!(!bus.remove_connection(dead_id), "dead peer already pruned");
    }

    #[test]
    fn broadcast_never_crosses_workspaces() {
        let bus = bus();
        let workspace_a = Uuid::new_v4();
        let workspace_b = Uuid::new_v4();

        let (_, mut rx_a) = subscribe(&bus, workspace_a, Uuid::new_v4());
        let (_, mut rx_b) = subscribe(&bus, workspace_b, Uuid::new_v4());

        bus.broadcast(NewEvent::new(EventType::CommentCreated, workspace_a, Uuid::new_v4()));

        let event = received_event(&mut rx_a).expect("workspace A delivery");
        assert_eq!(event.workspace_id, workspace_a);
        assert!(received_event(&mut rx_b).is_none());
    }

    #[test]
    fn event_ids_are_strictly_increasing() {
        let bus = bus();
        let workspace = Uuid::new_v4();
        let user = Uuid::new_v4();

        let first = bus.broadcast(NewEvent::new(EventType::IssueCreated, workspace, user));
        let second = bus.broadcast(NewEvent::new(EventType::IssueUpdated, workspace, user));
        let third = bus.broadcast(NewEvent::new(EventType::IssueDeleted, workspace, user));

        assert!(first.id < second.id);
        assert!(second.id < third.id);
    }

    #[test]
    fn replay_window_is_capped_at_the_most_recent_events() {
        let bus = EventBus::new(100, Duration::from_secs(30));
        let workspace = Uuid::new_v4();
        let user = Uuid::new_v4();

        for _ in 0..105 {
            bus.broadcast(NewEvent::new(EventType::IssueUpdated, workspace, user));
        }

        let replayed = bus.events_since(workspace, 0);
        assert_eq!(replayed.len(), 100);
        // The most recent 100 by id, oldest first
        assert_eq!(replayed.first().map(|e| e.id), Some(6));
        assert_eq!(replayed.last().map(|e| e.id), Some(105));
        assert!(replayed.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn events_since_returns_events_after_the_cursor_only() {
        let bus = EventBus::new(3, Duration::from_secs(30));
        let workspace = Uuid::new_v4();
        let user = Uuid::new_v4();

        let e1 = bus.broadcast(NewEvent::new(EventType::IssueCreated, workspace, user));
        let e2 = bus.broadcast(NewEvent::new(EventType::IssueUpdated, workspace, user));
        let e3 = bus.broadcast(NewEvent::new(EventType::CommentCreated, workspace, user));
        let e4 = bus.broadcast(NewEvent::new(EventType::IssueDeleted, workspace, user));

        // Capacity 3: e1 was evicted, but the cursor still filters correctly
        let ids: Vec<u64> = bus
            .events_since(workspace, e1.id)
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![e2.id, e3.id, e4.id]);
    }

    #[tokio::test]
    async fn heartbeat_reaches_every_workspace_and_prunes_dead_peers() {
        let bus = Arc::new(EventBus::new(100, Duration::from_millis(10)));
        let workspace_a = Uuid::new_v4();
        let workspace_b = Uuid::new_v4();

        let (_, mut rx_a) = subscribe(&bus, workspace_a, Uuid::new_v4());
        let (_, mut rx_b) = subscribe(&bus, workspace_b, Uuid::new_v4());
        let (_, dead_rx) = subscribe(&bus, workspace_b, Uuid::new_v4());
        drop(dead_rx);

        bus.start();
        let got_a = tokio::time::timeout(Duration::from_secs(1), rx_a.recv()).await;
        let got_b = tokio::time::timeout(Duration::from_secs(1), rx_b.recv()).await;
        bus.stop();

        assert!(matches!(got_a, Ok(Some(Frame::Heartbeat))));
        assert!(matches!(got_b, Ok(Some(Frame::Heartbeat))));
        assert_eq!(bus.connection_count(), 2);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let bus = Arc::new(EventBus::new(100, Duration::from_millis(10)));
        bus.start();
        bus.start();
        bus.stop();
        bus.stop();
    }
}
