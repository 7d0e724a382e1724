//! Live connection registry
//!
//! Tracks every live streaming connection by id and answers per-workspace
//! queries. A connection belongs to exactly one workspace for its whole
//! lifetime; the registry never rewrites a connection's scope.
//!
//! Locking: a plain `std::sync::Mutex`, held only for map operations. All
//! network writes go through the connection's channel sender outside the
//! lock, so broadcast fan-out never holds the registry for the duration of N
//! sends. The sync lock also lets disconnect cleanup run from `Drop`, which
//! has no async context.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use uuid::Uuid;

use crate::events::Frame;

/// One live streaming session.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    /// Outbound transport handle. A failed send means the receiving stream
    /// was dropped, i.e. the peer is gone.
    pub sender: UnboundedSender<Frame>,
    pub created_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(user_id: Uuid, workspace_id: Uuid, sender: UnboundedSender<Frame>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            workspace_id,
            sender,
            created_at: Utc::now(),
        }
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<HashMap<Uuid, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection by id.
    ///
    /// An id collision is a programmer error (ids are generated per session);
    /// the existing connection wins and the insert is logged and ignored.
    pub fn add(&self, connection: Connection) {
        let mut guard = self.inner.lock().expect("connection registry poisoned");
        if guard.contains_key(&connection.id) {
            warn!(connection_id = %connection.id, "duplicate connection id, ignoring insert");
            return;
        }
        guard.insert(connection.id, connection);
    }

    /// Remove a connection. Idempotent: removing an unknown id is not an
    /// error and returns false.
    pub fn remove(&self, connection_id: Uuid) -> bool {
        self.inner
            .lock()
            .expect("connection registry poisoned")
            .remove(&connection_id)
            .is_some()
    }

    /// Snapshot of the live connections in one workspace.
    pub fn connections_for(&self, workspace_id: Uuid) -> Vec<Connection> {
        self.inner
            .lock()
            .expect("connection registry poisoned")
            .values()
            .filter(|c| c.workspace_id == workspace_id)
            .cloned()
            .collect()
    }

    /// Snapshot of every live connection, across workspaces.
    pub fn connections(&self) -> Vec<Connection> {
        self.inner
            .lock()
            .expect("connection registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Distinct user ids with at least one live connection in the workspace.
    ///
    /// O(connections); per-workspace connection counts are small (tens).
    /// Sorted so presence lists are deterministic on the wire.
    pub fn users_for(&self, workspace_id: Uuid) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = self
            .inner
            .lock()
            .expect("connection registry poisoned")
            .values()
            .filter(|c| c.workspace_id == workspace_id)
            .map(|c| c.user_id)
            .collect();
        users.sort_unstable();
        users.dedup();
        users
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("connection registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn connection(workspace_id: Uuid, user_id: Uuid) -> Connection {
        let (tx, _rx) = unbounded_channel();
        Connection::new(user_id, workspace_id, tx)
    }

    #[test]
    fn add_and_remove_are_idempotent_on_unknown_ids() {
        let registry = ConnectionRegistry::new();
        let conn = connection(Uuid::new_v4(), Uuid::new_v4());
        let id = conn.id;

        registry.add(conn);
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_id_insert_is_ignored() {
        let registry = ConnectionRegistry::new();
        let workspace = Uuid::new_v4();
        let first_user = Uuid::new_v4();

        let first = connection(workspace, first_user);
        let mut second = connection(workspace, Uuid::new_v4());
        second.id = first.id;

        registry.add(first);
        registry.add(second);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.users_for(workspace), vec![first_user]);
    }

    #[test]
    fn connections_are_scoped_by_workspace() {
        let registry = ConnectionRegistry::new();
        let workspace_a = Uuid::new_v4();
        let workspace_b = Uuid::new_v4();

        registry.add(connection(workspace_a, Uuid::new_v4()));
        registry.add(connection(workspace_a, Uuid::new_v4()));
        registry.add(connection(workspace_b, Uuid::new_v4()));

        assert_eq!(registry.connections_for(workspace_a).len(), 2);
        assert_eq!(registry.connections_for(workspace_b).len(), 1);
        assert_eq!(registry.connections().len(), 3);
    }

    #[test]
    fn users_for_deduplicates_multiple_connections() {
        let registry = ConnectionRegistry::new();
        let workspace = Uuid::new_v4();
        let user = Uuid::new_v4();

        // Same user on two tabs
        registry.add(connection(workspace, user));
        registry.add(connection(workspace, user));

        assert_eq!(registry.users_for(workspace), vec![user]);
    }
}
