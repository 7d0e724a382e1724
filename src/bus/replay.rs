//! Bounded in-memory replay window
//!
//! A single FIFO across all workspaces, capacity N (default 100). Inserting
//! the (N+1)-th event evicts the oldest regardless of which workspace it
//! belongs to. A noisy workspace can therefore shrink a quiet workspace's
//! replay window; callers must treat replay results as best-effort history,
//! not an authoritative log. This is a known, deliberate trade-off - do not
//! "fix" it to per-workspace buffers without changing the documented
//! semantics.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::events::Event;

pub struct ReplayBuffer {
    events: VecDeque<Event>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an event, evicting the oldest entry at capacity.
    pub fn push(&mut self, event: Event) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Buffered events for a workspace with `id > after_id`, oldest first.
    pub fn events_since(&self, workspace_id: Uuid, after_id: u64) -> Vec<Event> {
        self.events
            .iter()
            .filter(|e| e.workspace_id == workspace_id && e.id > after_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use chrono::Utc;

    fn event(id: u64, workspace_id: Uuid) -> Event {
        Event {
            id,
            event_type: EventType::IssueCreated,
            workspace_id,
            project_id: None,
            issue_id: None,
            payload: serde_json::json!({}),
            user_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn capacity_evicts_oldest_across_workspaces() {
        let workspace_a = Uuid::new_v4();
        let workspace_b = Uuid::new_v4();
        let mut buffer = ReplayBuffer::new(3);

        buffer.push(event(1, workspace_a));
        buffer.push(event(2, workspace_b));
        buffer.push(event(3, workspace_b));
        // Evicts workspace A's event even though B caused the overflow
        buffer.push(event(4, workspace_b));

        assert_eq!(buffer.len(), 3);
        assert!(buffer.events_since(workspace_a, 0).is_empty());
        let ids: Vec<u64> = buffer
            .events_since(workspace_b, 0)
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn events_since_filters_by_cursor_in_order() {
        let workspace = Uuid::new_v4();
        let mut buffer = ReplayBuffer::new(10);
        for id in 1..=5 {
            buffer.push(event(id, workspace));
        }

        let ids: Vec<u64> = buffer
            .events_since(workspace, 2)
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert!(buffer.events_since(workspace, 5).is_empty());
    }
}
