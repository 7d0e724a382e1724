//! Local presence mirror
//!
//! Seeded from the `connected` bootstrap frame, then mutated incrementally:
//! add on `member.joined`, discard on `member.left`. Incremental updates mean
//! out-of-order join/leave delivery for one user can never silently erase
//! unrelated users, and duplicate joins are naturally idempotent.

use std::collections::HashSet;

use uuid::Uuid;

use crate::events::{Event, EventType};

#[derive(Debug, Default, Clone)]
pub struct PresenceSet {
    users: HashSet<Uuid>,
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set; only valid for the bootstrap snapshot.
    pub fn seed(&mut self, users: impl IntoIterator<Item = Uuid>) {
        self.users = users.into_iter().collect();
    }

    /// Apply a presence event. Returns false for non-presence events.
    pub fn apply(&mut self, event: &Event) -> bool {
        match event.event_type {
            EventType::MemberJoined => {
                self.users.insert(event.user_id);
                true
            }
            EventType::MemberLeft => {
                self.users.remove(&event.user_id);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.users.contains(&user_id)
    }

    /// Sorted for deterministic consumption.
    pub fn users(&self) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = self.users.iter().copied().collect();
        users.sort_unstable();
        users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
