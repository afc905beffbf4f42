//! Room Directory
//!
//! Maps room names to member sessions. Rooms are created lazily on first
//! join or message and are never destroyed. Also holds the typing sub-state:
//! per-scope sets of usernames, changed only by explicit typing events and
//! disconnect cleanup.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::types::{Partition, RoomName, SessionId, Username};

/// A named broadcast group.
#[derive(Debug)]
pub struct Room {
    pub name: RoomName,
    pub members: HashSet<SessionId>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    fn new(name: RoomName) -> Self {
        Self {
            name,
            members: HashSet::new(),
            created_at: Utc::now(),
        }
    }
}

/// Basic room information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub name: RoomName,
    pub member_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: HashMap<RoomName, Room>,
    typing: HashMap<Partition, BTreeSet<Username>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a room, creating it if absent.
    pub fn ensure(&mut self, name: &RoomName) -> &mut Room {
        self.rooms.entry(name.clone()).or_insert_with(|| {
            info!(room = %name, "Created room");
            Room::new(name.clone())
        })
    }

    /// Add `session` to `room`. Returns false if it was already a member.
    pub fn join(&mut self, session: SessionId, room: &RoomName) -> bool {
        let added = self.ensure(room).members.insert(session);
        debug!(room = %room, session = %session, added, "Join");
        added
    }

    /// Remove `session` from `room`. Unknown rooms and non-members are a no-op.
    pub fn leave(&mut self, session: SessionId, room: &RoomName) -> bool {
        self.rooms
            .get_mut(room)
            .map(|r| r.members.remove(&session))
            .unwrap_or(false)
    }

    /// Members of a room; empty for unknown rooms.
    pub fn members_of(&self, room: &RoomName) -> HashSet<SessionId> {
        self.rooms
            .get(room)
            .map(|r| r.members.clone())
            .unwrap_or_default()
    }

    pub fn is_member(&self, session: SessionId, room: &RoomName) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|r| r.members.contains(&session))
    }

    pub fn room_exists(&self, room: &RoomName) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// All rooms, sorted by name.
    pub fn summaries(&self) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> = self
            .rooms
            .values()
            .map(|room| RoomSummary {
                name: room.name.clone(),
                member_count: room.members.len(),
                created_at: room.created_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Record that `username` started or stopped typing in `scope`.
    ///
    /// Returns true when the set actually changed.
    pub fn set_typing(&mut self, scope: &Partition, username: &Username, is_typing: bool) -> bool {
        if is_typing {
            self.typing
                .entry(scope.clone())
                .or_default()
                .insert(username.clone())
        } else {
            let Some(set) = self.typing.get_mut(scope) else {
                return false;
            };
            let removed = set.remove(username);
            if set.is_empty() {
                self.typing.remove(scope);
            }
            removed
        }
    }

    /// Usernames typing in `scope`, sorted.
    pub fn typing_in(&self, scope: &Partition) -> Vec<Username> {
        self.typing
            .get(scope)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove `username` from every typing set. Returns the scopes it was removed from.
    pub fn clear_typing(&mut self, username: &Username) -> Vec<Partition> {
        let mut affected = Vec::new();
        self.typing.retain(|scope, set| {
            if set.remove(username) {
                affected.push(scope.clone());
            }
            !set.is_empty()
        });
        affected.sort();
        affected
    }
}
