//! The hub: one owned context holding every piece of shared chat state.
//!
//! A [`Hub`] is driven by a single actor task (see [`actor`]), which makes it
//! the only writer of the session table, presence registry, room directory
//! and history store. Events are applied one at a time in arrival order,
//! which is where per-partition FIFO ordering comes from.
//!
//! - `lifecycle`: connect, identity binding, disconnect cleanup
//! - `membership`: room joins, leaves and typing indicators
//! - `router`: stamping, archiving and fan-out of chat messages
//! - `actor`: command queue and the cloneable [`HubHandle`]

mod actor;
mod lifecycle;
mod membership;
mod router;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use actor::HubHandle;
pub use router::RoomDelivery;

use crate::config::HubConfig;
use crate::error::HubError;
use crate::events::ServerEvent;
use crate::history::HistoryStore;
use crate::presence::PresenceRegistry;
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomDirectory;
use crate::types::{Message, Partition, RoomName, SessionId, Target, Username};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, greeting not yet delivered
    Connecting,
    /// Live without an identity
    Anonymous,
    /// Live with a bound identity
    Registered,
}

/// One live connection. Owned by the hub's session table.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub identity: Option<Username>,
    pub state: SessionState,
    pub joined_rooms: BTreeSet<RoomName>,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            identity: None,
            state: SessionState::Connecting,
            joined_rooms: BTreeSet::new(),
            connected_at: Utc::now(),
        }
    }
}

/// Rooms a registered identity held when its connection dropped.
#[derive(Debug, Clone)]
struct ParkedRooms {
    rooms: BTreeSet<RoomName>,
    expires_at: Instant,
}

impl ParkedRooms {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Timestamp source that never goes backwards.
#[derive(Debug)]
struct HubClock {
    last: DateTime<Utc>,
}

impl HubClock {
    fn new() -> Self {
        Self {
            last: DateTime::<Utc>::MIN_UTC,
        }
    }

    fn now(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        if now > self.last {
            self.last = now;
        }
        self.last
    }
}

/// Shared chat state. See the module docs.
#[derive(Debug)]
pub struct Hub {
    config: HubConfig,
    sessions: HashMap<SessionId, Session>,
    presence: PresenceRegistry,
    rooms: RoomDirectory,
    history: HistoryStore,
    /// Reconnect state, keyed by the identity that left
    parked: HashMap<Username, ParkedRooms>,
    connections: Arc<ConnectionRegistry>,
    clock: HubClock,
}

impl Hub {
    pub fn new(config: HubConfig, connections: Arc<ConnectionRegistry>) -> Self {
        let history = HistoryStore::new(config.retention, config.max_page_size);
        Self {
            config,
            sessions: HashMap::new(),
            presence: PresenceRegistry::new(),
            rooms: RoomDirectory::new(),
            history,
            parked: HashMap::new(),
            connections,
            clock: HubClock::new(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn rooms(&self) -> &RoomDirectory {
        &self.rooms
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Username of a registered session.
    fn require_registered(&self, session: SessionId) -> Result<Username, HubError> {
        let entry = self.sessions.get(&session).ok_or(HubError::SessionNotFound)?;
        match (&entry.state, &entry.identity) {
            (SessionState::Registered, Some(username)) => Ok(username.clone()),
            _ => Err(HubError::NotRegistered),
        }
    }

    /// Build a message with a fresh id and a monotonic timestamp.
    fn stamp(&mut self, sender: Option<Username>, body: String, target: Target) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender,
            body,
            timestamp: self.clock.now(),
            target,
            attachment: None,
        }
    }

    /// Deliver an event to everyone in a scope: all connections for the
    /// global scope, the member set for a room.
    fn deliver_to_scope(&self, scope: &Partition, event: ServerEvent, except: Option<SessionId>) {
        match scope {
            Partition::Global => {
                self.connections.broadcast(&event, except);
            }
            Partition::Room(room) => {
                let members = self
                    .rooms
                    .members_of(room)
                    .into_iter()
                    .filter(|member| Some(*member) != except);
                self.connections.send_to_many(members, &event);
            }
        }
    }
}
