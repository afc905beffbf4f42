//! Presence Registry
//!
//! Maps live sessions to their bound identity and status, with a reverse
//! index from username to session for private message addressing.

use std::collections::HashMap;

use tracing::debug;

use crate::events::PresenceSnapshot;
use crate::types::{Identity, PresenceStatus, SessionId, Username};

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: HashMap<SessionId, Identity>,
    by_username: HashMap<Username, SessionId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `username` to `session` with status online.
    ///
    /// Any previous identity of `session` is dropped. If another session held
    /// `username` it loses its entry, and its id is returned.
    pub fn bind(&mut self, session: SessionId, username: Username) -> Option<SessionId> {
        self.unbind(session);

        let displaced = self
            .by_username
            .insert(username.clone(), session)
            .filter(|previous| *previous != session);
        if let Some(previous) = displaced {
            self.entries.remove(&previous);
            debug!(session = %previous, username = %username, "Displaced previous holder of username");
        }

        self.entries.insert(
            session,
            Identity {
                username,
                status: PresenceStatus::Online,
            },
        );
        displaced
    }

    /// Remove the entry of `session`, if any.
    pub fn unbind(&mut self, session: SessionId) -> Option<Identity> {
        let identity = self.entries.remove(&session)?;
        if self.by_username.get(&identity.username) == Some(&session) {
            self.by_username.remove(&identity.username);
        }
        Some(identity)
    }

    /// Update the status of a registered session. Returns false if it has no entry.
    pub fn set_status(&mut self, session: SessionId, status: PresenceStatus) -> bool {
        match self.entries.get_mut(&session) {
            Some(identity) => {
                identity.status = status;
                true
            }
            None => false,
        }
    }

    pub fn identity(&self, session: SessionId) -> Option<&Identity> {
        self.entries.get(&session)
    }

    /// Live session currently holding `username`.
    pub fn session_for(&self, username: &Username) -> Option<SessionId> {
        self.by_username.get(username).copied()
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        self.entries
            .iter()
            .map(|(session, identity)| (*session, identity.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
