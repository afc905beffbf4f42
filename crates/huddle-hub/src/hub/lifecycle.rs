//! Connection lifecycle: session creation, identity binding and cleanup.

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use super::{Hub, ParkedRooms, Session, SessionState};
use crate::config::RegistrationPolicy;
use crate::error::HubError;
use crate::events::{Connected, IdentityNotice, ServerEvent, SessionReplaced, TypingUpdate};
use crate::registry::{Outbound, SendResult};
use crate::types::{PresenceStatus, RoomName, SessionId, Target, Username};

impl Hub {
    /// Create a session for a new connection and greet it.
    #[instrument(skip(self, outbound))]
    pub fn connect(&mut self, outbound: Outbound) -> SessionId {
        let id = SessionId::new();
        self.sessions.insert(id, Session::new(id));
        self.connections.register(id, outbound);

        let greeting = ServerEvent::Connected(Connected { session_id: id });
        if self.connections.send_to(id, greeting) == SendResult::Sent {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.state = SessionState::Anonymous;
            }
        }

        info!(session = %id, "Session connected");
        id
    }

    /// Bind a display identity to a session.
    ///
    /// Re-registering the name the session already holds changes nothing.
    /// A name held by another session is handled by the registration policy.
    #[instrument(skip(self), fields(username = %username))]
    pub fn register_identity(
        &mut self,
        session: SessionId,
        username: Username,
    ) -> Result<(), HubError> {
        let current = self
            .sessions
            .get(&session)
            .ok_or(HubError::SessionNotFound)?
            .identity
            .clone();
        if current.as_ref() == Some(&username) {
            debug!("Session already holds this username");
            return Ok(());
        }

        let holder = self
            .presence
            .session_for(&username)
            .filter(|holder| *holder != session);
        if holder.is_some() && self.config.registration == RegistrationPolicy::RejectDuplicate {
            return Err(HubError::AlreadyRegistered(username.to_string()));
        }

        if let Some(previous) = current {
            self.clear_typing_for(&previous, session);
        }

        if let Some(displaced) = self.presence.bind(session, username.clone()) {
            if let Some(old) = self.sessions.get_mut(&displaced) {
                old.identity = None;
                old.state = SessionState::Anonymous;
            }
            self.connections.send_to(
                displaced,
                ServerEvent::SessionReplaced(SessionReplaced {
                    username: username.clone(),
                }),
            );
            warn!(displaced = %displaced, "Username taken over by a newer session");
        }

        if let Some(entry) = self.sessions.get_mut(&session) {
            entry.identity = Some(username.clone());
            entry.state = SessionState::Registered;
        }

        self.publish_presence();
        let notice = self.stamp(None, format!("{} joined the chat", username), Target::Global);
        self.connections.broadcast(
            &ServerEvent::UserJoined(IdentityNotice { username, notice }),
            None,
        );
        info!("User registered");
        Ok(())
    }

    /// Tear down a session. Calling this again for the same id does nothing.
    #[instrument(skip(self))]
    pub fn disconnect(&mut self, session: SessionId) {
        let Some(entry) = self.sessions.remove(&session) else {
            debug!("Session already cleaned up");
            return;
        };

        for room in &entry.joined_rooms {
            self.rooms.leave(session, room);
        }
        self.presence.unbind(session);
        self.connections.unregister(session);

        if let Some(username) = entry.identity {
            self.park_rooms(&username, entry.joined_rooms);
            self.clear_typing_for(&username, session);
            self.publish_presence();
            let notice = self.stamp(None, format!("{} left the chat", username), Target::Global);
            self.connections.broadcast(
                &ServerEvent::UserLeft(IdentityNotice {
                    username: username.clone(),
                    notice,
                }),
                None,
            );
            info!(username = %username, "User disconnected");
        } else {
            info!("Anonymous session disconnected");
        }
    }

    /// Bind an authenticated identity and rejoin the rooms it held when its
    /// previous connection dropped, if that was within the reconnect window.
    /// Each restored room is synced with `room_update`.
    #[instrument(skip(self), fields(username = %username))]
    pub fn resume(
        &mut self,
        session: SessionId,
        username: Username,
    ) -> Result<Vec<RoomName>, HubError> {
        self.register_identity(session, username.clone())?;

        let Some(parked) = self.parked.remove(&username) else {
            return Ok(Vec::new());
        };
        if !parked.is_live(Instant::now()) {
            debug!("Reconnect window elapsed");
            return Ok(Vec::new());
        }

        let rooms: Vec<RoomName> = parked.rooms.into_iter().collect();
        for room in &rooms {
            self.join_room(session, room.clone())?;
        }
        info!(rooms = rooms.len(), "Rooms restored after reconnect");
        Ok(rooms)
    }

    /// Remember the rooms of an identity that just left.
    fn park_rooms(&mut self, username: &Username, rooms: BTreeSet<RoomName>) {
        let now = Instant::now();
        self.parked.retain(|_, parked| parked.is_live(now));
        self.parked.remove(username);

        let Some(window) = self.config.reconnect.window() else {
            return;
        };
        if rooms.is_empty() {
            return;
        }
        debug!(username = %username, rooms = rooms.len(), "Parking rooms for reconnect");
        self.parked.insert(
            username.clone(),
            ParkedRooms {
                rooms,
                expires_at: now + window,
            },
        );
    }

    /// Change the status of a registered session.
    pub fn set_status(
        &mut self,
        session: SessionId,
        status: PresenceStatus,
    ) -> Result<(), HubError> {
        self.require_registered(session)?;
        self.presence.set_status(session, status);
        self.publish_presence();
        Ok(())
    }

    /// Send the presence snapshot to one session.
    pub fn send_presence(&self, session: SessionId) -> Result<(), HubError> {
        if !self.sessions.contains_key(&session) {
            return Err(HubError::SessionNotFound);
        }
        self.connections
            .send_to(session, ServerEvent::UserStatusUpdate(self.presence.snapshot()));
        Ok(())
    }

    /// Publish the presence snapshot to every connection.
    fn publish_presence(&self) {
        self.connections
            .broadcast(&ServerEvent::UserStatusUpdate(self.presence.snapshot()), None);
    }

    /// Drop `username` from every typing set and tell the rest of each scope.
    fn clear_typing_for(&mut self, username: &Username, session: SessionId) {
        for scope in self.rooms.clear_typing(username) {
            let update = ServerEvent::Typing(TypingUpdate {
                username: username.clone(),
                is_typing: false,
                room: scope.room().cloned(),
                typing: self.rooms.typing_in(&scope),
            });
            self.deliver_to_scope(&scope, update, Some(session));
        }
    }
}
