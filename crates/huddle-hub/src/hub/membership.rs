//! Room membership and typing indicators.

use tracing::{debug, instrument};

use super::Hub;
use crate::config::RoomSendPolicy;
use crate::error::HubError;
use crate::events::{RoomUpdate, ServerEvent, TypingUpdate};
use crate::types::{Message, Partition, RoomName, SessionId};

impl Hub {
    /// Join a room, creating it if needed, and sync its history to the joiner.
    ///
    /// The `room_update` is queued from inside the hub so that it reaches the
    /// joiner before any message routed after the join.
    #[instrument(skip(self), fields(room = %room))]
    pub fn join_room(&mut self, session: SessionId, room: RoomName) -> Result<Vec<Message>, HubError> {
        let entry = self
            .sessions
            .get_mut(&session)
            .ok_or(HubError::SessionNotFound)?;
        entry.joined_rooms.insert(room.clone());
        self.rooms.join(session, &room);

        let messages = self.history.all(&Partition::Room(room.clone()));
        debug!(backlog = messages.len(), "Room sync");
        self.connections.send_to(
            session,
            ServerEvent::RoomUpdate(RoomUpdate {
                room,
                messages: messages.clone(),
            }),
        );
        Ok(messages)
    }

    /// Leave a room. Leaving a room the session is not in is a no-op.
    #[instrument(skip(self), fields(room = %room))]
    pub fn leave_room(&mut self, session: SessionId, room: &RoomName) -> Result<(), HubError> {
        let entry = self
            .sessions
            .get_mut(&session)
            .ok_or(HubError::SessionNotFound)?;
        entry.joined_rooms.remove(room);
        self.rooms.leave(session, room);
        Ok(())
    }

    /// Start or stop the typing indicator of a registered session.
    ///
    /// With a room the update goes to the room's other members, otherwise to
    /// every other connection. Repeating the current state sends nothing.
    /// Room indicators follow the same membership rule as room messages.
    pub fn set_typing(
        &mut self,
        session: SessionId,
        room: Option<RoomName>,
        is_typing: bool,
    ) -> Result<(), HubError> {
        let username = self.require_registered(session)?;
        if let Some(room) = &room {
            if self.config.room_send == RoomSendPolicy::MembersOnly
                && !self.rooms.is_member(session, room)
            {
                return Err(HubError::NotRoomMember(room.to_string()));
            }
        }
        let scope = Partition::from(room);
        if !self.rooms.set_typing(&scope, &username, is_typing) {
            return Ok(());
        }

        let update = ServerEvent::Typing(TypingUpdate {
            username,
            is_typing,
            room: scope.room().cloned(),
            typing: self.rooms.typing_in(&scope),
        });
        self.deliver_to_scope(&scope, update, Some(session));
        Ok(())
    }

    /// Send the global backlog to one session as `load_messages`.
    pub fn send_backlog(&self, session: SessionId) -> Result<(), HubError> {
        if !self.sessions.contains_key(&session) {
            return Err(HubError::SessionNotFound);
        }
        let messages = self.history.all(&Partition::Global);
        self.connections
            .send_to(session, ServerEvent::LoadMessages(messages));
        Ok(())
    }
}
