//! Message routing: stamping, archiving and fan-out.

use tracing::{debug, instrument, warn};

use super::Hub;
use crate::config::{OfflinePolicy, RoomSendPolicy};
use crate::error::HubError;
use crate::events::{DeliveryFailed, FileNotice, PrivateDelivery, ServerEvent};
use crate::history::HistoryPage;
use crate::rooms::RoomSummary;
use crate::types::{Attachment, Message, MessageBody, Partition, RoomName, SessionId, Target, Username};

/// Event name used when fanning out a room message.
///
/// `send_message` with a room and `room_message` both land in the same
/// partition but keep their own event names on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomDelivery {
    #[default]
    ReceiveMessage,
    RoomMessage,
}

impl RoomDelivery {
    fn wrap(self, message: Message) -> ServerEvent {
        match self {
            RoomDelivery::ReceiveMessage => ServerEvent::ReceiveMessage(message),
            RoomDelivery::RoomMessage => ServerEvent::RoomMessage(message),
        }
    }
}

impl Hub {
    /// Archive a global message and deliver it to every connection,
    /// the sender included.
    #[instrument(skip(self, body))]
    pub fn route_global(&mut self, session: SessionId, body: MessageBody) -> Result<Message, HubError> {
        let sender = self.require_registered(session)?;
        let message = self.stamp(Some(sender), body.into_inner(), Target::Global);
        self.history.append(Partition::Global, message.clone());

        let delivered = self
            .connections
            .broadcast(&ServerEvent::ReceiveMessage(message.clone()), None);
        debug!(id = %message.id, delivered, "Global message routed");
        Ok(message)
    }

    /// Archive a room message and deliver it to the room's members.
    #[instrument(skip(self, body), fields(room = %room))]
    pub fn route_room(
        &mut self,
        session: SessionId,
        room: RoomName,
        body: MessageBody,
        via: RoomDelivery,
    ) -> Result<Message, HubError> {
        let sender = self.require_registered(session)?;
        if self.config.room_send == RoomSendPolicy::MembersOnly
            && !self.rooms.is_member(session, &room)
        {
            return Err(HubError::NotRoomMember(room.to_string()));
        }

        self.rooms.ensure(&room);
        let target = Target::Room { room: room.clone() };
        let message = self.stamp(Some(sender), body.into_inner(), target);
        self.history.append(Partition::Room(room.clone()), message.clone());

        let scope = Partition::Room(room);
        self.deliver_to_scope(&scope, via.wrap(message.clone()), None);
        debug!(id = %message.id, "Room message routed");
        Ok(message)
    }

    /// Deliver a private message to the live session holding `to`.
    ///
    /// Private messages are never archived. When the recipient is offline
    /// the offline policy decides whether the sender hears about it, and the
    /// call returns [`HubError::RecipientOffline`] either way.
    #[instrument(skip(self, body), fields(to = %to))]
    pub fn route_private(
        &mut self,
        session: SessionId,
        to: Username,
        body: MessageBody,
    ) -> Result<Message, HubError> {
        let sender = self.require_registered(session)?;
        let message = self.stamp(
            Some(sender.clone()),
            body.into_inner(),
            Target::Private { to: to.clone() },
        );

        let Some(recipient) = self.presence.session_for(&to) else {
            match self.config.offline {
                OfflinePolicy::Drop => {
                    warn!(from = %sender, "Private message dropped, recipient offline");
                }
                OfflinePolicy::NotifySender => {
                    self.connections.send_to(
                        session,
                        ServerEvent::DeliveryFailed(DeliveryFailed {
                            to: to.clone(),
                            reason: "recipient offline".to_string(),
                        }),
                    );
                }
            }
            return Err(HubError::RecipientOffline(to.to_string()));
        };

        self.connections.send_to(
            recipient,
            ServerEvent::PrivateMessage(PrivateDelivery {
                id: message.id,
                from: sender,
                message: message.body.clone(),
                timestamp: message.timestamp,
            }),
        );
        Ok(message)
    }

    /// Archive an uploaded file as a room message and announce it to members.
    ///
    /// The blob must already be stored. Room membership is not required.
    #[instrument(skip(self, attachment), fields(room = %room))]
    pub fn publish_attachment(
        &mut self,
        session: SessionId,
        room: RoomName,
        attachment: Attachment,
    ) -> Result<Message, HubError> {
        let sender = self.require_registered(session)?;
        self.rooms.ensure(&room);

        let mut message = self.stamp(
            Some(sender.clone()),
            attachment.name.clone(),
            Target::Room { room: room.clone() },
        );
        message.attachment = Some(attachment.clone());
        self.history.append(Partition::Room(room.clone()), message.clone());

        let notice = FileNotice {
            id: message.id,
            url: attachment.url,
            name: attachment.name,
            sender,
            room: room.clone(),
            timestamp: message.timestamp,
        };
        self.deliver_to_scope(&Partition::Room(room), ServerEvent::NewFile(notice), None);
        debug!(id = %message.id, "Attachment published");
        Ok(message)
    }

    /// One page of a partition's history, newest first.
    pub fn history_page(&self, partition: &Partition, page: usize, page_size: usize) -> HistoryPage {
        self.history.page(partition, page, page_size)
    }

    /// Case-insensitive search over one partition.
    pub fn search(&self, partition: &Partition, query: &str) -> Vec<Message> {
        self.history.search(partition, query)
    }

    /// Summaries of every known room, sorted by name.
    pub fn room_summaries(&self) -> Vec<RoomSummary> {
        self.rooms.summaries()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::config::HubConfig;
    use crate::registry::ConnectionRegistry;

    fn hub(config: HubConfig) -> Hub {
        Hub::new(config, Arc::new(ConnectionRegistry::new()))
    }

    fn connect(hub: &mut Hub, name: &str) -> (SessionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let session = hub.connect(tx);
        hub.register_identity(session, Username::parse(name).unwrap())
            .unwrap();
        (session, rx)
    }

    fn body(text: &str) -> MessageBody {
        MessageBody::parse(text).unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_unregistered_session_cannot_send() {
        let mut hub = hub(HubConfig::default());
        let (tx, _rx) = mpsc::channel(8);
        let session = hub.connect(tx);

        let result = hub.route_global(session, body("hi"));
        assert!(matches!(result, Err(HubError::NotRegistered)));
        assert_eq!(hub.history().len(&Partition::Global), 0);
    }

    #[test]
    fn test_room_send_requires_membership_by_default() {
        let mut hub = hub(HubConfig::default());
        let (alice, _rx) = connect(&mut hub, "alice");
        let room = RoomName::parse("general").unwrap();

        let result = hub.route_room(alice, room.clone(), body("hi"), RoomDelivery::RoomMessage);
        assert!(matches!(result, Err(HubError::NotRoomMember(_))));
        assert_eq!(hub.history().len(&Partition::Room(room)), 0);
    }

    #[test]
    fn test_open_rooms_accept_non_members() {
        let mut hub = hub(HubConfig {
            room_send: RoomSendPolicy::Open,
            ..HubConfig::default()
        });
        let (alice, _rx) = connect(&mut hub, "alice");
        let room = RoomName::parse("lobby").unwrap();

        hub.route_room(alice, room.clone(), body("hi"), RoomDelivery::ReceiveMessage)
            .unwrap();
        assert_eq!(hub.history().len(&Partition::Room(room.clone())), 1);
        assert!(hub.rooms().room_exists(&room));
    }

    #[test]
    fn test_room_delivery_keeps_event_name() {
        let mut hub = hub(HubConfig::default());
        let (alice, mut rx) = connect(&mut hub, "alice");
        let room = RoomName::parse("general").unwrap();
        hub.join_room(alice, room.clone()).unwrap();
        drain(&mut rx);

        hub.route_room(alice, room.clone(), body("one"), RoomDelivery::RoomMessage)
            .unwrap();
        hub.route_room(alice, room, body("two"), RoomDelivery::ReceiveMessage)
            .unwrap();

        let names: Vec<_> = drain(&mut rx).iter().map(ServerEvent::name).collect();
        assert_eq!(names, vec!["room_message", "receive_message"]);
    }

    #[test]
    fn test_private_message_is_not_archived() {
        let mut hub = hub(HubConfig::default());
        let (alice, _alice_rx) = connect(&mut hub, "alice");
        let (_bob, mut bob_rx) = connect(&mut hub, "bob");
        drain(&mut bob_rx);

        let message = hub
            .route_private(alice, Username::parse("bob").unwrap(), body("psst"))
            .unwrap();

        let events = drain(&mut bob_rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::PrivateMessage(p) if p.id == message.id && p.from.as_str() == "alice"
        )));
        assert_eq!(hub.history().len(&Partition::Global), 0);
    }

    #[test]
    fn test_attachment_is_archived_with_file_reference() {
        let mut hub = hub(HubConfig::default());
        let (alice, mut rx) = connect(&mut hub, "alice");
        let room = RoomName::parse("general").unwrap();
        hub.join_room(alice, room.clone()).unwrap();
        drain(&mut rx);

        let attachment = Attachment {
            url: "/uploads/1_a.txt".to_string(),
            name: "a.txt".to_string(),
        };
        let message = hub.publish_attachment(alice, room.clone(), attachment).unwrap();

        let stored = hub.history().all(&Partition::Room(room));
        assert_eq!(stored, vec![message.clone()]);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerEvent::NewFile(notice)] if notice.id == message.id && notice.url == "/uploads/1_a.txt"
        ));
    }
}
