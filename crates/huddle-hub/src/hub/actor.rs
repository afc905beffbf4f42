//! The hub actor and its handle.
//!
//! Every state change is a command on one queue, applied in arrival order
//! by the task that owns the [`Hub`]. Callers wait on a oneshot for the result.
//! Auth Gateway calls run in the caller's task so that a slow credential
//! check never holds up routing.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};

use super::{Hub, RoomDelivery, Session};
use crate::auth::{AuthGateway, AuthGrant, Credentials};
use crate::config::HubConfig;
use crate::error::HubError;
use crate::events::PresenceSnapshot;
use crate::history::HistoryPage;
use crate::registry::{ConnectionRegistry, Outbound};
use crate::rooms::RoomSummary;
use crate::types::{
    Attachment, Message, MessageBody, Partition, PresenceStatus, RoomName, SessionId, Username,
};

type Reply<T> = oneshot::Sender<Result<T, HubError>>;

enum Command {
    Connect {
        outbound: Outbound,
        reply: oneshot::Sender<SessionId>,
    },
    Disconnect {
        session: SessionId,
        reply: oneshot::Sender<()>,
    },
    Register {
        session: SessionId,
        username: Username,
        reply: Reply<()>,
    },
    Resume {
        session: SessionId,
        username: Username,
        reply: Reply<Vec<RoomName>>,
    },
    SetStatus {
        session: SessionId,
        status: PresenceStatus,
        reply: Reply<()>,
    },
    SendPresence {
        session: SessionId,
        reply: Reply<()>,
    },
    JoinRoom {
        session: SessionId,
        room: RoomName,
        reply: Reply<Vec<Message>>,
    },
    LeaveRoom {
        session: SessionId,
        room: RoomName,
        reply: Reply<()>,
    },
    Typing {
        session: SessionId,
        room: Option<RoomName>,
        is_typing: bool,
        reply: Reply<()>,
    },
    SendBacklog {
        session: SessionId,
        reply: Reply<()>,
    },
    RouteGlobal {
        session: SessionId,
        body: MessageBody,
        reply: Reply<Message>,
    },
    RouteRoom {
        session: SessionId,
        room: RoomName,
        body: MessageBody,
        via: RoomDelivery,
        reply: Reply<Message>,
    },
    RoutePrivate {
        session: SessionId,
        to: Username,
        body: MessageBody,
        reply: Reply<Message>,
    },
    PublishAttachment {
        session: SessionId,
        room: RoomName,
        attachment: Attachment,
        reply: Reply<Message>,
    },
    RequireRegistered {
        session: SessionId,
        reply: Reply<Username>,
    },
    HistoryPage {
        partition: Partition,
        page: usize,
        page_size: usize,
        reply: oneshot::Sender<HistoryPage>,
    },
    Search {
        partition: Partition,
        query: String,
        reply: oneshot::Sender<Vec<Message>>,
    },
    Rooms {
        reply: oneshot::Sender<Vec<RoomSummary>>,
    },
    Presence {
        reply: oneshot::Sender<PresenceSnapshot>,
    },
    Session {
        session: SessionId,
        reply: oneshot::Sender<Option<Session>>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Connect { .. } => "connect",
            Command::Disconnect { .. } => "disconnect",
            Command::Register { .. } => "register",
            Command::Resume { .. } => "resume",
            Command::SetStatus { .. } => "set_status",
            Command::SendPresence { .. } => "send_presence",
            Command::JoinRoom { .. } => "join_room",
            Command::LeaveRoom { .. } => "leave_room",
            Command::Typing { .. } => "typing",
            Command::SendBacklog { .. } => "send_backlog",
            Command::RouteGlobal { .. } => "route_global",
            Command::RouteRoom { .. } => "route_room",
            Command::RoutePrivate { .. } => "route_private",
            Command::PublishAttachment { .. } => "publish_attachment",
            Command::RequireRegistered { .. } => "require_registered",
            Command::HistoryPage { .. } => "history_page",
            Command::Search { .. } => "search",
            Command::Rooms { .. } => "rooms",
            Command::Presence { .. } => "presence",
            Command::Session { .. } => "session",
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Hub {
    fn apply(&mut self, command: Command) {
        // A dropped reply receiver only means the caller went away.
        match command {
            Command::Connect { outbound, reply } => {
                let _ = reply.send(self.connect(outbound));
            }
            Command::Disconnect { session, reply } => {
                self.disconnect(session);
                let _ = reply.send(());
            }
            Command::Register {
                session,
                username,
                reply,
            } => {
                let _ = reply.send(self.register_identity(session, username));
            }
            Command::Resume {
                session,
                username,
                reply,
            } => {
                let _ = reply.send(self.resume(session, username));
            }
            Command::SetStatus {
                session,
                status,
                reply,
            } => {
                let _ = reply.send(self.set_status(session, status));
            }
            Command::SendPresence { session, reply } => {
                let _ = reply.send(self.send_presence(session));
            }
            Command::JoinRoom {
                session,
                room,
                reply,
            } => {
                let _ = reply.send(self.join_room(session, room));
            }
            Command::LeaveRoom {
                session,
                room,
                reply,
            } => {
                let _ = reply.send(self.leave_room(session, &room));
            }
            Command::Typing {
                session,
                room,
                is_typing,
                reply,
            } => {
                let _ = reply.send(self.set_typing(session, room, is_typing));
            }
            Command::SendBacklog { session, reply } => {
                let _ = reply.send(self.send_backlog(session));
            }
            Command::RouteGlobal {
                session,
                body,
                reply,
            } => {
                let _ = reply.send(self.route_global(session, body));
            }
            Command::RouteRoom {
                session,
                room,
                body,
                via,
                reply,
            } => {
                let _ = reply.send(self.route_room(session, room, body, via));
            }
            Command::RoutePrivate {
                session,
                to,
                body,
                reply,
            } => {
                let _ = reply.send(self.route_private(session, to, body));
            }
            Command::PublishAttachment {
                session,
                room,
                attachment,
                reply,
            } => {
                let _ = reply.send(self.publish_attachment(session, room, attachment));
            }
            Command::RequireRegistered { session, reply } => {
                let _ = reply.send(self.require_registered(session));
            }
            Command::HistoryPage {
                partition,
                page,
                page_size,
                reply,
            } => {
                let _ = reply.send(self.history_page(&partition, page, page_size));
            }
            Command::Search {
                partition,
                query,
                reply,
            } => {
                let _ = reply.send(self.search(&partition, &query));
            }
            Command::Rooms { reply } => {
                let _ = reply.send(self.room_summaries());
            }
            Command::Presence { reply } => {
                let _ = reply.send(self.presence.snapshot());
            }
            Command::Session { session, reply } => {
                let _ = reply.send(self.session(session).cloned());
            }
        }
    }
}

async fn run(mut hub: Hub, mut commands: mpsc::Receiver<Command>) {
    info!("Hub started");
    while let Some(command) = commands.recv().await {
        debug!(command = command.name(), "Applying hub command");
        hub.apply(command);
    }
    info!("Hub stopped, all handles dropped");
}

/// Cloneable handle to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
    connections: Arc<ConnectionRegistry>,
    config: Arc<HubConfig>,
}

impl HubHandle {
    /// Spawn the hub actor on the current tokio runtime.
    ///
    /// The actor stops once every handle has been dropped.
    pub fn spawn(config: HubConfig) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let (commands, receiver) = mpsc::channel(config.command_buffer.max(1));
        let hub = Hub::new(config.clone(), Arc::clone(&connections));
        tokio::spawn(run(hub, receiver));

        Self {
            commands,
            connections,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.connection_count()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, HubError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| HubError::Closed)?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Open a session. `outbound` receives every event addressed to it,
    /// starting with `connected`.
    pub async fn connect(&self, outbound: Outbound) -> Result<SessionId, HubError> {
        self.request(|reply| Command::Connect { outbound, reply })
            .await
    }

    /// Close a session. Safe to call more than once.
    pub async fn disconnect(&self, session: SessionId) -> Result<(), HubError> {
        self.request(|reply| Command::Disconnect { session, reply })
            .await
    }

    pub async fn register(&self, session: SessionId, username: Username) -> Result<(), HubError> {
        self.request(|reply| Command::Register {
            session,
            username,
            reply,
        })
        .await?
    }

    /// Verify credentials with the gateway, then bind the returned identity.
    #[instrument(skip(self, gateway, credentials), fields(session = %session))]
    pub async fn authenticate(
        &self,
        gateway: &dyn AuthGateway,
        session: SessionId,
        credentials: Credentials,
    ) -> Result<AuthGrant, HubError> {
        let grant = gateway.authenticate(&credentials).await?;
        self.resume(session, grant.username.clone()).await?;
        Ok(grant)
    }

    /// Bind an already authenticated identity, rejoining the rooms it held
    /// if it dropped within the reconnect window. Returns the restored rooms.
    pub async fn resume(
        &self,
        session: SessionId,
        username: Username,
    ) -> Result<Vec<RoomName>, HubError> {
        self.request(|reply| Command::Resume {
            session,
            username,
            reply,
        })
        .await?
    }

    pub async fn set_status(
        &self,
        session: SessionId,
        status: PresenceStatus,
    ) -> Result<(), HubError> {
        self.request(|reply| Command::SetStatus {
            session,
            status,
            reply,
        })
        .await?
    }

    /// Queue the presence snapshot to one session.
    pub async fn send_presence(&self, session: SessionId) -> Result<(), HubError> {
        self.request(|reply| Command::SendPresence { session, reply })
            .await?
    }

    pub async fn join_room(
        &self,
        session: SessionId,
        room: RoomName,
    ) -> Result<Vec<Message>, HubError> {
        self.request(|reply| Command::JoinRoom {
            session,
            room,
            reply,
        })
        .await?
    }

    pub async fn leave_room(&self, session: SessionId, room: RoomName) -> Result<(), HubError> {
        self.request(|reply| Command::LeaveRoom {
            session,
            room,
            reply,
        })
        .await?
    }

    pub async fn set_typing(
        &self,
        session: SessionId,
        room: Option<RoomName>,
        is_typing: bool,
    ) -> Result<(), HubError> {
        self.request(|reply| Command::Typing {
            session,
            room,
            is_typing,
            reply,
        })
        .await?
    }

    /// Queue the global backlog to one session.
    pub async fn send_backlog(&self, session: SessionId) -> Result<(), HubError> {
        self.request(|reply| Command::SendBacklog { session, reply })
            .await?
    }

    pub async fn send_global(
        &self,
        session: SessionId,
        body: MessageBody,
    ) -> Result<Message, HubError> {
        self.request(|reply| Command::RouteGlobal {
            session,
            body,
            reply,
        })
        .await?
    }

    pub async fn send_room(
        &self,
        session: SessionId,
        room: RoomName,
        body: MessageBody,
        via: RoomDelivery,
    ) -> Result<Message, HubError> {
        self.request(|reply| Command::RouteRoom {
            session,
            room,
            body,
            via,
            reply,
        })
        .await?
    }

    pub async fn send_private(
        &self,
        session: SessionId,
        to: Username,
        body: MessageBody,
    ) -> Result<Message, HubError> {
        self.request(|reply| Command::RoutePrivate {
            session,
            to,
            body,
            reply,
        })
        .await?
    }

    pub async fn publish_attachment(
        &self,
        session: SessionId,
        room: RoomName,
        attachment: Attachment,
    ) -> Result<Message, HubError> {
        self.request(|reply| Command::PublishAttachment {
            session,
            room,
            attachment,
            reply,
        })
        .await?
    }

    /// Username bound to a session, or [`HubError::NotRegistered`].
    pub async fn require_registered(&self, session: SessionId) -> Result<Username, HubError> {
        self.request(|reply| Command::RequireRegistered { session, reply })
            .await?
    }

    pub async fn history_page(
        &self,
        partition: Partition,
        page: usize,
        page_size: usize,
    ) -> Result<HistoryPage, HubError> {
        self.request(|reply| Command::HistoryPage {
            partition,
            page,
            page_size,
            reply,
        })
        .await
    }

    pub async fn search(
        &self,
        partition: Partition,
        query: impl Into<String>,
    ) -> Result<Vec<Message>, HubError> {
        let query = query.into();
        self.request(|reply| Command::Search {
            partition,
            query,
            reply,
        })
        .await
    }

    pub async fn rooms(&self) -> Result<Vec<RoomSummary>, HubError> {
        self.request(|reply| Command::Rooms { reply }).await
    }

    pub async fn presence(&self) -> Result<PresenceSnapshot, HubError> {
        self.request(|reply| Command::Presence { reply }).await
    }

    /// Copy of a session's state, if it is still live.
    pub async fn session(&self, session: SessionId) -> Result<Option<Session>, HubError> {
        self.request(|reply| Command::Session { session, reply })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ServerEvent;

    #[tokio::test]
    async fn test_connect_greets_session() {
        let hub = HubHandle::spawn(HubConfig::default());
        let (tx, mut rx) = mpsc::channel(8);

        let session = hub.connect(tx).await.unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(ServerEvent::Connected(c)) if c.session_id == session
        ));
        assert_eq!(hub.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_handle_reports_closed_hub() {
        let (commands, receiver) = mpsc::channel(1);
        drop(receiver);
        let hub = HubHandle {
            commands,
            connections: Arc::new(ConnectionRegistry::new()),
            config: Arc::new(HubConfig::default()),
        };

        assert!(matches!(hub.rooms().await, Err(HubError::Closed)));
    }

    #[tokio::test]
    async fn test_session_query_after_disconnect() {
        let hub = HubHandle::spawn(HubConfig::default());
        let (tx, _rx) = mpsc::channel(8);
        let session = hub.connect(tx).await.unwrap();

        assert!(hub.session(session).await.unwrap().is_some());
        hub.disconnect(session).await.unwrap();
        assert!(hub.session(session).await.unwrap().is_none());
        assert_eq!(hub.connection_count(), 0);
    }
}
