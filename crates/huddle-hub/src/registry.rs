//! Connection Registry
//!
//! Tracks the outbound channel of every live session for event delivery.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::events::ServerEvent;
use crate::types::SessionId;

/// Sending half of a connection's outbound queue.
pub type Outbound = mpsc::Sender<ServerEvent>;

/// Result of attempting to deliver an event to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Event was queued for delivery
    Sent,
    /// The session has no registered channel
    NotConnected,
    /// The connection's queue is full; the event was dropped
    ChannelFull,
    /// The connection's queue is closed
    ChannelClosed,
}

/// Registry of outbound channels.
///
/// Writes come from the hub actor only; reads (counts) may come from anywhere.
/// Delivery uses `try_send`, so a slow client never stalls the hub.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<SessionId, Outbound>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the outbound channel of a session, replacing any previous one.
    #[instrument(skip(self, sender), fields(session = %session))]
    pub fn register(&self, session: SessionId, sender: Outbound) {
        if self.connections.insert(session, sender).is_some() {
            debug!("Replaced existing connection registration");
        } else {
            debug!("Registered new connection");
        }
    }

    /// Drop the outbound channel of a session.
    #[instrument(skip(self), fields(session = %session))]
    pub fn unregister(&self, session: SessionId) -> bool {
        let removed = self.connections.remove(&session).is_some();
        if !removed {
            debug!("Connection was not registered");
        }
        removed
    }

    pub fn is_connected(&self, session: SessionId) -> bool {
        self.connections.contains_key(&session)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Deliver an event to one session.
    pub fn send_to(&self, session: SessionId, event: ServerEvent) -> SendResult {
        let sender = match self.connections.get(&session) {
            Some(entry) => entry.value().clone(),
            None => {
                debug!(session = %session, "Recipient not connected");
                return SendResult::NotConnected;
            }
        };
        Self::deliver(session, &sender, event)
    }

    /// Deliver an event to each listed session.
    pub fn send_to_many<I>(&self, sessions: I, event: &ServerEvent) -> usize
    where
        I: IntoIterator<Item = SessionId>,
    {
        sessions
            .into_iter()
            .filter(|session| self.send_to(*session, event.clone()) == SendResult::Sent)
            .count()
    }

    /// Deliver an event to every connection, optionally skipping one.
    pub fn broadcast(&self, event: &ServerEvent, except: Option<SessionId>) -> usize {
        let targets: Vec<(SessionId, Outbound)> = self
            .connections
            .iter()
            .filter(|entry| Some(*entry.key()) != except)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        targets
            .into_iter()
            .filter(|(session, sender)| {
                Self::deliver(*session, sender, event.clone()) == SendResult::Sent
            })
            .count()
    }

    fn deliver(session: SessionId, sender: &Outbound, event: ServerEvent) -> SendResult {
        let name = event.name();
        match sender.try_send(event) {
            Ok(()) => SendResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session = %session, event = name, "Outbound channel full, dropping event");
                SendResult::ChannelFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session = %session, event = name, "Outbound channel closed");
                SendResult::ChannelClosed
            }
        }
    }
}
