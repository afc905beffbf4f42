//! Core value types shared by every hub component.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum message body length in characters.
pub const MAX_BODY_LENGTH: usize = 4000;

/// Maximum username length in characters.
pub const MAX_USERNAME_LENGTH: usize = 32;

/// Maximum room name length in characters.
pub const MAX_ROOM_NAME_LENGTH: usize = 64;

/// Identifier of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Trim `raw` and check it against a length limit, rejecting control characters.
fn validated_name(raw: String, what: &str, max: usize) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(format!("{} must not be empty", what));
    }
    if trimmed.chars().count() > max {
        return Err(format!("{} exceeds {} characters", what, max));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(format!("{} contains control characters", what));
    }
    Ok(trimmed.to_string())
}

/// A display identity. Primary key for presence and private addressing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Validate and construct a username.
    pub fn parse(raw: impl Into<String>) -> Result<Self, String> {
        validated_name(raw.into(), "username", MAX_USERNAME_LENGTH).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a room. Rooms are created on first use and live for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName(String);

impl RoomName {
    /// Validate and construct a room name.
    pub fn parse(raw: impl Into<String>) -> Result<Self, String> {
        validated_name(raw.into(), "room name", MAX_ROOM_NAME_LENGTH).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RoomName> for String {
    fn from(value: RoomName) -> Self {
        value.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated chat message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageBody(String);

impl MessageBody {
    /// Validate a body: non-blank and at most [`MAX_BODY_LENGTH`] characters.
    ///
    /// Surrounding whitespace is kept; only the emptiness check ignores it.
    pub fn parse(raw: impl Into<String>) -> Result<Self, String> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err("message must not be empty".to_string());
        }
        if raw.chars().count() > MAX_BODY_LENGTH {
            return Err(format!("message exceeds {} characters", MAX_BODY_LENGTH));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for MessageBody {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<MessageBody> for String {
    fn from(value: MessageBody) -> Self {
        value.0
    }
}

/// Advertised availability of a registered identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    Online,
    Away,
    Offline,
}

/// A username bound to a live session, with its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: Username,
    pub status: PresenceStatus,
}

/// Where a message is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Target {
    /// Every connection
    Global,
    /// Members of one room
    Room { room: RoomName },
    /// A single identity, delivered live only
    Private { to: Username },
}

impl Target {
    /// History partition this target archives into. Private messages have none.
    pub fn partition(&self) -> Option<Partition> {
        match self {
            Target::Global => Some(Partition::Global),
            Target::Room { room } => Some(Partition::Room(room.clone())),
            Target::Private { .. } => None,
        }
    }
}

/// Key of one ordered history log (and of one typing scope).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Partition {
    Global,
    Room(RoomName),
}

impl Partition {
    /// Room name for room partitions, `None` for the global one.
    pub fn room(&self) -> Option<&RoomName> {
        match self {
            Partition::Global => None,
            Partition::Room(room) => Some(room),
        }
    }
}

impl From<Option<RoomName>> for Partition {
    fn from(room: Option<RoomName>) -> Self {
        room.map_or(Partition::Global, Partition::Room)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Global => f.write_str("global"),
            Partition::Room(room) => write!(f, "room:{}", room),
        }
    }
}

/// A file reference carried by an attachment message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    /// Name as proposed by the uploader, before sanitization
    pub name: String,
}

/// A routed chat message. Immutable once stamped by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Globally unique message id
    pub id: Uuid,
    /// `None` for system notices
    pub sender: Option<Username>,
    #[serde(rename = "message")]
    pub body: String,
    /// Display only; ordering comes from the partition
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub target: Target,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl Message {
    /// Whether this is a system notice rather than user chat.
    pub fn is_system(&self) -> bool {
        self.sender.is_none()
    }
}
