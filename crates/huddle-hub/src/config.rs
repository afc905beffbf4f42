//! Hub tuning and the named behavior policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum upload size (10 MB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Default reconnect grace window (2 minutes).
pub const DEFAULT_RECONNECT_GRACE_SECS: u64 = 2 * 60;

/// What happens when a username is registered while another session holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPolicy {
    /// Last registration wins. The displaced session drops back to anonymous.
    #[default]
    ReplaceExisting,
    /// The second registration fails with `AlreadyRegistered`.
    RejectDuplicate,
}

impl RegistrationPolicy {
    /// Parse a policy name. Unknown values yield `None`.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "replace" | "replace_existing" | "overwrite" => Some(Self::ReplaceExisting),
            "reject" | "reject_duplicate" => Some(Self::RejectDuplicate),
            _ => None,
        }
    }
}

/// What happens to a private message whose recipient is not online.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflinePolicy {
    /// Dropped and logged. Nobody receives an event.
    #[default]
    Drop,
    /// Dropped, and the sender receives `delivery_failed`.
    NotifySender,
}

impl OfflinePolicy {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "drop" => Some(Self::Drop),
            "notify" | "notify_sender" => Some(Self::NotifySender),
            _ => None,
        }
    }
}

/// Who may post into a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomSendPolicy {
    /// Only sessions that joined the room.
    #[default]
    MembersOnly,
    /// Any registered session.
    Open,
}

impl RoomSendPolicy {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "members" | "members_only" => Some(Self::MembersOnly),
            "open" => Some(Self::Open),
            _ => None,
        }
    }
}

/// How much history each partition keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep everything for the process lifetime.
    #[default]
    Unbounded,
    /// Keep the newest `limit` messages per partition.
    MaxMessages { limit: usize },
}

/// Whether an identity that drops its connection gets its rooms back when it
/// authenticates again.
///
/// Presence and membership are still cleaned up at disconnect; only the room
/// list is remembered, keyed by username.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Rooms are forgotten at disconnect.
    Disabled,
    /// Rooms are rejoined on `login` or `resume_session` within `secs`.
    GraceWindow { secs: u64 },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::GraceWindow {
            secs: DEFAULT_RECONNECT_GRACE_SECS,
        }
    }
}

impl ReconnectPolicy {
    /// Grace window, or `None` when disabled.
    pub fn window(&self) -> Option<Duration> {
        match self {
            Self::Disabled => None,
            Self::GraceWindow { secs } => Some(Duration::from_secs(*secs)),
        }
    }
}

/// Hub configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub registration: RegistrationPolicy,
    pub offline: OfflinePolicy,
    pub room_send: RoomSendPolicy,
    pub retention: RetentionPolicy,
    pub reconnect: ReconnectPolicy,
    /// Upper bound for history page sizes
    pub max_page_size: usize,
    /// Capacity of the hub command queue
    pub command_buffer: usize,
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
    /// Largest accepted upload, in bytes
    pub max_upload_bytes: usize,
    /// Prefix of attachment URLs
    pub upload_url_prefix: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            registration: RegistrationPolicy::default(),
            offline: OfflinePolicy::default(),
            room_send: RoomSendPolicy::default(),
            retention: RetentionPolicy::default(),
            reconnect: ReconnectPolicy::default(),
            max_page_size: 100,
            command_buffer: 1024,
            outbound_buffer: 256,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            upload_url_prefix: "/uploads".to_string(),
        }
    }
}
