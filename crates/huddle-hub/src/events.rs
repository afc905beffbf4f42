//! Wire events exchanged with clients.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": <payload>}`.
//! Inbound payloads are validated by serde (through the newtypes in
//! [`crate::types`]) before anything reaches hub state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Identity, Message, MessageBody, PresenceStatus, RoomName, SessionId, Username};

/// Online identities keyed by session.
pub type PresenceSnapshot = BTreeMap<SessionId, Identity>;

/// Events a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Bind a plain display identity
    RegisterUser(RegisterUser),
    /// Create credentials with the Auth Gateway
    Register(PasswordCredentials),
    /// Authenticate with username and password
    Login(PasswordCredentials),
    /// Authenticate with a previously issued token
    ResumeSession(TokenCredentials),
    /// Global chat, or room chat when `room` is set
    SendMessage(SendMessage),
    RoomMessage(RoomChat),
    PrivateMessage(PrivateChat),
    JoinRoom(RoomName),
    LeaveRoom(RoomName),
    Typing(TypingEvent),
    FileUpload(FileUpload),
    UpdateStatus(PresenceStatus),
    GetUserStatus,
    /// Ask for the global backlog
    RequestMessages,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUser {
    pub username: Username,
}

#[derive(Clone, Deserialize)]
pub struct PasswordCredentials {
    pub username: Username,
    pub password: String,
}

impl std::fmt::Debug for PasswordCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct TokenCredentials {
    pub token: String,
}

impl std::fmt::Debug for TokenCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCredentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessage {
    pub message: MessageBody,
    #[serde(default)]
    pub room: Option<RoomName>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomChat {
    pub room: RoomName,
    pub message: MessageBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrivateChat {
    pub to: Username,
    pub message: MessageBody,
}

/// Typing indicator change. Any `username` sent by the client is ignored;
/// the session's bound identity is used instead.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub is_typing: bool,
    #[serde(default)]
    pub room: Option<RoomName>,
}

/// Upload request. Fields are optional here so that missing ones are
/// reported through the upload acknowledgment instead of a parse error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpload {
    /// Base64 payload, optionally as a `data:` URL
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
    /// Echoed back in `upload_result`
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Events the hub sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected(Connected),
    RegisterSuccess,
    LoginSuccess(LoginSuccess),
    AuthError(ErrorPayload),
    ReceiveMessage(Message),
    RoomMessage(Message),
    PrivateMessage(PrivateDelivery),
    RoomUpdate(RoomUpdate),
    Typing(TypingUpdate),
    UploadResult(UploadResult),
    NewFile(FileNotice),
    UserStatusUpdate(PresenceSnapshot),
    UserJoined(IdentityNotice),
    UserLeft(IdentityNotice),
    LoadMessages(Vec<Message>),
    SessionReplaced(SessionReplaced),
    DeliveryFailed(DeliveryFailed),
    Error(ErrorPayload),
}

impl ServerEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "connected",
            ServerEvent::RegisterSuccess => "register_success",
            ServerEvent::LoginSuccess(_) => "login_success",
            ServerEvent::AuthError(_) => "auth_error",
            ServerEvent::ReceiveMessage(_) => "receive_message",
            ServerEvent::RoomMessage(_) => "room_message",
            ServerEvent::PrivateMessage(_) => "private_message",
            ServerEvent::RoomUpdate(_) => "room_update",
            ServerEvent::Typing(_) => "typing",
            ServerEvent::UploadResult(_) => "upload_result",
            ServerEvent::NewFile(_) => "new_file",
            ServerEvent::UserStatusUpdate(_) => "user_status_update",
            ServerEvent::UserJoined(_) => "user_joined",
            ServerEvent::UserLeft(_) => "user_left",
            ServerEvent::LoadMessages(_) => "load_messages",
            ServerEvent::SessionReplaced(_) => "session_replaced",
            ServerEvent::DeliveryFailed(_) => "delivery_failed",
            ServerEvent::Error(_) => "error",
        }
    }

    /// Convenience constructor for an `error` event.
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginSuccess {
    pub token: String,
    pub username: Username,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// What the recipient of a private message sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateDelivery {
    pub id: Uuid,
    pub from: Username,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Room sync sent to a session that joined a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomUpdate {
    pub room: RoomName,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub username: Username,
    pub is_typing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomName>,
    /// Everyone currently typing in this scope
    pub typing: Vec<Username>,
}

/// Attachment delivery, also returned to the uploader in its acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNotice {
    pub id: Uuid,
    pub url: String,
    pub name: String,
    pub sender: Username,
    pub room: RoomName,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileNotice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Join/leave notification: the username plus a system message for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityNotice {
    pub username: Username,
    pub notice: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReplaced {
    pub username: Username,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryFailed {
    pub to: Username,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_message_with_room() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"event": "send_message", "data": {"message": "hi", "room": "general"}}"#,
        )
        .unwrap();

        match event {
            ClientEvent::SendMessage(send) => {
                assert_eq!(send.message.as_str(), "hi");
                assert_eq!(send.room.unwrap().as_str(), "general");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unit_event_without_data() {
        let event: ClientEvent = serde_json::from_str(r#"{"event": "get_user_status"}"#).unwrap();
        assert!(matches!(event, ClientEvent::GetUserStatus));
    }

    #[test]
    fn test_parse_join_room_bare_string() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event": "join_room", "data": "general"}"#).unwrap();
        assert!(matches!(event, ClientEvent::JoinRoom(room) if room.as_str() == "general"));
    }

    #[test]
    fn test_malformed_payloads_are_rejected() {
        // empty body
        assert!(serde_json::from_str::<ClientEvent>(
            r#"{"event": "send_message", "data": {"message": "  "}}"#
        )
        .is_err());
        // missing recipient
        assert!(serde_json::from_str::<ClientEvent>(
            r#"{"event": "private_message", "data": {"message": "hi"}}"#
        )
        .is_err());
        // unknown event
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event": "explode"}"#).is_err());
    }

    #[test]
    fn test_typing_uses_camel_case() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"event": "typing", "data": {"username": "spoofed", "isTyping": true}}"#,
        )
        .unwrap();
        assert!(matches!(event, ClientEvent::Typing(t) if t.is_typing && t.room.is_none()));
    }

    #[test]
    fn test_file_upload_fields_are_optional() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event": "file_upload", "data": {"fileName": "a.txt"}}"#)
                .unwrap();
        match event {
            ClientEvent::FileUpload(upload) => {
                assert_eq!(upload.file_name.as_deref(), Some("a.txt"));
                assert!(upload.file.is_none());
                assert!(upload.room.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds: PasswordCredentials =
            serde_json::from_str(r#"{"username": "alice", "password": "hunter2"}"#).unwrap();
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_server_event_envelope() {
        let event = ServerEvent::error("boom");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["data"]["message"], "boom");
        assert_eq!(event.name(), "error");

        let json = serde_json::to_value(ServerEvent::RegisterSuccess).unwrap();
        assert_eq!(json["event"], "register_success");
    }
}
