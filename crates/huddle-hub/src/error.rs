//! Error types for the hub.

use thiserror::Error;

/// Errors returned by hub operations.
///
/// None of these are fatal to the process. A failed operation leaves the
/// presence registry, room directory and history store untouched.
#[derive(Debug, Error)]
pub enum HubError {
    /// The session id does not belong to a live session
    #[error("Session not found")]
    SessionNotFound,

    /// The operation needs a bound identity
    #[error("Session is not registered")]
    NotRegistered,

    /// Another live session already owns this username
    #[error("Username already registered: {0}")]
    AlreadyRegistered(String),

    /// Sender tried to post into a room it has not joined
    #[error("Not a member of room: {0}")]
    NotRoomMember(String),

    /// Private message addressed to a username with no live session
    #[error("Recipient offline: {0}")]
    RecipientOffline(String),

    /// Payload failed validation at the boundary
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Auth Gateway rejected the request
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The hub actor is no longer running
    #[error("Hub is shut down")]
    Closed,
}

impl HubError {
    /// Create a new invalid payload error.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }
}

/// Errors surfaced by an [`AuthGateway`](crate::auth::AuthGateway).
///
/// Messages are safe to show to the requesting client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User already exists: {0}")]
    UserAlreadyExists(String),

    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Authentication service error: {0}")]
    Internal(String),
}

/// Errors from a [`BlobStore`](crate::blob::BlobStore).
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Errors from file ingestion.
///
/// Delivered only to the uploader through its acknowledgment, never broadcast.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Uploaded file is empty")]
    EmptyPayload,

    #[error("File too large. Maximum size is {max_size} bytes.")]
    TooLarge { max_size: usize },

    #[error("File payload is not valid base64")]
    InvalidEncoding,

    #[error("Invalid room name: {0}")]
    InvalidRoom(String),

    #[error("Uploader is not registered")]
    NotRegistered,

    #[error("Storage error: {0}")]
    Storage(#[from] BlobError),

    #[error(transparent)]
    Hub(HubError),
}

impl From<HubError> for IngestError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::NotRegistered | HubError::SessionNotFound => IngestError::NotRegistered,
            other => IngestError::Hub(other),
        }
    }
}
