//! Auth Gateway seam.
//!
//! Credential checks and token issuance live behind [`AuthGateway`]. The hub
//! only ever sees a verified [`AuthGrant`] or an [`AuthError`].

use async_trait::async_trait;

use crate::error::AuthError;
use crate::types::Username;

/// Credentials presented by a client.
#[derive(Clone)]
pub enum Credentials {
    Password { username: Username, password: String },
    /// A token previously issued by the gateway
    Token(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
        }
    }
}

/// Successful authentication result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub token: String,
    pub username: Username,
}

/// Verifies credentials and issues tokens.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// Create credentials for a new user.
    async fn register(&self, username: &Username, password: &str) -> Result<(), AuthError>;

    /// Verify credentials, returning the identity and a session token.
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthGrant, AuthError>;
}
