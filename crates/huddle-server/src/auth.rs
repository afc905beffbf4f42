//! Password-based Auth Gateway.
//!
//! ## Security Model
//!
//! - Passwords are hashed with Argon2id and a per-user random salt
//! - Plaintext passwords are never stored
//! - Session tokens are `base64url(username "\n" expiry) "." hex(HMAC-SHA256)`
//!   signed with a server secret, so they can be checked without a lookup
//!
//! Credential storage is in-memory and lives as long as the process.

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use huddle_hub::{AuthError, AuthGateway, AuthGrant, Credentials, Username};
use sha2::Sha256;
use tracing::{debug, info, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Shortest accepted password.
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// In-memory user store with Argon2id hashes and HMAC-signed tokens.
#[derive(Clone)]
pub struct PasswordGateway {
    users: Arc<DashMap<Username, String>>,
    secret: Arc<[u8]>,
    token_ttl_secs: i64,
}

impl std::fmt::Debug for PasswordGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordGateway")
            .field("users", &self.users.len())
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

impl PasswordGateway {
    /// Create a gateway. Without a secret a random one is generated, so
    /// issued tokens stop working after a restart.
    pub fn new(secret: Option<&str>, token_ttl_secs: u64) -> Self {
        let secret: Arc<[u8]> = match secret {
            Some(secret) => Arc::from(secret.as_bytes()),
            None => Arc::from(rand::random::<[u8; 32]>().as_slice()),
        };
        Self {
            users: Arc::new(DashMap::new()),
            secret,
            token_ttl_secs: i64::try_from(token_ttl_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Log a failed attempt without echoing the credentials.
    pub fn log_failure(&self, credentials: &Credentials, err: &AuthError) {
        match credentials {
            Credentials::Password { username, .. } => {
                warn!(username = %username, error = %err, "Authentication failed");
            }
            Credentials::Token(_) => warn!(error = %err, "Token authentication failed"),
        }
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AuthError::Internal(format!("Invalid token secret: {}", e)))
    }

    /// Issue a signed token for `username`.
    pub fn issue_token(&self, username: &Username) -> Result<String, AuthError> {
        let expires_at = Utc::now().timestamp().saturating_add(self.token_ttl_secs);
        let payload = URL_SAFE_NO_PAD.encode(format!("{}\n{}", username, expires_at));

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", payload, signature))
    }

    /// Check a token's signature and expiry, returning its username.
    pub fn verify_token(&self, token: &str) -> Result<Username, AuthError> {
        let (payload, signature) = token.split_once('.').ok_or(AuthError::InvalidToken)?;
        let signature = hex::decode(signature).map_err(|_| AuthError::InvalidToken)?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::InvalidToken)?;

        let decoded = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthError::InvalidToken)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::InvalidToken)?;
        let (username, expires_at) = decoded.split_once('\n').ok_or(AuthError::InvalidToken)?;
        let expires_at: i64 = expires_at.parse().map_err(|_| AuthError::InvalidToken)?;

        if expires_at <= Utc::now().timestamp() {
            return Err(AuthError::TokenExpired);
        }
        Username::parse(username).map_err(|_| AuthError::InvalidToken)
    }

    async fn verify_password(&self, username: &Username, password: &str) -> Result<(), AuthError> {
        let Some(stored) = self.users.get(username).map(|entry| entry.value().clone()) else {
            debug!(username = %username, "Login for unknown user");
            return Err(AuthError::InvalidCredentials);
        };

        let password = password.to_string();
        let verified = tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&stored)
                .map_err(|e| AuthError::Internal(format!("Corrupt password hash: {}", e)))?;
            Ok::<bool, AuthError>(
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok(),
            )
        })
        .await
        .map_err(|e| AuthError::Internal(format!("Password check task failed: {}", e)))??;

        if verified {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Internal(format!("Failed to hash password: {}", e)))
}

#[async_trait]
impl AuthGateway for PasswordGateway {
    #[instrument(skip(self, password), fields(username = %username))]
    async fn register(&self, username: &Username, password: &str) -> Result<(), AuthError> {
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::InvalidPassword(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        if self.users.contains_key(username) {
            return Err(AuthError::UserAlreadyExists(username.to_string()));
        }

        let owned = password.to_string();
        let hash = tokio::task::spawn_blocking(move || hash_password(&owned))
            .await
            .map_err(|e| AuthError::Internal(format!("Password hash task failed: {}", e)))??;

        match self.users.entry(username.clone()) {
            Entry::Occupied(_) => Err(AuthError::UserAlreadyExists(username.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(hash);
                info!("User credentials created");
                Ok(())
            }
        }
    }

    #[instrument(skip(self, credentials))]
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthGrant, AuthError> {
        let username = match credentials {
            Credentials::Password { username, password } => {
                self.verify_password(username, password).await?;
                username.clone()
            }
            Credentials::Token(token) => self.verify_token(token)?,
        };

        let token = self.issue_token(&username)?;
        debug!(username = %username, "Authentication succeeded");
        Ok(AuthGrant { token, username })
    }
}
