//! # huddle-hub
//!
//! Real-time group messaging engine for Huddle.
//!
//! The hub tracks live sessions, binds them to display identities, manages
//! room membership and routes chat into global, room and private targets.
//! Global and room traffic is archived per partition and can be paged and
//! searched.
//!
//! ## Architecture
//!
//! - **Hub actor**: one tokio task owns all chat state and applies commands
//!   in arrival order ([`HubHandle`])
//! - **Connection Registry**: outbound queue per session for fan-out
//! - **Auth Gateway** and **Blob Store**: async seams awaited outside the
//!   hub task ([`AuthGateway`], [`BlobStore`])
//! - **File Ingest**: stores uploads, then publishes them as attachments
//!
//! Transport (WebSocket, HTTP) lives in `huddle-server`.

pub mod auth;
pub mod blob;
pub mod config;
pub mod events;
pub mod history;
pub mod hub;
pub mod ingest;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod types;

mod error;

pub use auth::{AuthGateway, AuthGrant, Credentials};
pub use blob::{BlobMeta, BlobStore, ObjectBlobStore};
pub use config::{
    HubConfig, OfflinePolicy, ReconnectPolicy, RegistrationPolicy, RetentionPolicy, RoomSendPolicy,
};
pub use error::{AuthError, BlobError, HubError, IngestError};
pub use events::{ClientEvent, ServerEvent};
pub use history::HistoryPage;
pub use hub::{Hub, HubHandle, RoomDelivery, Session, SessionState};
pub use ingest::FileIngest;
pub use types::*;
