//! File Ingest
//!
//! Validates an upload, writes it to the [`BlobStore`] and only then asks the
//! hub to publish it as an attachment message. The blob write happens in the
//! caller's task, so a slow store never holds up the hub. A failed write
//! publishes nothing, and a blob whose publish fails is deleted again.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::blob::{is_key_char, BlobStore};
use crate::error::{HubError, IngestError};
use crate::events::{FileNotice, FileUpload, UploadResult};
use crate::hub::HubHandle;
use crate::types::{Attachment, Message, RoomName, SessionId, Target};

/// Replacement for names that sanitize to nothing usable.
const FALLBACK_NAME: &str = "file";

/// Strip every character outside `[A-Za-z0-9._-]`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| is_key_char(*c)).collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

/// Blob key for an upload: a time and random prefix, then the sanitized name.
pub fn storage_key(proposed_name: &str) -> String {
    let token = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        Utc::now().timestamp_millis(),
        &token[..8],
        sanitize_filename(proposed_name)
    )
}

/// Decode a base64 payload, accepting an optional `data:` URL header.
pub fn decode_payload(encoded: &str) -> Result<Bytes, IngestError> {
    let data = match encoded.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or(IngestError::InvalidEncoding)?,
        None => encoded,
    };
    STANDARD
        .decode(data.trim())
        .map(Bytes::from)
        .map_err(|_| IngestError::InvalidEncoding)
}

/// Turns uploads into stored blobs and attachment messages.
#[derive(Clone)]
pub struct FileIngest {
    hub: HubHandle,
    blobs: Arc<dyn BlobStore>,
    max_bytes: usize,
    url_prefix: String,
}

impl std::fmt::Debug for FileIngest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIngest")
            .field("max_bytes", &self.max_bytes)
            .field("url_prefix", &self.url_prefix)
            .finish()
    }
}

impl FileIngest {
    /// Limits and URL prefix come from the hub's config.
    pub fn new(hub: HubHandle, blobs: Arc<dyn BlobStore>) -> Self {
        let max_bytes = hub.config().max_upload_bytes;
        let url_prefix = hub.config().upload_url_prefix.trim_end_matches('/').to_string();
        Self {
            hub,
            blobs,
            max_bytes,
            url_prefix,
        }
    }

    /// Store `bytes` and publish them to `room` as an attachment.
    #[instrument(skip(self, bytes), fields(session = %session, size = bytes.len()))]
    pub async fn ingest(
        &self,
        session: SessionId,
        room: Option<&str>,
        bytes: Bytes,
        proposed_name: Option<&str>,
    ) -> Result<Message, IngestError> {
        let room = room
            .filter(|r| !r.trim().is_empty())
            .ok_or(IngestError::MissingField("room"))?;
        let room = RoomName::parse(room).map_err(IngestError::InvalidRoom)?;
        let proposed_name = proposed_name
            .filter(|n| !n.trim().is_empty())
            .ok_or(IngestError::MissingField("fileName"))?;
        if bytes.is_empty() {
            return Err(IngestError::EmptyPayload);
        }
        if bytes.len() > self.max_bytes {
            return Err(IngestError::TooLarge {
                max_size: self.max_bytes,
            });
        }
        self.hub.require_registered(session).await?;

        let key = storage_key(proposed_name);
        if let Err(err) = self.blobs.put(&key, bytes).await {
            warn!(key = %key, error = %err, "Blob write failed, nothing published");
            return Err(err.into());
        }

        let attachment = Attachment {
            url: format!("{}/{}", self.url_prefix, key),
            name: proposed_name.to_string(),
        };
        let message = match self.hub.publish_attachment(session, room, attachment).await {
            Ok(message) => message,
            Err(err) => {
                // uploader left while the blob was being written
                warn!(key = %key, error = %err, "Publish failed, removing stored blob");
                if let Err(e) = self.blobs.delete(&key).await {
                    warn!(key = %key, error = %e, "Orphaned blob could not be removed");
                }
                return Err(err.into());
            }
        };
        info!(key = %key, id = %message.id, "File ingested");
        Ok(message)
    }

    /// Handle a `file_upload` event and build the uploader's acknowledgment.
    pub async fn handle_upload(&self, session: SessionId, upload: FileUpload) -> UploadResult {
        let request_id = upload.request_id.clone();
        match self.ingest_event(session, upload).await {
            Ok(file) => UploadResult {
                request_id,
                ok: true,
                file: Some(file),
                error: None,
            },
            Err(err) => UploadResult {
                request_id,
                ok: false,
                file: None,
                error: Some(err.to_string()),
            },
        }
    }

    async fn ingest_event(
        &self,
        session: SessionId,
        upload: FileUpload,
    ) -> Result<FileNotice, IngestError> {
        let encoded = upload
            .file
            .as_deref()
            .filter(|f| !f.is_empty())
            .ok_or(IngestError::EmptyPayload)?;
        // room for a data: URL header, then 4 base64 chars per 3 bytes
        if encoded.len().saturating_sub(256) / 4 * 3 > self.max_bytes {
            return Err(IngestError::TooLarge {
                max_size: self.max_bytes,
            });
        }
        let bytes = decode_payload(encoded)?;

        let message = self
            .ingest(
                session,
                upload.room.as_deref(),
                bytes,
                upload.file_name.as_deref(),
            )
            .await?;
        notice_for(message).ok_or_else(|| {
            HubError::invalid_payload("attachment message without file reference").into()
        })
    }
}

/// Rebuild the `new_file` payload from a published attachment message.
fn notice_for(message: Message) -> Option<FileNotice> {
    let room = match message.target {
        Target::Room { room } => room,
        _ => return None,
    };
    let attachment = message.attachment?;
    Some(FileNotice {
        id: message.id,
        url: attachment.url,
        name: attachment.name,
        sender: message.sender?,
        room,
        timestamp: message.timestamp,
    })
}
