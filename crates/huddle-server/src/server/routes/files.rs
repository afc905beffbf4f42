//! Uploaded file API
//!
//! - GET /file-info/:filename - Metadata of a stored upload
//! - GET /uploads/:filename - Raw bytes of a stored upload
//!
//! Uploads themselves arrive over the WebSocket as `file_upload` events.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use huddle_hub::{BlobError, BlobMeta};
use tracing::{debug, error, info, instrument, warn};

use super::ApiError;
use crate::server::AppState;

/// Create the files router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/file-info/:filename", get(file_info_handler))
        .route("/uploads/:filename", get(download_handler))
        .with_state(state)
}

fn blob_error(err: BlobError) -> ApiError {
    match err {
        BlobError::NotFound(key) | BlobError::InvalidKey(key) => {
            ApiError::NotFound(format!("File '{}' not found", key))
        }
        BlobError::Backend(msg) => {
            error!("Blob store failure: {}", msg);
            ApiError::Internal("Failed to read file".to_string())
        }
    }
}

/// Content type guessed from the file extension.
fn content_type(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        "json" => "application/json",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// GET /file-info/:filename
async fn file_info_handler(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Json<BlobMeta>, ApiError> {
    debug!("File info request for {}", filename);
    state.blobs.head(&filename).await.map(Json).map_err(blob_error)
}

/// GET /uploads/:filename
///
/// Stored keys carry a timestamp and random suffix, so content never changes
/// for a given name and may be cached indefinitely.
#[instrument(skip(state))]
async fn download_handler(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let contents = state.blobs.get(&filename).await.map_err(|err| {
        warn!("Download of {} failed: {}", filename, err);
        blob_error(err)
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(content_type(&filename)),
    );
    if let Ok(content_length) = contents.len().to_string().parse() {
        headers.insert(header::CONTENT_LENGTH, content_length);
    }
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("public, max-age=31536000, immutable"),
    );

    info!("Serving file: {} ({} bytes)", filename, contents.len());
    Ok((StatusCode::OK, headers, contents).into_response())
}
