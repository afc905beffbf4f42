//! Message history API
//!
//! Read-only views over the hub's archived partitions:
//! - GET /messages?page&limit&room - Reverse-chronological page of a room
//! - GET /search?query&room - Case-insensitive search in a room
//! - GET /rooms - Known rooms with member counts
//!
//! `room` defaults to `general`. Passing `scope=global` reads the global
//! partition instead of a room.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use huddle_hub::history::HistoryPage;
use huddle_hub::rooms::RoomSummary;
use huddle_hub::{Message, Partition, RoomName};
use serde::Deserialize;
use tracing::debug;

use super::ApiError;
use crate::server::AppState;

const DEFAULT_ROOM: &str = "general";
const DEFAULT_PAGE_SIZE: usize = 20;

/// Create the history router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/messages", get(messages_handler))
        .route("/search", get(search_handler))
        .route("/rooms", get(rooms_handler))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub room: Option<String>,
    /// `global` selects the global partition
    pub scope: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
    pub room: Option<String>,
    pub scope: Option<String>,
}

/// Partition named by the `room` and `scope` parameters.
fn partition(room: Option<&str>, scope: Option<&str>) -> Result<Partition, ApiError> {
    if scope == Some("global") {
        return Ok(Partition::Global);
    }
    RoomName::parse(room.unwrap_or(DEFAULT_ROOM))
        .map(Partition::Room)
        .map_err(ApiError::BadRequest)
}

/// GET /messages
async fn messages_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MessagesQuery>,
) -> Result<Json<HistoryPage>, ApiError> {
    let partition = partition(params.room.as_deref(), params.scope.as_deref())?;
    let page = params.page.unwrap_or(1);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    debug!(%partition, page, limit, "History page request");

    Ok(Json(state.hub.history_page(partition, page, limit).await?))
}

/// GET /search
async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let partition = partition(params.room.as_deref(), params.scope.as_deref())?;
    Ok(Json(state.hub.search(partition, params.query).await?))
}

/// GET /rooms
async fn rooms_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RoomSummary>>, ApiError> {
    Ok(Json(state.hub.rooms().await?))
}
