use crate::auth::PasswordGateway;
use crate::config::ServerConfig;
use anyhow::{Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use huddle_hub::{BlobStore, FileIngest, HubHandle, ObjectBlobStore};
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

pub mod routes;

/// Server application state
pub struct AppState {
    /// Handle to the hub actor
    pub hub: HubHandle,
    /// Upload pipeline shared by every connection
    pub ingest: FileIngest,
    pub auth: Arc<PasswordGateway>,
    pub blobs: Arc<dyn BlobStore>,
    pub config: ServerConfig,
}

impl AppState {
    /// Build state with files stored under `config.upload_dir`.
    pub fn new(config: ServerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.upload_dir).with_context(|| {
            format!(
                "Failed to create upload directory {}",
                config.upload_dir.display()
            )
        })?;
        let blobs = ObjectBlobStore::local(&config.upload_dir)
            .context("Failed to open upload directory")?;
        Ok(Self::with_blobs(config, Arc::new(blobs)))
    }

    /// Build state around an existing blob store. Spawns the hub actor.
    pub fn with_blobs(config: ServerConfig, blobs: Arc<dyn BlobStore>) -> Self {
        let hub = HubHandle::spawn(config.hub.clone());
        let ingest = FileIngest::new(hub.clone(), blobs.clone());
        let auth = Arc::new(PasswordGateway::new(
            config.token_secret.as_deref(),
            config.token_ttl_secs,
        ));
        Self {
            hub,
            ingest,
            auth,
            blobs,
            config,
        }
    }
}

/// Start the HTTP server and serve until Ctrl-C.
pub async fn start(config: ServerConfig) -> Result<()> {
    let addr = config.bind;
    let state = Arc::new(AppState::new(config)?);

    let app = create_router(state);

    info!("Starting Axum HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

/// Create the Axum router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    let history_router = routes::history::router(state.clone());
    let files_router = routes::files::router(state.clone());
    let websocket_router = routes::websocket::router(state.clone());

    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
        .merge(history_router)
        .merge(files_router)
        .merge(websocket_router)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}

/// Liveness check (for load balancers)
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "huddle-server",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.hub.connection_count(),
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// State backed by a fresh upload directory. Keep the `TempDir` alive
    /// for the duration of the test.
    pub(crate) async fn create_test_state() -> (Arc<AppState>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(ServerConfig::test(dir.path())).unwrap();
        (Arc::new(state), dir)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _dir) = create_test_state().await;
        let app = create_router(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "huddle-server");
        assert_eq!(json["connections"], 0);
    }

    #[tokio::test]
    async fn test_upload_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("uploads");

        AppState::new(ServerConfig::test(&nested)).unwrap();

        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let (state, _dir) = create_test_state().await;
        let app = create_router(state);

        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
