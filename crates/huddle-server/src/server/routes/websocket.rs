//! Real-time event channel
//!
//! One WebSocket per session. Frames are JSON `{"event", "data"}` objects in
//! both directions. Everything addressed to a session, whether queued by the
//! hub or replied here, goes through the same outbound queue so the client
//! sees events in the order they were produced.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use huddle_hub::events::{ErrorPayload, LoginSuccess};
use huddle_hub::{
    AuthGateway, ClientEvent, Credentials, HubError, RoomDelivery, ServerEvent, SessionId,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::server::AppState;

/// Headroom over the base64-expanded upload limit for the JSON envelope.
const FRAME_OVERHEAD: usize = 64 * 1024;

/// Create the WebSocket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

/// GET /ws
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let max_frame = state.config.hub.max_upload_bytes / 3 * 4 + FRAME_OVERHEAD;
    debug!(max_frame, "WebSocket connection request");

    ws.max_message_size(max_frame)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one connection until either side closes it.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.hub.outbound_buffer.max(1));

    let session = match state.hub.connect(tx.clone()).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to open session");
            return;
        }
    };
    info!(session = %session, "WebSocket connection established");

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!(event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(text)).await {
                debug!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(reply) = handle_frame(&state, session, &text).await {
                    if tx.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(session = %session, "Received binary WebSocket message (not supported)");
                if tx
                    .send(ServerEvent::error("Binary frames are not supported"))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(session = %session, "WebSocket close requested");
                break;
            }
            Err(e) => {
                warn!(session = %session, error = %e, "WebSocket error");
                break;
            }
        }
    }

    if let Err(e) = state.hub.disconnect(session).await {
        warn!(session = %session, error = %e, "Disconnect failed");
    }
    writer.abort();
    info!(session = %session, "WebSocket connection closed");
}

/// Parse one text frame and dispatch it.
pub async fn handle_frame(state: &AppState, session: SessionId, text: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => dispatch(state, session, event).await,
        Err(e) => {
            debug!(session = %session, error = %e, "Rejected malformed frame");
            Some(ServerEvent::error(format!("Invalid event: {}", e)))
        }
    }
}

/// Apply a client event. Returns the direct reply, if any; broadcasts and
/// hub-originated replies are queued by the hub itself.
pub async fn dispatch(state: &AppState, session: SessionId, event: ClientEvent) -> Option<ServerEvent> {
    let hub = &state.hub;
    let result = match event {
        ClientEvent::RegisterUser(request) => hub.register(session, request.username).await,
        ClientEvent::Register(request) => {
            return Some(
                match state.auth.register(&request.username, &request.password).await {
                    Ok(()) => ServerEvent::RegisterSuccess,
                    Err(e) => auth_error(e.to_string()),
                },
            );
        }
        ClientEvent::Login(request) => {
            let credentials = Credentials::Password {
                username: request.username,
                password: request.password,
            };
            return Some(login(state, session, credentials).await);
        }
        ClientEvent::ResumeSession(request) => {
            return Some(login(state, session, Credentials::Token(request.token)).await);
        }
        ClientEvent::SendMessage(request) => match request.room {
            Some(room) => hub
                .send_room(session, room, request.message, RoomDelivery::ReceiveMessage)
                .await
                .map(drop),
            None => hub.send_global(session, request.message).await.map(drop),
        },
        ClientEvent::RoomMessage(request) => hub
            .send_room(session, request.room, request.message, RoomDelivery::RoomMessage)
            .await
            .map(drop),
        ClientEvent::PrivateMessage(request) => {
            match hub.send_private(session, request.to, request.message).await {
                // handled by the hub's offline policy
                Err(HubError::RecipientOffline(_)) => Ok(()),
                other => other.map(drop),
            }
        }
        ClientEvent::JoinRoom(room) => hub.join_room(session, room).await.map(drop),
        ClientEvent::LeaveRoom(room) => hub.leave_room(session, room).await,
        ClientEvent::Typing(request) => {
            hub.set_typing(session, request.room, request.is_typing)
                .await
        }
        ClientEvent::FileUpload(upload) => {
            return Some(ServerEvent::UploadResult(
                state.ingest.handle_upload(session, upload).await,
            ));
        }
        ClientEvent::UpdateStatus(status) => hub.set_status(session, status).await,
        ClientEvent::GetUserStatus => hub.send_presence(session).await,
        ClientEvent::RequestMessages => hub.send_backlog(session).await,
    };

    match result {
        Ok(()) => None,
        Err(e) => {
            debug!(session = %session, error = %e, "Event rejected");
            Some(ServerEvent::error(e.to_string()))
        }
    }
}

async fn login(state: &AppState, session: SessionId, credentials: Credentials) -> ServerEvent {
    match state
        .hub
        .authenticate(state.auth.as_ref(), session, credentials.clone())
        .await
    {
        Ok(grant) => ServerEvent::LoginSuccess(LoginSuccess {
            token: grant.token,
            username: grant.username,
        }),
        Err(HubError::Auth(e)) => {
            state.auth.log_failure(&credentials, &e);
            auth_error(e.to_string())
        }
        Err(e) => auth_error(e.to_string()),
    }
}

fn auth_error(message: String) -> ServerEvent {
    ServerEvent::AuthError(ErrorPayload { message })
}
