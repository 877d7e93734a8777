use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::entity::Identity;
use crate::models::messages::{ClientEvent, ServerEvent};
use crate::ws::{ConnId, HubError};
use crate::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket endpoint. The handshake carries one signed token as a query
/// parameter; a missing or invalid token rejects the upgrade before any
/// event handler runs.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let identity = match state.verifier.verify(query.token.as_deref()).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!("WebSocket handshake rejected: {}", e);
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, identity, state))
}

/// Handle one authenticated WebSocket connection.
async fn handle_socket(socket: WebSocket, identity: Identity, state: Arc<AppState>) {
    let conn_id = Uuid::new_v4();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ServerEvent>();
    if let Err(e) = state.registry.register(conn_id, identity.clone(), tx) {
        // Invariant violation; do not run any event handler for this socket.
        error!("Failed to register connection {}: {}", conn_id, e);
        return;
    }
    info!(
        "WebSocket connection established for user {} with connection_id {}",
        identity.username, conn_id
    );
    state.presence.mirror_connect(conn_id, identity.user_id).await;

    // Split the socket into sender and receiver halves.
    let (mut sender, mut receiver) = socket.split();

    // Writer task: drain the connection's event queue into the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize event for {}: {}", conn_id, e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Reader task: parse and route incoming events.
    let reader_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => handle_event(&reader_state, conn_id, &text).await,
                Message::Close(_) => break,
                _ => continue,
            }
        }
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    state.lifecycle.disconnect(conn_id).await;
    info!("WebSocket connection terminated for {}", conn_id);
}

/// Parse one inbound frame and route it. Any failure is converted to a typed
/// `error` event for the sender; the connection always stays open.
pub(crate) async fn handle_event(state: &AppState, conn_id: ConnId, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            state.registry.send_to(
                conn_id,
                ServerEvent::Error {
                    kind: "invalid-message",
                    message: format!("Malformed event payload: {}", e),
                },
            );
            return;
        }
    };

    let (kind, result): (&'static str, Result<(), HubError>) = match event {
        ClientEvent::CreateRoom {
            name,
            description,
            is_private,
            max_members,
        } => (
            "create-room-error",
            state
                .lifecycle
                .create_room(conn_id, name, description, is_private, max_members)
                .await,
        ),
        ClientEvent::JoinRoom { room_id } => (
            "join-room-error",
            state.lifecycle.join_room(conn_id, room_id).await,
        ),
        ClientEvent::LeaveRoom => (
            "leave-room-error",
            state.lifecycle.leave_room(conn_id).await,
        ),
        ClientEvent::CodeChange {
            file_id,
            operation,
            position,
            content,
            length,
        } => (
            "code-change-error",
            state
                .router
                .code_change(conn_id, file_id, operation, position, content, length)
                .await,
        ),
        ClientEvent::SendMessage {
            content,
            message_type,
            reply_to_id,
        } => (
            "message-error",
            state
                .router
                .send_message(conn_id, content, message_type, reply_to_id)
                .await,
        ),
        ClientEvent::CursorPosition {
            position,
            selection,
        } => (
            "cursor-error",
            state
                .router
                .cursor_position(conn_id, position, selection)
                .await,
        ),
        ClientEvent::CreateFile {
            file_name,
            language,
        } => (
            "file-creation-error",
            state.router.create_file(conn_id, file_name, language).await,
        ),
        ClientEvent::DeleteFile { file_id } => (
            "file-deletion-error",
            state.router.delete_file(conn_id, file_id).await,
        ),
        ClientEvent::RenameFile { file_id, new_name } => (
            "file-rename-error",
            state.router.rename_file(conn_id, file_id, new_name).await,
        ),
    };

    if let Err(err) = result {
        warn!("Event from {} failed ({}): {}", conn_id, kind, err);
        state.registry.send_to(
            conn_id,
            ServerEvent::Error {
                kind,
                message: err.to_string(),
            },
        );
    }
}
