use axum::body::Bytes;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use herald_core::types::DbId;
use herald_events::Frame;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::ws::actions::handle_text;

/// Replies to client actions waiting to be written.
const REPLY_BUFFER: usize = 16;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: Option<String>,
}

/// HTTP handler that upgrades the connection to WebSocket.
///
/// The caller's identity arrives as `?user_id=` from the upstream auth
/// layer. The id is checked before the upgrade so a bad request gets a JSON
/// error rather than a protocol failure.
pub async fn ws_handler(
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    let raw = params
        .user_id
        .ok_or_else(|| AppError::BadRequest("user_id query parameter is required".into()))?;
    let user_id: DbId = raw
        .trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid user_id '{raw}'")))?;

    let ws = ws.map_err(|e| AppError::BadRequest(e.body_text()))?;
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, user_id))
        .into_response())
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with the registry.
///   2. Spawns a sender task that forwards registry frames and action replies.
///   3. Processes inbound messages on the current task until the client
///      leaves or the sender task stops.
///   4. Cleans up on disconnect.
async fn handle_socket(socket: WebSocket, state: AppState, user_id: DbId) {
    let (conn_id, mut frames) = state.registry.open(user_id);
    tracing::info!(user_id, conn_id = %conn_id, "WebSocket connected");

    let (reply_tx, mut replies) = mpsc::channel::<String>(REPLY_BUFFER);
    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                frame = frames.recv() => match frame {
                    Some(Frame::Text(text)) => Message::Text(text.to_string().into()),
                    Some(Frame::Ping) => Message::Ping(Bytes::new()),
                    // Shut down, or pruned by the registry.
                    Some(Frame::Close) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                Some(reply) = replies.recv() => Message::Text(reply.into()),
            };
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    loop {
        let result = tokio::select! {
            _ = &mut send_task => {
                tracing::debug!(conn_id = %conn_id, "Outbound side closed");
                break;
            }
            next = stream.next() => match next {
                Some(result) => result,
                None => break,
            },
        };
        match result {
            Ok(Message::Text(text)) => {
                let reply = handle_text(&state, user_id, text.as_str()).await;
                if reply_tx.send(reply.to_string()).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    state.registry.disconnect(user_id, conn_id);
    send_task.abort();
    tracing::info!(user_id, conn_id = %conn_id, "WebSocket disconnected");
}
