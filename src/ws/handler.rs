//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{MatchHandle, SessionError, SlotConnection};
use crate::http::middleware::verify_jwt;
use crate::http::routes::AppError;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Frames buffered per connection before the session starts dropping them
const OUTBOUND_BUFFER: usize = 64;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(match_id): Path<Uuid>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify JWT token before upgrading
    let claims = match verify_jwt(&query.token, &state.config.supabase_jwt_secret) {
        Ok(claims) => claims,
        Err(e) => {
            warn!(match_id = %match_id, error = %e, "WebSocket auth failed");
            return e.into_response();
        }
    };

    let Some(handle) = state.registry.get(&match_id) else {
        return AppError::from(SessionError::NotFound).into_response();
    };

    info!(match_id = %match_id, user_id = %claims.sub, "WebSocket upgrade for authenticated user");
    ws.on_upgrade(move |socket| handle_socket(socket, claims.sub, handle))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: Uuid, handle: MatchHandle) {
    let (ws_sink, ws_stream) = socket.split();
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let conn = SlotConnection::new(tx);
    let connection_id = conn.id;

    let mut writer = tokio::spawn(write_frames(ws_sink, rx));

    // A rejected attach already queued an error frame and dropped the sender,
    // so the writer flushes it and closes the socket on its own
    match handle.attach(user_id, conn).await {
        Ok(side) => {
            info!(match_id = %handle.id, user_id = %user_id, side = ?side, "Connection attached");
        }
        Err(e) => {
            info!(match_id = %handle.id, user_id = %user_id, error = %e, "Connection rejected");
            let _ = writer.await;
            return;
        }
    }

    tokio::select! {
        _ = read_inputs(ws_stream, user_id, &handle) => {
            writer.abort();
        }
        // Session dropped our sender: match over or slot closed
        _ = &mut writer => {
            debug!(match_id = %handle.id, user_id = %user_id, "Session closed the connection");
        }
    }

    handle.detach(user_id, connection_id).await;

    info!(match_id = %handle.id, user_id = %user_id, "WebSocket connection closed");
}

/// Session -> socket; sends a close frame once the session drops its sender
async fn write_frames(
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(error = %e, "WebSocket send failed");
            return;
        }
    }
    let _ = ws_sink.send(Message::Close(None)).await;
}

/// Socket -> session until the client goes away
async fn read_inputs(mut ws_stream: SplitStream<WebSocket>, user_id: Uuid, handle: &MatchHandle) {
    let rate_limiter = ConnectionRateLimiter::new();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    debug!(user_id = %user_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(action) => handle.push_input(user_id, action),
                    Err(e) => {
                        debug!(user_id = %user_id, error = %e, "Ignoring malformed client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                debug!(user_id = %user_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(user_id = %user_id, "Client initiated close");
                return;
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "WebSocket error");
                return;
            }
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
