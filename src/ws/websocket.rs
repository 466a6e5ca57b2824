//! WebSocket endpoint for realtime chat.
//!
//! The handshake is always accepted; authentication happens on the open
//! socket so the client sees a close code instead of a bare HTTP error.
//! Each socket gets a writer task draining the connection's outbound queue
//! and a read loop feeding a [`ChatSession`].

use std::panic::AssertUnwindSafe;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::{bearer_token, TokenError};
use crate::core::AppState;
use crate::realtime::heartbeat::{self, HeartbeatConfig};
use crate::realtime::{ChatSession, Connection, UserId};

pub const CLOSE_TOKEN_REQUIRED: u16 = 4001;
pub const CLOSE_INVALID_TOKEN: u16 = 4003;

const INVALID_TOKEN: &str = "Invalid authentication token";

#[derive(Debug, Default, Deserialize)]
pub struct ChatParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET {api_prefix}/ws/chat`
pub async fn chat_socket(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers).map(str::to_owned));
    let max_message_bytes = state.config.realtime.max_message_bytes;

    upgrade
        .max_message_size(max_message_bytes)
        .max_frame_size(max_message_bytes)
        .on_failed_upgrade(|err| tracing::warn!(error = %err, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| handle_socket(socket, state, token))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let user_id = match authenticate(&state, token.as_deref()).await {
        Ok(user_id) => user_id,
        Err((code, reason)) => {
            let frame = CloseFrame {
                code,
                reason: Utf8Bytes::from_static(reason),
            };
            if let Err(err) = socket.send(Message::Close(Some(frame))).await {
                tracing::debug!(error = %err, "failed to send close frame");
            }
            return;
        }
    };

    let realtime = &state.config.realtime;
    let (connection, outbound) =
        Connection::new(user_id, realtime.outbound_buffer, realtime.backpressure);
    let heartbeat = HeartbeatConfig::from_secs(realtime.ping_interval_secs);

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, outbound, connection.clone(), heartbeat));

    let mut session = ChatSession::open(
        connection,
        state.hub.clone(),
        state.store.clone(),
        state.gateway.clone(),
        state.session_settings(),
    );
    read_loop(stream, &mut session).await;
    drop(session);

    if let Err(err) = writer.await {
        tracing::error!(user_id = %user_id, error = %err, "WebSocket writer task failed");
    }
}

/// Resolve the handshake credential to an active user.
async fn authenticate(
    state: &AppState,
    token: Option<&str>,
) -> Result<UserId, (u16, &'static str)> {
    let Some(token) = token else {
        tracing::warn!("WebSocket connection rejected: no token");
        return Err((CLOSE_TOKEN_REQUIRED, "Authentication token required"));
    };

    let user_id = state.keys.verify_access(token).map_err(|err: TokenError| {
        tracing::warn!(error = %err, "WebSocket connection rejected: invalid token");
        (CLOSE_INVALID_TOKEN, INVALID_TOKEN)
    })?;

    match state.store.find_active_user(user_id).await {
        Ok(Some(user)) => Ok(user.id),
        Ok(None) => {
            tracing::warn!(user_id = %user_id, "WebSocket connection rejected: unknown or inactive user");
            Err((CLOSE_INVALID_TOKEN, INVALID_TOKEN))
        }
        Err(err) => {
            tracing::error!(user_id = %user_id, error = %err, "user lookup failed during handshake");
            Err((CLOSE_INVALID_TOKEN, INVALID_TOKEN))
        }
    }
}

async fn read_loop(mut stream: SplitStream<WebSocket>, session: &mut ChatSession) {
    let connection = session.connection().clone();
    loop {
        let message = tokio::select! {
            message = stream.next() => message,
            _ = connection.closed() => break,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                let handled = AssertUnwindSafe(session.handle_text(text.as_str()))
                    .catch_unwind()
                    .await;
                if handled.is_err() {
                    tracing::error!(
                        user_id = %session.user_id(),
                        connection_id = %connection.id(),
                        "Error handling WebSocket message"
                    );
                    session.report_internal_error();
                }
            }
            Some(Ok(Message::Binary(_))) => {
                tracing::debug!(user_id = %session.user_id(), "ignoring binary frame");
            }
            // Pongs are queued by the transport itself
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(err)) => {
                tracing::debug!(user_id = %session.user_id(), error = %err, "WebSocket read error");
                break;
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Utf8Bytes>,
    connection: Connection,
    heartbeat: HeartbeatConfig,
) {
    let mut ticker = heartbeat.ticker();
    loop {
        tokio::select! {
            biased;

            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(err) = sink.send(Message::Text(frame)).await {
                    tracing::debug!(connection_id = %connection.id(), error = %err, "WebSocket write failed");
                    break;
                }
            }
            _ = connection.closed() => {
                // Flush what was queued before the close.
                while let Ok(frame) = outbound.try_recv() {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                break;
            }
            _ = heartbeat::next_tick(&mut ticker) => {
                if let Err(err) = sink.send(Message::Ping(Bytes::new())).await {
                    tracing::debug!(connection_id = %connection.id(), error = %err, "WebSocket ping failed");
                    break;
                }
            }
        }
    }

    connection.close();
    if let Err(err) = sink.close().await {
        tracing::trace!(connection_id = %connection.id(), error = %err, "WebSocket close failed");
    }
}
