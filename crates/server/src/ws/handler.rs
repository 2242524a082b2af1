use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use chitchat_common::protocol::ws::{ClientEvent, ServerEvent};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use super::{protocol as ws_protocol, RealtimeState, HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT};
use crate::{
    auth::middleware::AuthenticatedUser,
    error::{current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ErrorCode},
    presence::ConnectionHandle,
    validation::{check_ws_frame_size, MAX_WS_FRAME_BYTES},
};

pub(super) async fn ws_upgrade(
    State(state): State<RealtimeState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(MAX_WS_FRAME_BYTES).max_message_size(MAX_WS_FRAME_BYTES).on_upgrade(
        move |socket| async move {
            with_request_id_scope(request_id, handle_socket(state, socket)).await;
        },
    )
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_frame_too_large(socket: &mut WebSocket, reason: String) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame { code: close_code::SIZE, reason: reason.into() })))
        .await;
}

/// Send a final error event and close. Nothing was registered yet.
async fn reject(socket: &mut WebSocket, event: ServerEvent) {
    let _ = ws_protocol::send_event(socket, &event).await;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: event.name().into(),
        })))
        .await;
}

/// Wait for the `hello` frame and resolve its token to an account.
async fn authenticate(state: &RealtimeState, socket: &mut WebSocket) -> Option<AuthenticatedUser> {
    let raw = match socket.recv().await {
        Some(Ok(Message::Text(raw))) => raw,
        Some(Err(error)) if is_frame_size_violation(&error) => {
            close_frame_too_large(socket, format!("frame exceeds {MAX_WS_FRAME_BYTES} bytes")).await;
            return None;
        }
        Some(Ok(_)) => {
            warn!("websocket handshake rejected: first frame was not text");
            reject(socket, ws_protocol::error_event(ErrorCode::AuthInvalidToken, "hello required"))
                .await;
            return None;
        }
        _ => return None,
    };

    if let Err(reason) = check_ws_frame_size(raw.len()) {
        close_frame_too_large(socket, reason).await;
        return None;
    }

    let token = match ws_protocol::decode_client_event(&raw) {
        Ok(ClientEvent::Hello { token }) => token,
        Ok(other) => {
            warn!(event = other.name(), "websocket handshake rejected: first frame was not hello");
            reject(
                socket,
                ws_protocol::error_event(
                    ErrorCode::AuthInvalidToken,
                    "first websocket frame must be a hello event",
                ),
            )
            .await;
            return None;
        }
        Err(error) => {
            warn!(%error, "websocket handshake rejected: undecodable hello");
            reject(
                socket,
                ws_protocol::error_event(
                    ErrorCode::AuthInvalidToken,
                    "first websocket frame must be a hello event",
                ),
            )
            .await;
            return None;
        }
    };

    match state.auth.resolve(&token).await {
        Ok(user) => Some(user),
        Err(error) => {
            error.log();
            warn!(code = error.code().as_str(), "websocket handshake rejected");
            reject(socket, ws_protocol::chat_error_event(&error)).await;
            None
        }
    }
}

async fn handle_socket(state: RealtimeState, mut socket: WebSocket) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_owned());

    let Some(user) = authenticate(&state, &mut socket).await else {
        return;
    };

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<ServerEvent>();
    let handle = ConnectionHandle::new(user.username.clone(), outbound_sender);
    let registry = state.dispatcher.registry().clone();
    if let Some(replaced) = registry.register(handle.clone()).await {
        info!(
            username = %user.username,
            replaced = %replaced.connection_id,
            "newer connection replaced an existing one"
        );
    }
    info!(
        username = %user.username,
        connection_id = %handle.connection_id,
        request_id = %request_id,
        "websocket connected"
    );

    let greeting = match state.chat.pending_request_count(&user).await {
        Ok(count) => ServerEvent::NotificationsCount { count },
        Err(error) => {
            error.log();
            ws_protocol::chat_error_event(&error)
        }
    };
    if ws_protocol::send_event(&mut socket, &greeting).await.is_ok() {
        run_session(&state, &user, &mut socket, &mut outbound_receiver).await;
    }

    registry.unregister(&handle).await;
    info!(
        username = %user.username,
        connection_id = %handle.connection_id,
        "websocket disconnected"
    );
}

async fn run_session(
    state: &RealtimeState,
    user: &AuthenticatedUser,
    socket: &mut WebSocket,
    outbound_receiver: &mut mpsc::UnboundedReceiver<ServerEvent>,
) {
    let mut heartbeat = tokio::time::interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
    // Any inbound frame proves liveness, not only pongs.
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if last_seen.elapsed() > HEARTBEAT_INTERVAL + HEARTBEAT_TIMEOUT {
                    warn!(username = %user.username, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                let Some(event) = maybe_outbound else {
                    break;
                };
                if ws_protocol::send_event(socket, &event).await.is_err() {
                    break;
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw)) => {
                        last_seen = Instant::now();
                        if let Err(reason) = check_ws_frame_size(raw.len()) {
                            close_frame_too_large(socket, reason).await;
                            break;
                        }

                        let reply = match ws_protocol::decode_client_event(&raw) {
                            Ok(event) => handle_client_event(state, user, event).await,
                            Err(error) => {
                                debug!(%error, "undecodable websocket frame");
                                Some(ws_protocol::error_event(
                                    ErrorCode::ValidationFailed,
                                    "invalid websocket frame payload",
                                ))
                            }
                        };
                        if let Some(reply) = reply {
                            if ws_protocol::send_event(socket, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        last_seen = Instant::now();
                        let reply = ws_protocol::error_event(
                            ErrorCode::ValidationFailed,
                            "binary frames are not supported",
                        );
                        if ws_protocol::send_event(socket, &reply).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        last_seen = Instant::now();
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_seen = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Err(error) if is_frame_size_violation(&error) => {
                        close_frame_too_large(socket, format!("frame exceeds {MAX_WS_FRAME_BYTES} bytes")).await;
                        break;
                    }
                    Err(error) => {
                        debug!(%error, username = %user.username, "websocket receive failed");
                        break;
                    }
                }
            }
        }
    }
}

/// Apply one authenticated client event. Returns the event to send back to
/// this socket, if any; pushes to other sockets go through the dispatcher.
async fn handle_client_event(
    state: &RealtimeState,
    user: &AuthenticatedUser,
    event: ClientEvent,
) -> Option<ServerEvent> {
    match event {
        ClientEvent::Hello { .. } => Some(ws_protocol::error_event(
            ErrorCode::ValidationFailed,
            "connection is already authenticated",
        )),
        ClientEvent::ChatRead { me, friend } => {
            if me.as_deref().is_some_and(|me| me != user.username) {
                warn!(username = %user.username, claimed = ?me, "chat_read for another identity");
                return Some(ws_protocol::error_event(
                    ErrorCode::AuthForbidden,
                    "chat_read may only clear your own threads",
                ));
            }

            let friend = friend.trim();
            if friend.is_empty() {
                return Some(ws_protocol::error_event(
                    ErrorCode::ValidationFailed,
                    "friend is required",
                ));
            }

            match state.chat.mark_read(user, friend).await {
                Ok(effects) => {
                    let cleared = state.dispatcher.deliver(effects).await;
                    debug!(username = %user.username, friend, cleared, "thread marked read");
                    None
                }
                Err(error) => {
                    error.log();
                    Some(ws_protocol::chat_error_event(&error))
                }
            }
        }
    }
}
