use axum::extract::ws::{Message, WebSocket};
use chitchat_common::protocol::ws::{ClientEvent, ServerEvent};

use crate::{chat::ChatError, error::ErrorCode};

pub fn decode_client_event(raw: &str) -> Result<ClientEvent, serde_json::Error> {
    serde_json::from_str::<ClientEvent>(raw)
}

pub fn encode_server_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

pub async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let encoded = encode_server_event(event).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

pub fn error_event(code: ErrorCode, message: impl Into<String>) -> ServerEvent {
    ServerEvent::Error {
        code: code.as_str().to_owned(),
        message: message.into(),
        retryable: code.retryable(),
    }
}

/// Socket rendering of a failed flow. Backend detail stays in the logs.
pub fn chat_error_event(error: &ChatError) -> ServerEvent {
    error_event(error.code(), error.public_message())
}
