// Realtime channel.
//
// One socket per online identity on `GET /ws`. The socket authenticates with
// a `hello` frame carrying the same bearer token the REST surface accepts;
// only then is it registered in the presence registry and eligible for
// pushes.

mod handler;
pub mod protocol;

use std::time::Duration;

use axum::{routing::get, Router};

use crate::{auth::middleware::AuthState, chat::ChatService, dispatch::EventDispatcher};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub(crate) struct RealtimeState {
    auth: AuthState,
    chat: ChatService,
    dispatcher: EventDispatcher,
}

pub fn router(auth: AuthState, chat: ChatService, dispatcher: EventDispatcher) -> Router {
    Router::new()
        .route("/ws", get(handler::ws_upgrade))
        .with_state(RealtimeState { auth, chat, dispatcher })
}
