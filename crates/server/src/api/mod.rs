// REST surface.
//
// Handlers are thin: extract, call the matching `ChatService` flow, hand the
// flow's pushes to the dispatcher, serialize the value.

mod auth;
mod chats;
mod requests;
mod users;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::{
    auth::middleware::{require_bearer_auth, AuthState},
    chat::ChatService,
    dispatch::EventDispatcher,
};

#[derive(Clone)]
pub struct ApiState {
    pub chat: ChatService,
    pub dispatcher: EventDispatcher,
}

pub fn router(state: ApiState, auth: AuthState) -> Router {
    let public = Router::new()
        .route("/", get(auth::banner))
        .route("/ping", get(auth::ping))
        .route("/signup", post(auth::signup))
        .route("/signin", post(auth::signin));

    let protected = Router::new()
        .route("/me", get(users::me))
        .route("/users", get(users::list_users))
        .route("/users/search", get(users::search_users))
        .route("/him", get(users::profile_of))
        .route("/profile/upload", post(users::upload_profile))
        .route("/requests", post(requests::send_request))
        .route("/requests/accept", post(requests::accept_request))
        .route("/requests/reject", post(requests::reject_request))
        .route("/notifications/count", get(requests::notification_count))
        .route("/{username}/chats", get(chats::chat_list))
        .route("/chat/mark_read", post(chats::mark_read))
        .route("/chat/{friend_username}", get(chats::fetch_thread))
        .route("/chat/{friend_username}/send", post(chats::send_message))
        .route_layer(middleware::from_fn_with_state(auth, require_bearer_auth));

    public.merge(protected).with_state(state)
}
