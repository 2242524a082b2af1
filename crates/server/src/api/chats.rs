use axum::{
    extract::{Extension, Path, State},
    Json,
};
use chitchat_common::{
    protocol::rest::{MarkReadBody, MessageResponse, SendMessageBody, ThreadResponse},
    types::ChatSummary,
};

use super::ApiState;
use crate::{auth::middleware::AuthenticatedUser, chat::ChatError, validation::ValidatedJson};

pub(super) async fn chat_list(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(username): Path<String>,
) -> Result<Json<Vec<ChatSummary>>, ChatError> {
    Ok(Json(state.chat.chat_list(&user, &username).await?))
}

pub(super) async fn fetch_thread(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(friend_username): Path<String>,
) -> Result<Json<ThreadResponse>, ChatError> {
    let effects = state.chat.fetch_thread(&user, &friend_username).await?;

    Ok(Json(state.dispatcher.deliver(effects).await))
}

pub(super) async fn send_message(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(friend_username): Path<String>,
    ValidatedJson(payload): ValidatedJson<SendMessageBody>,
) -> Result<Json<MessageResponse>, ChatError> {
    let effects = state.chat.send_message(&user, &friend_username, payload).await?;
    state.dispatcher.deliver(effects).await;

    Ok(Json(MessageResponse::new("sent")))
}

pub(super) async fn mark_read(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<MarkReadBody>,
) -> Result<Json<MessageResponse>, ChatError> {
    let friend = payload.username.trim();
    if friend.is_empty() {
        return Err(ChatError::Validation {
            field: Some("username"),
            message: "username required".to_owned(),
        });
    }

    let effects = state.chat.mark_read(&user, friend).await?;
    state.dispatcher.deliver(effects).await;

    Ok(Json(MessageResponse::new("Messages marked as read")))
}

#[cfg(test)]
mod tests {
    use crate::{api::test_support::test_app, presence::ConnectionHandle};
    use axum::http::{Method, StatusCode};
    use chitchat_common::protocol::ws::ServerEvent;
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn befriend(app: &crate::api::test_support::TestApp) -> (String, String) {
        let alice = app.account("alice").await;
        let bob = app.account("bob").await;
        app.call(Method::POST, "/requests", Some(&alice), Some(json!({ "toUsername": "bob" })))
            .await;
        app.call(
            Method::POST,
            "/requests/accept",
            Some(&bob),
            Some(json!({ "requesterUsername": "alice" })),
        )
        .await;
        (alice, bob)
    }

    #[tokio::test]
    async fn full_message_round_trip_updates_unseen_counts() {
        let app = test_app();
        let (alice, bob) = befriend(&app).await;

        let (status, body) = app
            .call(Method::POST, "/chat/bob/send", Some(&alice), Some(json!({ "text": "hi" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "sent" }));

        let (_, chats) = app.call(Method::GET, "/bob/chats", Some(&bob), None).await;
        assert_eq!(chats, json!([{ "friendUsername": "alice", "unseenCount": 1 }]));

        let (status, thread) = app.call(Method::GET, "/chat/alice", Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(thread["messages"][0]["text"], "hi");
        assert_eq!(thread["messages"][0]["direction"], "received");

        let (_, chats) = app.call(Method::GET, "/bob/chats", Some(&bob), None).await;
        assert_eq!(chats[0]["unseenCount"], 0);
        let (_, thread) = app.call(Method::GET, "/chat/alice", Some(&bob), None).await;
        assert_eq!(thread["messages"][0]["status"], "read");
    }

    #[tokio::test]
    async fn online_recipient_gets_message_push_matching_the_stored_copy() {
        let app = test_app();
        let (alice, _bob) = befriend(&app).await;
        let (sender, mut bob_socket) = mpsc::unbounded_channel();
        app.dispatcher.registry().register(ConnectionHandle::new("bob", sender)).await;

        app.call(Method::POST, "/chat/bob/send", Some(&alice), Some(json!({ "text": "hi" })))
            .await;

        assert_eq!(
            bob_socket.recv().await,
            Some(ServerEvent::ChatUnseenUpdate { friend_username: "alice".into(), unseen_count: 1 })
        );
        let Some(ServerEvent::MessageNew { from, to, message }) = bob_socket.recv().await else {
            panic!("expected message:new");
        };
        let stored = app.chat.store().thread_messages("bob", "alice").await.unwrap().unwrap();
        assert_eq!((from.as_str(), to.as_str()), ("alice", "bob"));
        assert_eq!(message.text, stored[0].text);
        assert_eq!(message.image, stored[0].has_image);
        assert_eq!(message.time, stored[0].time);
    }

    #[tokio::test]
    async fn offline_recipient_still_gets_the_message_stored() {
        let app = test_app();
        let (alice, _bob) = befriend(&app).await;

        let (status, _) = app
            .call(Method::POST, "/chat/bob/send", Some(&alice), Some(json!({ "text": "hi" })))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(app.dispatcher.registry().online_count().await, 0);
        let stored = app.chat.store().thread_messages("bob", "alice").await.unwrap().unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn chat_list_of_another_user_is_forbidden() {
        let app = test_app();
        let (alice, _bob) = befriend(&app).await;

        let (status, body) = app.call(Method::GET, "/bob/chats", Some(&alice), None).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "AUTH_FORBIDDEN");
    }

    #[tokio::test]
    async fn mark_read_endpoint_pushes_cleared_badge() {
        let app = test_app();
        let (alice, bob) = befriend(&app).await;
        app.call(Method::POST, "/chat/bob/send", Some(&alice), Some(json!({ "text": "hi" })))
            .await;
        let (sender, mut bob_socket) = mpsc::unbounded_channel();
        app.dispatcher.registry().register(ConnectionHandle::new("bob", sender)).await;

        let (status, body) = app
            .call(Method::POST, "/chat/mark_read", Some(&bob), Some(json!({ "username": "alice" })))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Messages marked as read");
        assert_eq!(
            bob_socket.recv().await,
            Some(ServerEvent::ChatUnseenUpdate { friend_username: "alice".into(), unseen_count: 0 })
        );

        let (status, _) = app
            .call(Method::POST, "/chat/mark_read", Some(&bob), Some(json!({ "username": " " })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sending_to_a_stranger_is_not_found() {
        let app = test_app();
        let alice = app.account("alice").await;
        app.account("carol").await;

        let (status, _) = app
            .call(Method::POST, "/chat/carol/send", Some(&alice), Some(json!({ "text": "hi" })))
            .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
