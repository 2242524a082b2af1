use axum::{
    extract::{Extension, State},
    Json,
};
use chitchat_common::protocol::rest::{
    CountResponse, FriendRequestBody, MessageResponse, RequestActionBody,
};

use super::ApiState;
use crate::{auth::middleware::AuthenticatedUser, chat::ChatError, validation::ValidatedJson};

pub(super) async fn send_request(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<FriendRequestBody>,
) -> Result<Json<MessageResponse>, ChatError> {
    let effects = state.chat.send_request(&user, payload.to_username.trim()).await?;
    state.dispatcher.deliver(effects).await;

    Ok(Json(MessageResponse::new("Request sent")))
}

pub(super) async fn accept_request(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<RequestActionBody>,
) -> Result<Json<MessageResponse>, ChatError> {
    let effects = state.chat.accept_request(&user, payload.requester_username.trim()).await?;
    state.dispatcher.deliver(effects).await;

    Ok(Json(MessageResponse::new("Friend added")))
}

pub(super) async fn reject_request(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<RequestActionBody>,
) -> Result<Json<MessageResponse>, ChatError> {
    let effects = state.chat.reject_request(&user, payload.requester_username.trim()).await?;
    state.dispatcher.deliver(effects).await;

    Ok(Json(MessageResponse::new("Request rejected")))
}

pub(super) async fn notification_count(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<CountResponse>, ChatError> {
    let count = state.chat.pending_request_count(&user).await?;

    Ok(Json(CountResponse { count }))
}

#[cfg(test)]
mod tests {
    use crate::{api::test_support::test_app, presence::ConnectionHandle};
    use axum::http::{Method, StatusCode};
    use chitchat_common::protocol::ws::ServerEvent;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn duplicate_requests_count_once_and_notify_recipient() {
        let app = test_app();
        let alice = app.account("alice").await;
        let bob = app.account("bob").await;
        let (sender, mut bob_socket) = mpsc::unbounded_channel();
        app.dispatcher.registry().register(ConnectionHandle::new("bob", sender)).await;

        for _ in 0..2 {
            let (status, body) = app
                .call(Method::POST, "/requests", Some(&alice), Some(json!({ "toUsername": "bob" })))
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["message"], "Request sent");
        }

        let (_, count) = app.call(Method::GET, "/notifications/count", Some(&bob), None).await;
        assert_eq!(count, json!({ "count": 1 }));
        assert_eq!(bob_socket.recv().await, Some(ServerEvent::NotificationsCount { count: 1 }));
        assert_eq!(bob_socket.recv().await, Some(ServerEvent::RequestNew { from: "alice".into() }));
    }

    #[tokio::test]
    async fn self_and_unknown_targets_are_rejected() {
        let app = test_app();
        let alice = app.account("alice").await;

        let (status, _) = app
            .call(Method::POST, "/requests", Some(&alice), Some(json!({ "toUsername": "alice" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .call(Method::POST, "/requests", Some(&alice), Some(json!({ "toUsername": "ghost" })))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn accept_notifies_both_parties() {
        let app = test_app();
        let alice = app.account("alice").await;
        let bob = app.account("bob").await;
        app.call(Method::POST, "/requests", Some(&alice), Some(json!({ "toUsername": "bob" })))
            .await;
        let (sender, mut alice_socket) = mpsc::unbounded_channel();
        app.dispatcher.registry().register(ConnectionHandle::new("alice", sender)).await;

        let (status, body) = app
            .call(
                Method::POST,
                "/requests/accept",
                Some(&bob),
                Some(json!({ "requesterUsername": "alice" })),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Friend added");
        assert_eq!(
            alice_socket.recv().await,
            Some(ServerEvent::FriendAdded { friend_username: "bob".into() })
        );
        let (_, me) = app.call(Method::GET, "/me", Some(&bob), None).await;
        assert_eq!(me["friends"][0]["peer"], "alice");
        assert_eq!(me["requests"], json!([]));
    }

    #[tokio::test]
    async fn accept_unknown_requester_is_not_found() {
        let app = test_app();
        let bob = app.account("bob").await;

        let (status, _) = app
            .call(
                Method::POST,
                "/requests/accept",
                Some(&bob),
                Some(json!({ "requesterUsername": "ghost" })),
            )
            .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn accepting_your_own_name_is_a_bad_request() {
        let app = test_app();
        let bob = app.account("bob").await;

        let (status, _) = app
            .call(
                Method::POST,
                "/requests/accept",
                Some(&bob),
                Some(json!({ "requesterUsername": "bob" })),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, me) = app.call(Method::GET, "/me", Some(&bob), None).await;
        assert_eq!(me["friends"], json!([]));
    }

    #[tokio::test]
    async fn reject_clears_the_pending_request() {
        let app = test_app();
        let alice = app.account("alice").await;
        let bob = app.account("bob").await;
        app.call(Method::POST, "/requests", Some(&alice), Some(json!({ "toUsername": "bob" })))
            .await;

        let (status, _) = app
            .call(
                Method::POST,
                "/requests/reject",
                Some(&bob),
                Some(json!({ "requesterUsername": "alice" })),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        let (_, count) = app.call(Method::GET, "/notifications/count", Some(&bob), None).await;
        assert_eq!(count["count"], 0);
    }
}
