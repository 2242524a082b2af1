// Chat session flows.
//
// Each flow validates its inputs, applies its store mutations, recomputes
// the counters those mutations touched and returns `Effects` naming the
// pushes to deliver. Callers dispatch the pushes only after the flow has
// returned `Ok`.

mod accounts;
mod error;
mod messages;
mod requests;

use std::sync::Arc;

pub use error::ChatError;

use crate::{
    auth::jwt::JwtAccessTokenService,
    notify::NotificationEngine,
    store::{ChatStore, UserRecord},
};

#[derive(Clone)]
pub struct ChatService {
    store: ChatStore,
    notifications: NotificationEngine,
    tokens: Arc<JwtAccessTokenService>,
}

impl ChatService {
    pub fn new(store: ChatStore, tokens: Arc<JwtAccessTokenService>) -> Self {
        Self { notifications: NotificationEngine::new(store.clone()), store, tokens }
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn notifications(&self) -> &NotificationEngine {
        &self.notifications
    }

    async fn require_user(&self, username: &str) -> Result<UserRecord, ChatError> {
        self.store
            .user_by_username(username)
            .await?
            .ok_or_else(|| ChatError::not_found(format!("user `{username}` not found")))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use chitchat_common::protocol::rest::SignupRequest;

    use super::ChatService;
    use crate::{auth::jwt::JwtAccessTokenService, auth::middleware::AuthenticatedUser, store::ChatStore};

    pub(crate) const TEST_SECRET: &str = "chitchat_test_secret_that_is_definitely_long_enough";

    pub(crate) fn service() -> ChatService {
        ChatService::new(
            ChatStore::for_tests(),
            Arc::new(JwtAccessTokenService::new(TEST_SECRET).expect("jwt service")),
        )
    }

    pub(crate) async fn signed_up(service: &ChatService, username: &str) -> AuthenticatedUser {
        service
            .signup(SignupRequest {
                username: username.to_owned(),
                email: format!("{username}@example.com"),
                password: "correct horse".to_owned(),
            })
            .await
            .expect("signup should succeed");
        AuthenticatedUser { username: username.to_owned(), email: format!("{username}@example.com") }
    }

    /// Two accounts that are already friends.
    pub(crate) async fn friends(
        service: &ChatService,
        left: &str,
        right: &str,
    ) -> (AuthenticatedUser, AuthenticatedUser) {
        let left_user = signed_up(service, left).await;
        let right_user = signed_up(service, right).await;
        service.send_request(&left_user, right).await.expect("request should be sent");
        service.accept_request(&right_user, left).await.expect("request should be accepted");
        (left_user, right_user)
    }
}
