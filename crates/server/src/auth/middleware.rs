use crate::{auth::jwt::JwtAccessTokenService, chat::ChatError, store::ChatStore};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// Identity resolved from a bearer token. The token names an email; the
/// username is looked up so handlers can key everything by username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub username: String,
    pub email: String,
}

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<JwtAccessTokenService>,
    pub store: ChatStore,
}

impl AuthState {
    pub fn new(jwt: Arc<JwtAccessTokenService>, store: ChatStore) -> Self {
        Self { jwt, store }
    }

    /// Shared by the REST middleware and the socket handshake.
    pub async fn resolve(&self, token: &str) -> Result<AuthenticatedUser, ChatError> {
        let email = self
            .jwt
            .validate_access_token(token)
            .map_err(|_| ChatError::Unauthorized("invalid bearer token"))?;

        let user = self
            .store
            .user_by_email(&email)
            .await?
            .ok_or(ChatError::Unauthorized("token subject no longer exists"))?;

        Ok(AuthenticatedUser { username: user.username, email: user.email })
    }
}

pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
    {
        Some(token) => token.to_owned(),
        None => return ChatError::Unauthorized("missing bearer token").into_response(),
    };

    let user = match auth.resolve(&token).await {
        Ok(user) => user,
        Err(error) => return error.into_response(),
    };

    request.extensions_mut().insert(user);

    next.run(request).await
}

pub(crate) fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}
