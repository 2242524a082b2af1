use axum::{extract::State, Json};
use chitchat_common::protocol::rest::{
    MessageResponse, SigninRequest, SignupRequest, TokenResponse,
};

use super::ApiState;
use crate::{chat::ChatError, validation::ValidatedJson};

pub(super) async fn banner() -> Json<MessageResponse> {
    Json(MessageResponse::new("chitchat server with realtime sync"))
}

pub(super) async fn ping() -> Json<MessageResponse> {
    Json(MessageResponse::new("pong"))
}

pub(super) async fn signup(
    State(state): State<ApiState>,
    ValidatedJson(payload): ValidatedJson<SignupRequest>,
) -> Result<Json<MessageResponse>, ChatError> {
    let effects = state.chat.signup(payload).await?;
    state.dispatcher.deliver(effects).await;

    Ok(Json(MessageResponse::new("User created successfully")))
}

pub(super) async fn signin(
    State(state): State<ApiState>,
    ValidatedJson(payload): ValidatedJson<SigninRequest>,
) -> Result<Json<TokenResponse>, ChatError> {
    let token = state.chat.signin(&payload.email, &payload.password).await?;

    Ok(Json(token))
}
