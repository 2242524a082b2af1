use axum::{
    extract::{Extension, Multipart, Query, State},
    Json,
};
use chitchat_common::{
    protocol::rest::{MeResponse, MessageResponse, ProfileResponse},
    types::UserSummary,
};
use serde::Deserialize;

use super::ApiState;
use crate::{auth::middleware::AuthenticatedUser, chat::ChatError};

const PROFILE_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
pub(super) struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ProfileQuery {
    name: Option<String>,
}

pub(super) async fn me(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<MeResponse>, ChatError> {
    Ok(Json(state.chat.me(&user).await?))
}

pub(super) async fn list_users(
    State(state): State<ApiState>,
) -> Result<Json<Vec<UserSummary>>, ChatError> {
    Ok(Json(state.chat.list_users().await?))
}

pub(super) async fn search_users(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<UserSummary>>, ChatError> {
    Ok(Json(state.chat.search_users(&user, &query.q).await?))
}

pub(super) async fn profile_of(
    State(state): State<ApiState>,
    Query(query): Query<ProfileQuery>,
) -> Result<Json<ProfileResponse>, ChatError> {
    let name = query
        .name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ChatError::validation("query parameter `name` is required"))?;

    Ok(Json(state.chat.profile_of(name.trim()).await?))
}

pub(super) async fn upload_profile(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    mut multipart: Multipart,
) -> Result<Json<MessageResponse>, ChatError> {
    let mut picture = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(PROFILE_FIELD) {
            picture = Some(field.bytes().await.map_err(multipart_error)?);
            break;
        }
    }
    let picture = picture.ok_or_else(|| ChatError::Validation {
        field: Some(PROFILE_FIELD),
        message: "multipart field `file` is required".to_owned(),
    })?;

    let effects = state.chat.update_profile(&user, &picture).await?;
    state.dispatcher.deliver(effects).await;

    Ok(Json(MessageResponse::new("Profile image uploaded")))
}

fn multipart_error(error: axum::extract::multipart::MultipartError) -> ChatError {
    ChatError::Validation { field: Some(PROFILE_FIELD), message: error.body_text() }
}
