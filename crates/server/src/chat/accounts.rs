use base64::{engine::general_purpose::STANDARD, Engine as _};
use chitchat_common::{
    identity::{normalize_email, normalize_username, validate_password},
    protocol::{
        rest::{MeResponse, ProfileResponse, SignupRequest, TokenResponse},
        ws::ServerEvent,
    },
    types::UserSummary,
};
use tracing::info;

use super::{ChatError, ChatService};
use crate::{
    auth::{
        middleware::AuthenticatedUser,
        password::{hash_password, verify_password},
    },
    dispatch::{Effects, Push},
    store::NewUser,
};

impl ChatService {
    /// Create an account and announce it to everyone online.
    pub async fn signup(&self, request: SignupRequest) -> Result<Effects<UserSummary>, ChatError> {
        let username = normalize_username(&request.username)?;
        let email = normalize_email(&request.email)?;
        validate_password(&request.password)?;

        let password_hash = hash_password(&request.password).map_err(ChatError::Internal)?;
        let record = self.store.create_user(NewUser { username, email, password_hash }).await?;
        info!(username = %record.username, "account created");

        let announcement = ServerEvent::UserCreated {
            username: record.username.clone(),
            profile: record.profile.clone(),
        };
        Ok(Effects::new(record.summary()).with_push(Push::broadcast(announcement)))
    }

    pub async fn signin(&self, email: &str, password: &str) -> Result<TokenResponse, ChatError> {
        let email = normalize_email(email).map_err(|_| ChatError::InvalidCredentials)?;
        let record =
            self.store.user_by_email(&email).await?.ok_or(ChatError::InvalidCredentials)?;
        if !verify_password(password, &record.password_hash) {
            return Err(ChatError::InvalidCredentials);
        }

        let access_token =
            self.tokens.issue_access_token(&record.email).map_err(ChatError::Internal)?;
        Ok(TokenResponse { access_token, token_type: "bearer".to_owned() })
    }

    pub async fn me(&self, user: &AuthenticatedUser) -> Result<MeResponse, ChatError> {
        let record = self.require_user(&user.username).await?;
        let requests = self.store.pending_requests(&user.username).await?;
        let friends = self.store.friend_threads(&user.username).await?;

        Ok(MeResponse {
            username: record.username,
            email: record.email,
            requests,
            friends,
            profile: record.profile,
        })
    }

    pub async fn search_users(
        &self,
        user: &AuthenticatedUser,
        query: &str,
    ) -> Result<Vec<UserSummary>, ChatError> {
        Ok(self.store.search_users(query.trim(), &user.username).await?)
    }

    pub async fn list_users(&self) -> Result<Vec<UserSummary>, ChatError> {
        Ok(self.store.list_users().await?)
    }

    pub async fn profile_of(&self, username: &str) -> Result<ProfileResponse, ChatError> {
        let record = self.require_user(username).await?;
        Ok(ProfileResponse { name: record.username, profile: record.profile })
    }

    /// Store the uploaded picture as base64 and announce the change.
    pub async fn update_profile(
        &self,
        user: &AuthenticatedUser,
        picture: &[u8],
    ) -> Result<Effects<()>, ChatError> {
        if picture.is_empty() {
            return Err(ChatError::Validation {
                field: Some("file"),
                message: "uploaded file is empty".to_owned(),
            });
        }

        let profile = STANDARD.encode(picture);
        if !self.store.set_profile(&user.username, &profile).await? {
            return Err(ChatError::not_found(format!("user `{}` not found", user.username)));
        }

        let announcement = ServerEvent::ProfileUpdated { username: user.username.clone(), profile };
        Ok(Effects::new(()).with_push(Push::broadcast(announcement)))
    }
}
