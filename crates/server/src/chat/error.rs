use axum::response::{IntoResponse, Response};
use chitchat_common::identity::IdentityError;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::{
    error::{ErrorCode, ServiceError},
    store::StoreError,
    validation::identity_field,
};

/// Failure of a chat flow. Rendered through the shared error envelope on
/// REST and as an `error` event on the socket.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{message}")]
    Validation { field: Option<&'static str>, message: String },

    #[error("email or username already exists")]
    Duplicate,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Internal(anyhow::Error),
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { field: None, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationFailed,
            Self::Duplicate => ErrorCode::DuplicateAccount,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Unauthorized(_) => ErrorCode::AuthInvalidToken,
            Self::InvalidCredentials => ErrorCode::AuthInvalidCredentials,
            Self::Forbidden(_) => ErrorCode::AuthForbidden,
            Self::Store(StoreError::Timeout { .. }) => ErrorCode::StoreUnavailable,
            Self::Store(_) | Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Client-facing message. Backend failures are logged, never echoed.
    pub fn public_message(&self) -> String {
        match self {
            Self::Store(StoreError::Timeout { .. }) => {
                ErrorCode::StoreUnavailable.default_message().to_owned()
            }
            Self::Store(_) | Self::Internal(_) => {
                ErrorCode::InternalError.default_message().to_owned()
            }
            other => other.to_string(),
        }
    }

    pub fn to_service_error(&self) -> ServiceError {
        let service_error = ServiceError::new(self.code(), self.public_message());
        match self {
            Self::Validation { field: Some(field), .. } => {
                service_error.with_details(json!({ "field": field }))
            }
            _ => service_error,
        }
    }

    pub(crate) fn log(&self) {
        match self {
            Self::Store(StoreError::Timeout { operation, .. }) => {
                warn!(operation, "chat flow failed: store timed out");
            }
            Self::Store(store_error) => error!(error = ?store_error, "chat flow failed"),
            Self::Internal(internal) => error!(error = ?internal, "chat flow failed"),
            _ => {}
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(_) => Self::Duplicate,
            other => Self::Store(other),
        }
    }
}

impl From<IdentityError> for ChatError {
    fn from(value: IdentityError) -> Self {
        Self::Validation { field: Some(identity_field(&value)), message: value.to_string() }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        self.log();
        self.to_service_error().into_response()
    }
}
