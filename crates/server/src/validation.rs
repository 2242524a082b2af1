// Input validation helpers.
//
// - `ValidatedJson<T>` extractor: content-type check + serde + size enforcement.
// - WebSocket frame size limit.
// - Mapping of identity validation failures onto the error registry.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chitchat_common::identity::IdentityError;
use serde::de::DeserializeOwned;

use crate::error::{ErrorCode, ServiceError};

/// Maximum WebSocket frame payload in bytes (256 KiB).
pub const MAX_WS_FRAME_BYTES: usize = 256 * 1024;

// ── ValidatedJson extractor ────────────────────────────────────────

/// A JSON body extractor that returns a structured `ServiceError` on failure.
///
/// Use this instead of `axum::Json<T>` in handlers to get consistent
/// VALIDATION_FAILED error responses instead of plain-text Axum rejections.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => {
                let code = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    ErrorCode::PayloadTooLarge
                } else {
                    ErrorCode::ValidationFailed
                };
                let (message, details) = classify_json_rejection(&rejection);
                Err(ServiceError::new(code, message).with_details(details).into_response())
            }
        }
    }
}

/// Classify a JSON rejection into a human-readable message and details object.
fn classify_json_rejection(rejection: &JsonRejection) -> (String, serde_json::Value) {
    match rejection {
        JsonRejection::JsonDataError(e) => (
            format!("invalid JSON payload: {e}"),
            serde_json::json!({ "kind": "data_error" }),
        ),
        JsonRejection::JsonSyntaxError(e) => (
            format!("malformed JSON: {e}"),
            serde_json::json!({ "kind": "syntax_error" }),
        ),
        JsonRejection::MissingJsonContentType(_) => (
            "expected Content-Type: application/json".to_string(),
            serde_json::json!({ "kind": "missing_content_type" }),
        ),
        JsonRejection::BytesRejection(e) => (
            format!("request body error: {e}"),
            serde_json::json!({ "kind": "body_error" }),
        ),
        other => (
            format!("request body error: {other}"),
            serde_json::json!({ "kind": "unknown" }),
        ),
    }
}

// ── WebSocket frame validation ─────────────────────────────────────

/// Returns an error message suitable for a WS close reason when the frame
/// is over the limit.
pub fn check_ws_frame_size(len: usize) -> Result<(), String> {
    if len > MAX_WS_FRAME_BYTES {
        Err(format!("frame size {len} bytes exceeds limit of {MAX_WS_FRAME_BYTES} bytes"))
    } else {
        Ok(())
    }
}

// ── Identity fields ────────────────────────────────────────────────

pub fn identity_field(error: &IdentityError) -> &'static str {
    match error {
        IdentityError::EmptyUsername
        | IdentityError::UsernameTooLong
        | IdentityError::InvalidUsernameChar(_) => "username",
        IdentityError::InvalidEmail => "email",
        IdentityError::EmptyPassword => "password",
    }
}
