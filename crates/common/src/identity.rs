// Account identity validation: usernames are the presence/event handle,
// emails are only used for sign-in lookup.

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Maximum username length in characters (after normalization).
pub const MAX_USERNAME_CHARS: usize = 32;

/// Maximum email length in characters.
pub const MAX_EMAIL_CHARS: usize = 254;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("username is empty")]
    EmptyUsername,

    #[error("username exceeds maximum length of {MAX_USERNAME_CHARS} characters")]
    UsernameTooLong,

    #[error("username contains invalid character: {0:?}")]
    InvalidUsernameChar(char),

    #[error("email address is invalid")]
    InvalidEmail,

    #[error("password is empty")]
    EmptyPassword,
}

/// Normalize a username for storage and comparison.
///
/// NFKC-normalizes and trims surrounding whitespace. Letters, digits, `_`,
/// `-` and `.` are allowed.
pub fn normalize_username(input: &str) -> Result<String, IdentityError> {
    let normalized: String = input.nfkc().collect();
    let trimmed = normalized.trim();

    if trimmed.is_empty() {
        return Err(IdentityError::EmptyUsername);
    }
    if trimmed.chars().count() > MAX_USERNAME_CHARS {
        return Err(IdentityError::UsernameTooLong);
    }
    if let Some(invalid) =
        trimmed.chars().find(|ch| !(ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.')))
    {
        return Err(IdentityError::InvalidUsernameChar(invalid));
    }

    Ok(trimmed.to_owned())
}

/// Normalize an email address: trimmed and lowercased, one `@` with a
/// non-empty local part and a dotted domain.
pub fn normalize_email(input: &str) -> Result<String, IdentityError> {
    let email = input.trim().to_lowercase();
    if email.is_empty() || email.chars().count() > MAX_EMAIL_CHARS {
        return Err(IdentityError::InvalidEmail);
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(IdentityError::InvalidEmail);
    };
    let domain_ok = !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.');
    if local.is_empty() || !domain_ok || email.chars().any(char::is_whitespace) {
        return Err(IdentityError::InvalidEmail);
    }

    Ok(email)
}

pub fn validate_password(password: &str) -> Result<(), IdentityError> {
    if password.is_empty() {
        return Err(IdentityError::EmptyPassword);
    }
    Ok(())
}
