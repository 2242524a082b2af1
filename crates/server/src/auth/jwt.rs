use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
pub struct JwtAccessTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_seconds: i64,
}

impl JwtAccessTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        Self::with_ttl(secret, DEFAULT_ACCESS_TOKEN_TTL_SECONDS)
    }

    pub fn with_ttl(secret: &str, ttl_seconds: i64) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }
        if ttl_seconds <= 0 {
            bail!("access token ttl must be positive");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_seconds,
        })
    }

    /// Issue an access token whose subject is the account email.
    pub fn issue_access_token(&self, email: &str) -> anyhow::Result<String> {
        self.issue_access_token_at(email, current_unix_timestamp()?)
    }

    fn issue_access_token_at(&self, email: &str, issued_at: i64) -> anyhow::Result<String> {
        let claims = AccessTokenClaims {
            sub: email.to_owned(),
            iat: issued_at,
            exp: issued_at + self.ttl_seconds,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode access token")
    }

    /// Returns the email the token was issued for.
    pub fn validate_access_token(&self, token: &str) -> anyhow::Result<String> {
        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode access token")?
            .claims;

        if claims.sub.trim().is_empty() {
            bail!("access token subject is empty");
        }

        Ok(claims.sub)
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}

#[cfg(test)]
mod tests {
    use super::{current_unix_timestamp, JwtAccessTokenService, DEFAULT_ACCESS_TOKEN_TTL_SECONDS};
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde::Serialize;

    const TEST_SECRET: &str = "chitchat_test_secret_that_is_definitely_long_enough";

    #[test]
    fn issues_and_validates_email_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");

        let token = service.issue_access_token("alice@example.com").expect("token should issue");
        let email = service.validate_access_token(&token).expect("token should validate");

        assert_eq!(email, "alice@example.com");
    }

    #[test]
    fn rejects_short_secrets() {
        assert!(JwtAccessTokenService::new("too-short").is_err());
    }

    #[test]
    fn rejects_tampered_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let token = service.issue_access_token("alice@example.com").expect("token should issue");

        assert!(service.validate_access_token(&format!("{token}x")).is_err());
    }

    #[test]
    fn rejects_tokens_signed_with_another_secret() {
        let issuer = JwtAccessTokenService::new("another_secret_that_is_also_long_enough!!")
            .expect("service should initialize");
        let verifier =
            JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let token = issuer.issue_access_token("alice@example.com").expect("token should issue");

        assert!(verifier.validate_access_token(&token).is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let issued_at = current_unix_timestamp().expect("current timestamp should resolve")
            - DEFAULT_ACCESS_TOKEN_TTL_SECONDS
            - 1;
        let token = service
            .issue_access_token_at("alice@example.com", issued_at)
            .expect("token should issue");

        assert!(service.validate_access_token(&token).is_err());
    }

    #[test]
    fn custom_ttl_is_applied() {
        let service =
            JwtAccessTokenService::with_ttl(TEST_SECRET, 5).expect("service should initialize");
        let issued_at = current_unix_timestamp().expect("current timestamp should resolve") - 6;
        let token = service
            .issue_access_token_at("alice@example.com", issued_at)
            .expect("token should issue");

        assert!(service.validate_access_token(&token).is_err());
    }

    #[test]
    fn rejects_tokens_without_subject() {
        #[derive(Serialize)]
        struct NoSubjectClaims {
            iat: i64,
            exp: i64,
        }

        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let now = current_unix_timestamp().expect("current timestamp should resolve");
        let token = encode(
            &Header::new(Algorithm::HS256),
            &NoSubjectClaims { iat: now, exp: now + 60 },
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .expect("token should encode");

        assert!(service.validate_access_token(&token).is_err());
    }
}
