//! JWT issuing and verification.
//!
//! Both halves of a pair share one HMAC secret; the `token_use` claim keeps a
//! refresh token from being presented where an access token is expected.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::TokenUse;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token invalid: {0}")]
    Invalid(String),
    #[error("expected a {expected} token")]
    WrongUse { expected: &'static str },
    #[error("token signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub token_use: TokenUse,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, TokenError> {
        self.sub
            .parse()
            .map_err(|_| TokenError::Invalid("subject is not a user id".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(
        secret: &str,
        issuer: impl Into<String>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn issue_pair(&self, user_id: i64, email: &str) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access: self.issue(user_id, email, TokenUse::Access, self.access_ttl)?,
            refresh: self.issue(user_id, email, TokenUse::Refresh, self.refresh_ttl)?,
        })
    }

    fn issue(
        &self,
        user_id: i64,
        email: &str,
        token_use: TokenUse,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            token_use,
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| TokenError::Signing(err.to_string()))
    }

    pub fn verify(&self, token: &str, expected: TokenUse) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(err.to_string()),
            })?;

        if claims.token_use != expected {
            return Err(TokenError::WrongUse {
                expected: expected.as_str(),
            });
        }
        Ok(claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenUse::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenUse::Refresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(
            "test-secret-at-least-32-characters!!",
            "firma-test",
            Duration::from_secs(900),
            Duration::from_secs(86_400),
        )
    }

    #[test]
    fn issued_pair_round_trips() {
        let tokens = service();
        let pair = tokens.issue_pair(7, "ann@example.com").expect("pair");

        let access = tokens.verify_access(&pair.access).expect("valid access");
        assert_eq!(access.sub, "7");
        assert_eq!(access.user_id().expect("user id"), 7);
        assert_eq!(access.email, "ann@example.com");
        assert_eq!(access.token_use, TokenUse::Access);
        assert_eq!(access.iss, "firma-test");

        let refresh = tokens.verify_refresh(&pair.refresh).expect("valid refresh");
        assert_eq!(refresh.token_use, TokenUse::Refresh);
    }

    #[test]
    fn refresh_token_is_rejected_where_access_is_expected() {
        let tokens = service();
        let pair = tokens.issue_pair(7, "ann@example.com").expect("pair");

        let err = tokens.verify_access(&pair.refresh).expect_err("wrong use");
        assert!(matches!(err, TokenError::WrongUse { expected: "access" }));
    }

    #[test]
    fn foreign_or_tampered_tokens_are_invalid() {
        let tokens = service();
        let pair = tokens.issue_pair(7, "ann@example.com").expect("pair");

        let other = TokenService::new(
            "a-completely-different-secret-value!",
            "firma-test",
            Duration::from_secs(900),
            Duration::from_secs(86_400),
        );
        assert!(matches!(
            other.verify_access(&pair.access),
            Err(TokenError::Invalid(_))
        ));

        let mut tampered = pair.access.clone();
        tampered.push('x');
        assert!(matches!(
            tokens.verify_access(&tampered),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn expiry_window_matches_configured_ttl() {
        let tokens = service();
        let pair = tokens.issue_pair(7, "ann@example.com").expect("pair");
        let claims = tokens.verify_access(&pair.access).expect("valid");

        assert_eq!(claims.exp - claims.iat, 900);
    }
}
