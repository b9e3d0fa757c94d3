use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// TokenKind
///
/// Distinguishes short-lived access tokens from long-lived refresh tokens so one
/// can never be presented in place of the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims
///
/// The signed payload of every token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user id.
    pub sub: Uuid,
    /// Issued At (iat), unix seconds.
    pub iat: i64,
    /// Expiration Time (exp), unix seconds.
    pub exp: i64,
    pub typ: TokenKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("expected {expected:?} token, got {found:?}")]
    WrongKind { expected: TokenKind, found: TokenKind },
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// A freshly signed token and the instant it stops verifying.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// TokenService
///
/// Issues and verifies HS256 tokens. Verification is pure computation: no store
/// lookup, no shared session state.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn issue_access_token(&self, user_id: Uuid) -> Result<IssuedToken, TokenError> {
        self.issue_at(user_id, TokenKind::Access, Utc::now())
    }

    pub fn issue_refresh_token(&self, user_id: Uuid) -> Result<IssuedToken, TokenError> {
        self.issue_at(user_id, TokenKind::Refresh, Utc::now())
    }

    pub(crate) fn issue_at(
        &self,
        user_id: Uuid,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let expires_at = now + ttl;
        let claims = Claims {
            sub: user_id,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            typ: kind,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Decodes and checks signature and expiry, whatever the token kind.
    pub fn verify_token(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                _ => TokenError::Malformed,
            })
    }

    /// Verifies an access token and yields the user it was issued to.
    pub fn verify_access(&self, token: &str) -> Result<Uuid, TokenError> {
        self.verify_kind(token, TokenKind::Access)
    }

    /// Exchanges a valid refresh token for a new access token.
    pub fn refresh_access_token(&self, refresh_token: &str) -> Result<IssuedToken, TokenError> {
        let user_id = self.verify_kind(refresh_token, TokenKind::Refresh)?;
        self.issue_access_token(user_id)
    }

    fn verify_kind(&self, token: &str, expected: TokenKind) -> Result<Uuid, TokenError> {
        let claims = self.verify_token(token)?;
        if claims.typ != expected {
            return Err(TokenError::WrongKind {
                expected,
                found: claims.typ,
            });
        }
        Ok(claims.sub)
    }
}
