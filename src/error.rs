use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{password::PasswordError, response::Envelope, token::TokenError};

/// ErrorCode
///
/// The numeric `code` surfaced in every response envelope. Transport status is
/// always 200, so clients branch on this value alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ErrorCode {
    Success,
    BadRequest,
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorCode {
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Success => 200,
            Self::BadRequest => 400,
            Self::Unauthenticated => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Internal => 500,
        }
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> i32 {
        code.as_i32()
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            200 => Ok(Self::Success),
            400 => Ok(Self::BadRequest),
            401 => Ok(Self::Unauthenticated),
            403 => Ok(Self::Forbidden),
            404 => Ok(Self::NotFound),
            409 => Ok(Self::Conflict),
            500 => Ok(Self::Internal),
            other => Err(format!("unknown response code {other}")),
        }
    }
}

/// ApiError
///
/// The boundary error taxonomy. Every handler, extractor and middleware fails with
/// one of these; `IntoResponse` renders it as an envelope with HTTP status 200.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    /// The detail is logged, never returned to the caller.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BadRequest(_) => ErrorCode::BadRequest,
            Self::Unauthenticated(_) => ErrorCode::Unauthenticated,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// The message placed in the envelope body.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn unauthenticated() -> Self {
        Self::Unauthenticated("authentication required".to_string())
    }

    pub fn forbidden() -> Self {
        Self::Forbidden("permission denied".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        Envelope::<()>::from(self).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// StoreError
///
/// Failures raised by the credential and template stores. Raw driver errors are
/// wrapped with the operation that produced them; the classification into
/// `ApiError` happens only at the handler boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("unknown ids in batch: {0:?}")]
    MissingIds(Vec<Uuid>),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Returns a closure that wraps a driver error with `context`.
    pub fn db(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
        move |source| StoreError::Database { context, source }
    }

    /// Like [`StoreError::db`], but turns constraint violations into domain failures.
    pub fn write(
        context: &'static str,
        entity: &'static str,
    ) -> impl FnOnce(sqlx::Error) -> StoreError {
        move |source| match &source {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(format!("{entity} already exists"))
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::NotFound(entity)
            }
            _ => StoreError::Database { context, source },
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(entity) => ApiError::NotFound(format!("{entity} not found")),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::MissingIds(ids) => {
                let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
                ApiError::BadRequest(format!("unknown ids: {}", ids.join(", ")))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(detail) => ApiError::Internal(detail),
            other => ApiError::Unauthenticated(other.to_string()),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
