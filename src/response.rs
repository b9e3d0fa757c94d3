use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ErrorCode};

/// Envelope
///
/// The uniform `{code, msg, data}` body used for success and failure alike.
/// `data` is serialized as `null` on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: ErrorCode,
    pub msg: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: ErrorCode::Success,
            msg: "success".to_string(),
            data: Some(data),
        }
    }
}

impl<T> From<ApiError> for Envelope<T> {
    fn from(err: ApiError) -> Self {
        if let ApiError::Internal(detail) = &err {
            tracing::error!(error = %detail, "request failed with internal error");
        }
        Self {
            code: err.code(),
            msg: err.public_message(),
            data: None,
        }
    }
}

impl<T> From<Result<T, ApiError>> for Envelope<T> {
    fn from(result: Result<T, ApiError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => err.into(),
        }
    }
}

// Status stays 200 for every outcome; the envelope code carries the classification.
impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_serializes_null_data() {
        let env: Envelope<u32> = ApiError::Conflict("role already assigned".into()).into();
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["code"], 409);
        assert_eq!(json["msg"], "role already assigned");
        assert!(json["data"].is_null());
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let env: Envelope<()> = ApiError::Internal("pool timed out on 10.0.0.4".into()).into();
        assert_eq!(env.code, ErrorCode::Internal);
        assert_eq!(env.msg, "internal server error");
    }

    #[test]
    fn success_carries_code_200() {
        let json = serde_json::to_value(Envelope::ok(vec![1, 2])).unwrap();
        assert_eq!(json["code"], 200);
        assert_eq!(json["data"], serde_json::json!([1, 2]));
    }
}
