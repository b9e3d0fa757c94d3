//! HTTP handlers. Every endpoint runs the same bind → validate → execute
//! [`Pipeline`](crate::pipeline::Pipeline) and answers with an
//! [`Envelope`](crate::response::Envelope).

use axum::{
    Json,
    extract::{
        Path, Query,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
};

use crate::response::Envelope;

pub mod auth;
pub mod permissions;
pub mod roles;
pub mod templates;
pub mod users;

pub type JsonBody<T> = Result<Json<T>, JsonRejection>;
pub type PathParam<T> = Result<Path<T>, PathRejection>;
pub type QueryParams<T> = Result<Query<T>, QueryRejection>;

/// Unwraps the body extractor, keeping the rejection for the bind stage.
pub(crate) fn body<T>(payload: JsonBody<T>) -> Result<T, JsonRejection> {
    payload.map(|Json(value)| value)
}

pub(crate) fn path<T>(param: PathParam<T>) -> Result<T, PathRejection> {
    param.map(|Path(value)| value)
}

pub(crate) fn query<T>(params: QueryParams<T>) -> Result<T, QueryRejection> {
    params.map(|Query(value)| value)
}

/// health
///
/// Liveness probe for load balancers. Bypasses authorization.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health() -> Envelope<&'static str> {
    Envelope::ok("ok")
}
