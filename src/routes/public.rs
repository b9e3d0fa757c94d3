use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints on the middleware's bypass list: liveness and the two token-issuing
/// calls. Nothing here reads or writes RBAC data beyond the login lookup.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        .route("/health", get(handlers::health))
        // POST /auth/login
        // Username + password in, access/refresh token pair out.
        .route("/auth/login", post(handlers::auth::login))
        // POST /auth/refresh
        .route("/auth/refresh", post(handlers::auth::refresh))
}
