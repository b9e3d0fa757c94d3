use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, put},
};

/// Account Router Module
///
/// Self-service endpoints. A valid access token is required, but no permission:
/// every authenticated user may read their profile and change their password.
pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/password", put(handlers::auth::change_password))
}
