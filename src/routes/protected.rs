use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Protected Router Module
///
/// Administration and business endpoints. The authorization middleware admits a
/// request only if one of the caller's `api` permissions matches its method and
/// route; the matching catalog entries live in `catalog.rs`.
pub fn protected_routes() -> Router<AppState> {
    Router::new()
        // --- Users ---
        .route("/users", post(handlers::users::create_user))
        .route(
            "/users/{id}",
            get(handlers::users::get_user).delete(handlers::users::delete_user),
        )
        .route("/users/{id}/roles", post(handlers::users::assign_role))
        .route(
            "/users/{id}/roles/{role_id}",
            delete(handlers::users::remove_role),
        )
        .route(
            "/users/{id}/permissions",
            get(handlers::users::user_permissions),
        )
        // --- Roles ---
        .route(
            "/roles",
            post(handlers::roles::create_role).get(handlers::roles::list_roles),
        )
        .route("/roles/{id}", delete(handlers::roles::delete_role))
        .route(
            "/roles/{id}/permissions",
            get(handlers::roles::role_permissions).post(handlers::roles::grant_permission),
        )
        .route(
            "/roles/{id}/permissions/{permission_id}",
            delete(handlers::roles::revoke_permission),
        )
        // --- Permissions ---
        .route(
            "/permissions",
            post(handlers::permissions::create_permission)
                .get(handlers::permissions::list_permissions),
        )
        .route(
            "/permissions/{id}",
            delete(handlers::permissions::delete_permission),
        )
        // --- Templates ---
        // DELETE /template takes a batch body `{ids: [...]}`.
        .route(
            "/template",
            post(handlers::templates::create_template)
                .get(handlers::templates::list_templates)
                .delete(handlers::templates::delete_templates),
        )
        .route(
            "/template/{id}",
            get(handlers::templates::get_template).put(handlers::templates::update_template),
        )
}
