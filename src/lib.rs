use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{FromRef, Request, State},
    http::HeaderName,
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod error;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod password;
pub mod pipeline;
pub mod repository;
pub mod response;
pub mod token;
pub mod validation;

pub mod routes;
use routes::{account, protected, public};

// --- Public Re-exports ---

pub use auth::{AccessPolicy, AuthGate, CurrentUser, TokenState};
pub use catalog::PermissionCatalog;
pub use config::AppConfig;
pub use error::{ApiError, ErrorCode};
pub use repository::{CredentialState, TemplateState};
pub use response::Envelope;

use crate::token::TokenService;

/// ApiDoc
///
/// Aggregates every `#[utoipa::path]` handler and the request/response schemas.
/// Served at `/api-docs/openapi.json` and browsable at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::auth::login, handlers::auth::refresh, handlers::auth::me,
        handlers::auth::change_password,
        handlers::users::create_user, handlers::users::get_user, handlers::users::delete_user,
        handlers::users::assign_role, handlers::users::remove_role,
        handlers::users::user_permissions,
        handlers::roles::create_role, handlers::roles::list_roles, handlers::roles::delete_role,
        handlers::roles::role_permissions, handlers::roles::grant_permission,
        handlers::roles::revoke_permission,
        handlers::permissions::create_permission, handlers::permissions::list_permissions,
        handlers::permissions::delete_permission,
        handlers::templates::create_template, handlers::templates::list_templates,
        handlers::templates::get_template, handlers::templates::update_template,
        handlers::templates::delete_templates,
    ),
    components(
        schemas(
            models::Role, models::Permission, models::PermissionKind, models::ApiRoute,
            models::Template, models::LoginRequest, models::RefreshRequest,
            models::ChangePasswordRequest, models::CreateUserRequest, models::AssignRoleRequest,
            models::CreateRoleRequest, models::GrantPermissionRequest,
            models::CreatePermissionRequest, models::CreateTemplateRequest,
            models::UpdateTemplateRequest, models::DeleteTemplatesRequest, models::TokenPair,
            models::AccessToken, models::UserProfile, models::CreatedId, models::Affected,
            models::TemplatePage,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "rbac-gate", description = "Token authentication and role-based access control")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// AppState
///
/// The single, cheaply clonable container of shared services. Handlers take it
/// whole; extractors and middleware pull their slice through `FromRef`.
#[derive(Clone)]
pub struct AppState {
    pub store: CredentialState,
    pub templates: TemplateState,
    pub tokens: TokenState,
    pub catalog: Arc<PermissionCatalog>,
    pub policy: Arc<AccessPolicy>,
    pub config: AppConfig,
}

impl AppState {
    /// Wires the token service, the built-in catalog and the default access policy
    /// around the given stores.
    pub fn new(config: AppConfig, store: CredentialState, templates: TemplateState) -> Self {
        let tokens = TokenService::new(
            &config.jwt_secret,
            config.access_token_ttl,
            config.refresh_token_ttl,
        );
        Self {
            store,
            templates,
            tokens: Arc::new(tokens),
            catalog: Arc::new(PermissionCatalog::builtin()),
            policy: Arc::new(AccessPolicy::default()),
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for CredentialState {
    fn from_ref(app_state: &AppState) -> CredentialState {
        app_state.store.clone()
    }
}

impl FromRef<AppState> for TemplateState {
    fn from_ref(app_state: &AppState) -> TemplateState {
        app_state.templates.clone()
    }
}

impl FromRef<AppState> for TokenState {
    fn from_ref(app_state: &AppState) -> TokenState {
        app_state.tokens.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for AuthGate {
    fn from_ref(app_state: &AppState) -> AuthGate {
        AuthGate {
            store: app_state.store.clone(),
            tokens: app_state.tokens.clone(),
            policy: app_state.policy.clone(),
        }
    }
}

/// deadline
///
/// Bounds the handling time of every request. On expiry the in-flight handler
/// future, and with it any pending store call, is dropped.
async fn deadline(State(limit): State<Duration>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(%method, %path, limit_ms = limit.as_millis() as u64, "request deadline exceeded");
            ApiError::Internal(format!("{method} {path} exceeded {limit:?}")).into_response()
        }
    }
}

/// create_router
///
/// Assembles the routing structure. The authorization middleware is a
/// `route_layer` over all API routes, so only matched routes are gated and the
/// matched route template is available to it. Unknown paths fall through to the
/// framework's 404.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let api = Router::new()
        .merge(public::public_routes())
        .merge(account::account_routes())
        .merge(protected::protected_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authorize,
        ))
        .layer(middleware::from_fn_with_state(
            state.config.request_timeout,
            deadline,
        ))
        .with_state(state);

    Router::new()
        .merge(api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for every request, correlated by the `x-request-id` header.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
