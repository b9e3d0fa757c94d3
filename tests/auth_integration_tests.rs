use axum::{
    Router,
    body::{Body, to_bytes},
    extract::FromRequestParts,
    http::{Request, StatusCode, header, request::Parts},
    middleware,
    routing::get,
};
use chrono::Duration;
use rbac_gate::{
    AccessPolicy, ApiError, AuthGate, CredentialState, CurrentUser, TokenState,
    auth::authorize,
    memory::InMemoryCredentialStore,
    models::{NewPermission, NewRole, NewUser},
    repository::CredentialStore,
    token::TokenService,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "integration-secret-integration-secret";

// --- Helpers ---

fn tokens() -> TokenState {
    Arc::new(TokenService::new(SECRET, Duration::minutes(5), Duration::days(1)))
}

/// Builds request parts carrying the given `Authorization` header value.
fn parts_with_auth(value: Option<&str>) -> Parts {
    let mut builder = Request::builder().uri("/auth/me");
    if let Some(value) = value {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    let (parts, _) = builder.body(()).unwrap().into_parts();
    parts
}

async fn extract(parts: &mut Parts, state: &TokenState) -> Result<CurrentUser, ApiError> {
    CurrentUser::from_request_parts(parts, state).await
}

// --- CurrentUser extractor ---

#[tokio::test]
async fn extractor_accepts_a_valid_access_token() {
    let state = tokens();
    let user_id = Uuid::new_v4();
    let token = state.issue_access_token(user_id).unwrap().token;

    let mut parts = parts_with_auth(Some(&format!("Bearer {token}")));
    let user = extract(&mut parts, &state).await.unwrap();
    assert_eq!(user.id, user_id);
}

#[tokio::test]
async fn extractor_prefers_the_identity_set_by_the_middleware() {
    let state = tokens();
    let resolved = CurrentUser { id: Uuid::new_v4() };

    let mut parts = parts_with_auth(None);
    parts.extensions.insert(resolved);
    assert_eq!(extract(&mut parts, &state).await.unwrap(), resolved);
}

#[tokio::test]
async fn extractor_rejects_missing_and_malformed_headers() {
    let state = tokens();
    for header_value in [None, Some("Basic abc"), Some("Bearer "), Some("Bearer not.a.jwt")] {
        let mut parts = parts_with_auth(header_value);
        let err = extract(&mut parts, &state).await.unwrap_err();
        assert!(
            matches!(err, ApiError::Unauthenticated(_)),
            "{header_value:?} gave {err:?}"
        );
    }
}

#[tokio::test]
async fn extractor_rejects_expired_tokens() {
    let expired = TokenService::new(SECRET, Duration::seconds(-30), Duration::days(1));
    let token = expired.issue_access_token(Uuid::new_v4()).unwrap().token;

    let mut parts = parts_with_auth(Some(&format!("Bearer {token}")));
    let err = extract(&mut parts, &tokens()).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthenticated(_)));
}

#[tokio::test]
async fn extractor_rejects_refresh_tokens_and_foreign_signatures() {
    let state = tokens();
    let refresh = state.issue_refresh_token(Uuid::new_v4()).unwrap().token;
    let foreign = TokenService::new(
        "some-other-secret-some-other-secret",
        Duration::minutes(5),
        Duration::days(1),
    )
    .issue_access_token(Uuid::new_v4())
        .unwrap()
        .token;

    for token in [refresh, foreign] {
        let mut parts = parts_with_auth(Some(&format!("Bearer {token}")));
        let err = extract(&mut parts, &state).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated(_)));
    }
}

// --- authorize middleware ---

struct Fixture {
    app: Router,
    store: CredentialState,
    tokens: TokenState,
}

async fn whoami(user: CurrentUser) -> String {
    user.id.to_string()
}

/// A small router with one public, one token-only and two guarded routes.
fn fixture() -> Fixture {
    let store: CredentialState = Arc::new(InMemoryCredentialStore::new());
    let tokens = tokens();
    let gate = AuthGate {
        store: store.clone(),
        tokens: tokens.clone(),
        policy: Arc::new(AccessPolicy::new(["/ping"], ["/whoami"])),
    };

    let app = Router::new()
        .route("/ping", get(|| async { "pong" }))
        .route("/whoami", get(whoami))
        .route("/widgets/{id}", get(whoami).put(whoami))
        .route("/reports/{*rest}", get(whoami))
        .route_layer(middleware::from_fn_with_state(gate, authorize))
        .with_state(tokens.clone());

    Fixture { app, store, tokens }
}

impl Fixture {
    async fn user_with(&self, grants: &[NewPermission]) -> (Uuid, String) {
        let user = self
            .store
            .create_user(NewUser {
                username: format!("user-{}", Uuid::new_v4()),
                phone: None,
                password_hash: "unused".into(),
                profile: serde_json::json!({}),
            })
            .await
            .unwrap();
        let role = self
            .store
            .create_role(NewRole {
                name: format!("role-{}", Uuid::new_v4()),
                description: String::new(),
            })
            .await
            .unwrap();
        self.store.assign_role(user.id, role.id).await.unwrap();
        for grant in grants {
            let permission = self.store.create_permission(grant.clone()).await.unwrap();
            self.store
                .assign_permission_to_role(role.id, permission.id)
                .await
                .unwrap();
        }
        let token = self.tokens.issue_access_token(user.id).unwrap().token;
        (user.id, token)
    }

    /// Sends a request and returns the envelope `code` and raw body.
    async fn send(&self, method: &str, uri: &str, token: Option<&str>) -> (i64, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = self
            .app
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(envelope) => (envelope["code"].as_i64().unwrap_or(200), envelope),
            Err(_) => (200, Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        }
    }
}

#[tokio::test]
async fn public_routes_skip_the_token_check() {
    let f = fixture();
    let (code, body) = f.send("GET", "/ping", None).await;
    assert_eq!(code, 200);
    assert_eq!(body, Value::String("pong".into()));
}

#[tokio::test]
async fn guarded_routes_require_a_token() {
    let f = fixture();
    let (code, body) = f.send("GET", "/widgets/1", None).await;
    assert_eq!(code, 401);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn token_only_routes_need_no_permission() {
    let f = fixture();
    let (user_id, token) = f.user_with(&[]).await;
    let (code, body) = f.send("GET", "/whoami", Some(&token)).await;
    assert_eq!(code, 200);
    assert_eq!(body, Value::String(user_id.to_string()));
}

#[tokio::test]
async fn user_without_permissions_is_forbidden() {
    let f = fixture();
    let (_, token) = f.user_with(&[]).await;
    let (code, _) = f.send("GET", "/widgets/1", Some(&token)).await;
    assert_eq!(code, 403);
}

#[tokio::test]
async fn template_permission_covers_any_id_for_its_method_only() {
    let f = fixture();
    let (_, token) = f
        .user_with(&[NewPermission::api("widget:read", "GET", "/widgets/{id}")])
        .await;

    assert_eq!(f.send("GET", "/widgets/1", Some(&token)).await.0, 200);
    assert_eq!(f.send("GET", "/widgets/abc", Some(&token)).await.0, 200);
    assert_eq!(f.send("PUT", "/widgets/1", Some(&token)).await.0, 403);
}

#[tokio::test]
async fn wildcard_permission_covers_nested_paths() {
    let f = fixture();
    let (_, token) = f
        .user_with(&[NewPermission::api("report:read", "get", "/reports/*")])
        .await;

    assert_eq!(f.send("GET", "/reports/2024/q1", Some(&token)).await.0, 200);
    assert_eq!(f.send("GET", "/widgets/1", Some(&token)).await.0, 403);
}

#[tokio::test]
async fn revocation_applies_to_the_next_request() {
    let f = fixture();
    let (user_id, token) = f
        .user_with(&[NewPermission::api("widget:read", "GET", "/widgets/{id}")])
        .await;
    assert_eq!(f.send("GET", "/widgets/1", Some(&token)).await.0, 200);

    let role = f.store.user_roles(user_id).await.unwrap().remove(0);
    f.store.delete_role(role.id).await.unwrap();

    assert_eq!(f.send("GET", "/widgets/1", Some(&token)).await.0, 403);
}
