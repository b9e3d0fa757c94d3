use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use async_trait::async_trait;
use rbac_gate::{
    AppConfig, AppState, TemplateState, create_router,
    bootstrap::{BootstrapPlan, Bootstrapper},
    error::{StoreError, StoreResult},
    memory::{InMemoryCredentialStore, InMemoryTemplateStore},
    models::{NewTemplate, Template, TemplatePatch, TemplateQuery},
    repository::{CredentialStore, TemplateStore},
};
use serde_json::{Value, json};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use uuid::Uuid;

use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub config: AppConfig,
}

/// Boots the full router over fresh in-memory stores with the admin and root
/// role already converged.
async fn spawn_app() -> TestApp {
    let state = converged_state(AppConfig::default(), Arc::new(InMemoryTemplateStore::new())).await;
    TestApp {
        config: state.config.clone(),
        router: create_router(state),
    }
}

async fn converged_state(config: AppConfig, templates: TemplateState) -> AppState {
    let state = AppState::new(config.clone(), Arc::new(InMemoryCredentialStore::new()), templates);

    let plan = BootstrapPlan::from_config(&config, state.catalog.clone()).unwrap();
    Bootstrapper::new(state.store.clone(), plan)
        .run()
        .await
        .expect("bootstrap failed");
    state
}

impl TestApp {
    async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Value {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> Value {
        let response = self.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "transport status is always 200");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).expect("envelope body")
    }

    async fn login(&self, username: &str, password: &str) -> Value {
        self.request(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": username, "password": password })),
        )
        .await
    }

    async fn admin_token(&self) -> String {
        let env = self
            .login(&self.config.admin_username, &self.config.admin_password)
            .await;
        env["data"]["access_token"].as_str().unwrap().to_string()
    }

    /// Creates a user holding a fresh role granted exactly the listed permission names.
    async fn user_with_permissions(&self, admin: &str, names: &[&str]) -> (String, String) {
        let role = self
            .request(
                "POST",
                "/roles",
                Some(admin),
                Some(json!({ "name": format!("role-{}", Uuid::new_v4()) })),
            )
            .await;
        let role_id = role["data"]["id"].as_str().unwrap().to_string();

        let all = self.request("GET", "/permissions", Some(admin), None).await;
        for name in names {
            let id = all["data"]
                .as_array()
                .unwrap()
                .iter()
                .find(|p| p["name"] == *name)
                .and_then(|p| p["id"].as_str())
                .unwrap_or_else(|| panic!("no permission named {name}"));
            let env = self
                .request(
                    "POST",
                    &format!("/roles/{role_id}/permissions"),
                    Some(admin),
                    Some(json!({ "permission_id": id })),
                )
                .await;
            assert_eq!(env["code"], 200, "{env}");
        }

        let username = format!("user-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let created = self
            .request(
                "POST",
                "/users",
                Some(admin),
                Some(json!({
                    "username": username,
                    "password": "user-password",
                    "role_ids": [role_id],
                })),
            )
            .await;
        assert_eq!(created["code"], 200, "{created}");

        let login = self.login(&username, "user-password").await;
        let token = login["data"]["access_token"].as_str().unwrap().to_string();
        (token, role_id)
    }

    async fn user_id(&self, token: &str) -> String {
        let me = self.request("GET", "/auth/me", Some(token), None).await;
        me["data"]["id"].as_str().unwrap().to_string()
    }

    async fn create_template(&self, token: &str, name: &str) -> String {
        let env = self
            .request(
                "POST",
                "/template",
                Some(token),
                Some(json!({ "name": name, "content": "Hello {{name}}" })),
            )
            .await;
        assert_eq!(env["code"], 200, "{env}");
        env["data"]["id"].as_str().unwrap().to_string()
    }
}

// --- System & Auth ---

#[tokio::test]
async fn health_check_works() {
    let app = spawn_app().await;
    let env = app.request("GET", "/health", None, None).await;
    assert_eq!(env["code"], 200);
    assert_eq!(env["data"], "ok");
}

#[tokio::test]
async fn login_returns_a_token_pair() {
    let app = spawn_app().await;
    let env = app
        .login(&app.config.admin_username, &app.config.admin_password)
        .await;
    assert_eq!(env["code"], 200);
    assert_eq!(env["msg"], "success");
    assert!(env["data"]["access_token"].is_string());
    assert!(env["data"]["refresh_token"].is_string());
}

#[tokio::test]
async fn wrong_password_is_code_401_with_status_200() {
    let app = spawn_app().await;
    let env = app.login(&app.config.admin_username, "not-the-password").await;
    assert_eq!(env["code"], 401);
    assert!(env["data"].is_null());
}

#[tokio::test]
async fn guarded_route_without_token_is_401() {
    let app = spawn_app().await;
    let env = app.request("GET", "/roles", None, None).await;
    assert_eq!(env["code"], 401);
}

#[tokio::test]
async fn garbage_token_is_401() {
    let app = spawn_app().await;
    let env = app.request("GET", "/roles", Some("garbage"), None).await;
    assert_eq!(env["code"], 401);
}

#[tokio::test]
async fn me_only_needs_a_token() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let (token, _) = app.user_with_permissions(&admin, &[]).await;

    let env = app.request("GET", "/auth/me", Some(&token), None).await;
    assert_eq!(env["code"], 200);
    assert!(env["data"]["username"].as_str().unwrap().starts_with("user-"));
}

#[tokio::test]
async fn refresh_issues_a_working_access_token() {
    let app = spawn_app().await;
    let login = app
        .login(&app.config.admin_username, &app.config.admin_password)
        .await;
    let refresh_token = login["data"]["refresh_token"].as_str().unwrap();

    let env = app
        .request(
            "POST",
            "/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh_token })),
        )
        .await;
    assert_eq!(env["code"], 200);
    let access = env["data"]["access_token"].as_str().unwrap();

    let roles = app.request("GET", "/roles", Some(access), None).await;
    assert_eq!(roles["code"], 200);

    // An access token is not accepted where a refresh token is expected.
    let misuse = app
        .request("POST", "/auth/refresh", None, Some(json!({ "refresh_token": access })))
        .await;
    assert_eq!(misuse["code"], 401);
}

// --- Permission gate ---

#[tokio::test]
async fn admin_reaches_every_management_endpoint() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;

    for uri in ["/roles", "/permissions", "/template"] {
        let env = app.request("GET", uri, Some(&admin), None).await;
        assert_eq!(env["code"], 200, "{uri}: {env}");
    }
}

#[tokio::test]
async fn read_permission_does_not_grant_update() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let template_id = app.create_template(&admin, "welcome").await;
    let (token, _) = app.user_with_permissions(&admin, &["template:read"]).await;

    let read = app
        .request("GET", &format!("/template/{template_id}"), Some(&token), None)
        .await;
    assert_eq!(read["code"], 200);
    assert_eq!(read["data"]["name"], "welcome");

    let update = app
        .request(
            "PUT",
            &format!("/template/{template_id}"),
            Some(&token),
            Some(json!({ "content": "changed" })),
        )
        .await;
    assert_eq!(update["code"], 403);

    let roles = app.request("GET", "/roles", Some(&token), None).await;
    assert_eq!(roles["code"], 403);
}

#[tokio::test]
async fn revoking_a_grant_takes_effect_on_the_next_request() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let (token, role_id) = app.user_with_permissions(&admin, &["template:list"]).await;

    assert_eq!(app.request("GET", "/template", Some(&token), None).await["code"], 200);

    let perms = app
        .request("GET", &format!("/roles/{role_id}/permissions"), Some(&admin), None)
        .await;
    let permission_id = perms["data"][0]["id"].as_str().unwrap();
    let revoke = app
        .request(
            "DELETE",
            &format!("/roles/{role_id}/permissions/{permission_id}"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(revoke["code"], 200);

    assert_eq!(app.request("GET", "/template", Some(&token), None).await["code"], 403);
}

#[tokio::test]
async fn removing_a_role_from_a_user_takes_effect_on_the_next_request() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let (token, role_id) = app.user_with_permissions(&admin, &["template:list"]).await;
    let user_id = app.user_id(&token).await;

    assert_eq!(app.request("GET", "/template", Some(&token), None).await["code"], 200);

    let removed = app
        .request(
            "DELETE",
            &format!("/users/{user_id}/roles/{role_id}"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(removed["code"], 200, "{removed}");

    assert_eq!(app.request("GET", "/template", Some(&token), None).await["code"], 403);
    let me = app.request("GET", "/auth/me", Some(&token), None).await;
    assert_eq!(me["data"]["roles"], json!([]));
}

#[tokio::test]
async fn unknown_route_falls_through_to_404() {
    let app = spawn_app().await;
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// --- Pipeline failures ---

#[tokio::test]
async fn validation_failure_reports_the_first_rule() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let env = app
        .request(
            "POST",
            "/users",
            Some(&admin),
            Some(json!({ "username": "ab", "password": "long-enough" })),
        )
        .await;
    assert_eq!(env["code"], 400);
    assert_eq!(env["msg"], "username must be between 3 and 64 characters");
}

#[tokio::test]
async fn names_are_validated_after_trimming() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;

    let padded = app
        .request(
            "POST",
            "/users",
            Some(&admin),
            Some(json!({ "username": "  ab  ", "password": "user-password" })),
        )
        .await;
    assert_eq!(padded["code"], 400);
    assert_eq!(padded["msg"], "username must be between 3 and 64 characters");
    assert_eq!(app.login("ab", "user-password").await["code"], 401);

    let role = app
        .request("POST", "/roles", Some(&admin), Some(json!({ "name": " x " })))
        .await;
    assert_eq!(role["code"], 400);

    let stored = app
        .request(
            "POST",
            "/users",
            Some(&admin),
            Some(json!({ "username": "  carol  ", "password": "user-password" })),
        )
        .await;
    assert_eq!(stored["code"], 200, "{stored}");
    assert_eq!(app.login("carol", "user-password").await["code"], 200);
}

#[tokio::test]
async fn repeated_role_ids_are_assigned_once() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let role = app
        .request("POST", "/roles", Some(&admin), Some(json!({ "name": "reviewer" })))
        .await;
    let role_id = role["data"]["id"].as_str().unwrap();

    let created = app
        .request(
            "POST",
            "/users",
            Some(&admin),
            Some(json!({
                "username": "dave",
                "password": "user-password",
                "role_ids": [role_id, role_id],
            })),
        )
        .await;
    assert_eq!(created["code"], 200, "{created}");

    let user_id = created["data"]["id"].as_str().unwrap();
    let user = app
        .request("GET", &format!("/users/{user_id}"), Some(&admin), None)
        .await;
    assert_eq!(user["data"]["roles"], json!(["reviewer"]));
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let request = Request::builder()
        .method("POST")
        .uri("/template")
        .header(header::AUTHORIZATION, format!("Bearer {admin}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let env = app.send(request).await;
    assert_eq!(env["code"], 400);
    assert!(env["data"].is_null());
}

#[tokio::test]
async fn malformed_path_id_is_a_bad_request() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let env = app.request("GET", "/template/not-a-uuid", Some(&admin), None).await;
    assert_eq!(env["code"], 400);
}

#[tokio::test]
async fn batch_delete_with_unknown_id_changes_nothing() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let kept = app.create_template(&admin, "kept").await;
    let ghost = Uuid::new_v4().to_string();

    let env = app
        .request("DELETE", "/template", Some(&admin), Some(json!({ "ids": [kept, ghost] })))
        .await;
    assert_eq!(env["code"], 400);
    assert!(env["msg"].as_str().unwrap().contains(&ghost));

    let still = app.request("GET", &format!("/template/{kept}"), Some(&admin), None).await;
    assert_eq!(still["code"], 200);

    let ok = app
        .request("DELETE", "/template", Some(&admin), Some(json!({ "ids": [kept] })))
        .await;
    assert_eq!(ok["data"]["affected"], 1);
}

#[tokio::test]
async fn duplicate_username_is_a_conflict() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let env = app
        .request(
            "POST",
            "/users",
            Some(&admin),
            Some(json!({ "username": app.config.admin_username, "password": "long-enough" })),
        )
        .await;
    assert_eq!(env["code"], 409);
}

// --- Request deadline ---

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A template store whose `list` never completes.
struct StalledTemplates {
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl TemplateStore for StalledTemplates {
    async fn create(&self, _: NewTemplate) -> StoreResult<Template> {
        Err(StoreError::NotFound("template"))
    }

    async fn get(&self, _: Uuid) -> StoreResult<Option<Template>> {
        Ok(None)
    }

    async fn list(&self, _: TemplateQuery) -> StoreResult<(Vec<Template>, i64)> {
        let _flag = DropFlag(self.dropped.clone());
        std::future::pending().await
    }

    async fn update(&self, _: Uuid, _: TemplatePatch) -> StoreResult<Template> {
        Err(StoreError::NotFound("template"))
    }

    async fn delete_batch(&self, _: &[Uuid]) -> StoreResult<u64> {
        Ok(0)
    }
}

#[tokio::test]
async fn slow_requests_are_cut_off_with_code_500() {
    let dropped = Arc::new(AtomicBool::new(false));
    let config = AppConfig {
        request_timeout: Duration::from_millis(100),
        ..AppConfig::default()
    };
    let state = converged_state(
        config,
        Arc::new(StalledTemplates {
            dropped: dropped.clone(),
        }),
    )
    .await;

    // Issued directly: password hashing could outlast the deadline in debug builds.
    let admin = state
        .store
        .find_user_by_username(&state.config.admin_username)
        .await
        .unwrap()
        .unwrap();
    let token = state.tokens.issue_access_token(admin.id).unwrap().token;

    let app = TestApp {
        config: state.config.clone(),
        router: create_router(state),
    };
    let env = app.request("GET", "/template", Some(&token), None).await;
    assert_eq!(env["code"], 500);
    assert_eq!(env["msg"], "internal server error");
    assert!(env["data"].is_null());
    assert!(dropped.load(Ordering::SeqCst), "stalled store call was not dropped");
}
