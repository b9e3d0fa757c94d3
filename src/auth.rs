use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, MatchedPath, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::Permission,
    repository::CredentialState,
    token::TokenService,
};

/// TokenState
///
/// The token service as shared through the application state.
pub type TokenState = Arc<TokenService>;

/// CurrentUser
///
/// The resolved identity of an authenticated request. The authorization middleware
/// inserts it into the request extensions; handlers take it as an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: Uuid,
}

/// CurrentUser Extractor Implementation
///
/// Reuses the identity the middleware already resolved. Outside the middleware
/// (e.g. in tests that mount a handler directly) it verifies the bearer token itself.
///
/// Rejection: `ApiError::Unauthenticated`, rendered as a 200 envelope with code 401.
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    TokenState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(*user);
        }

        let token = bearer_token(&parts.headers).ok_or_else(ApiError::unauthenticated)?;
        let id = TokenState::from_ref(state).verify_access(token)?;
        Ok(CurrentUser { id })
    }
}

/// The token of an `Authorization: Bearer <token>` header, if well-formed.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty())
}

/// How the middleware treats a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No token required.
    Public,
    /// A valid access token is enough.
    TokenOnly,
    /// A valid token plus a matching `api` permission.
    Guarded,
}

/// AccessPolicy
///
/// The bypass and token-only path lists. Everything else is guarded.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    public: Vec<String>,
    token_only: Vec<String>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::new(
            ["/health", "/auth/login", "/auth/refresh"],
            ["/auth/me", "/auth/password"],
        )
    }
}

impl AccessPolicy {
    pub fn new<P, T>(public: P, token_only: T) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            public: public.into_iter().map(Into::into).collect(),
            token_only: token_only.into_iter().map(Into::into).collect(),
        }
    }

    pub fn classify(&self, path: &str) -> Access {
        let path = normalize(path);
        if self.public.iter().any(|p| normalize(p) == path) {
            Access::Public
        } else if self.token_only.iter().any(|p| normalize(p) == path) {
            Access::TokenOnly
        } else {
            Access::Guarded
        }
    }
}

/// AuthGate
///
/// The slice of application state the authorization middleware needs.
#[derive(Clone)]
pub struct AuthGate {
    pub store: CredentialState,
    pub tokens: TokenState,
    pub policy: Arc<AccessPolicy>,
}

/// authorize
///
/// Per-request gate: bypass list, then bearer token, then (for guarded paths) the
/// caller's effective permissions matched against the request's method and path.
/// Permissions are loaded fresh on every request; nothing is cached.
pub async fn authorize(State(gate): State<AuthGate>, mut request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let access = gate.policy.classify(&path);
    if access == Access::Public {
        return next.run(request).await;
    }

    let Some(token) = bearer_token(request.headers()) else {
        tracing::warn!(event = "auth_missing", %method, %path, "request without bearer token");
        return ApiError::unauthenticated().into_response();
    };

    let user_id = match gate.tokens.verify_access(token) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(event = "auth_failed", %method, %path, reason = %e, "token rejected");
            return ApiError::from(e).into_response();
        }
    };

    request.extensions_mut().insert(CurrentUser { id: user_id });
    if access == Access::TokenOnly {
        return next.run(request).await;
    }

    let permissions = match gate.store.effective_permissions(user_id).await {
        Ok(permissions) => permissions,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let template = request
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_owned());

    if decide(&permissions, method.as_str(), &path, template.as_deref()) {
        next.run(request).await
    } else {
        tracing::warn!(
            event = "permission_denied",
            user_id = %user_id,
            %method,
            %path,
            "no api permission matches the request"
        );
        ApiError::forbidden().into_response()
    }
}

/// decide
///
/// True if any `api` permission matches the method exactly (case-insensitive) and
/// the path either as requested or as the route template that served it.
pub fn decide(
    permissions: &[Permission],
    method: &str,
    path: &str,
    template: Option<&str>,
) -> bool {
    permissions
        .iter()
        .filter_map(Permission::api_route)
        .filter(|route| route.method.eq_ignore_ascii_case(method))
        .any(|route| {
            route_matches(&route.path, path)
                || template.is_some_and(|t| route_matches(&route.path, t))
        })
}

/// route_matches
///
/// Segment-wise comparison after trimming trailing slashes. `{name}` and `:name`
/// segments match any single segment. A trailing `*` segment matches any non-empty
/// remainder, i.e. "everything under this prefix".
pub fn route_matches(pattern: &str, path: &str) -> bool {
    let pattern: Vec<&str> = segments(pattern).collect();
    let path: Vec<&str> = segments(path).collect();

    let (fixed, wildcard) = match pattern.split_last() {
        Some((&"*", rest)) => (rest, true),
        _ => (pattern.as_slice(), false),
    };

    let length_ok = if wildcard {
        path.len() > fixed.len()
    } else {
        path.len() == fixed.len()
    };

    length_ok
        && fixed
            .iter()
            .zip(&path)
            .all(|(want, got)| is_param(want) || want == got)
}

fn is_param(segment: &str) -> bool {
    (segment.starts_with('{') && segment.ends_with('}') && segment.len() > 2)
        || (segment.starts_with(':') && segment.len() > 1)
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PermissionKind;
    use chrono::Utc;
    use serde_json::json;

    fn perm(kind: PermissionKind, metadata: serde_json::Value) -> Permission {
        Permission {
            id: Uuid::new_v4(),
            name: "p".into(),
            kind,
            metadata,
            created_at: Utc::now(),
        }
    }

    fn api(method: &str, path: &str) -> Permission {
        perm(PermissionKind::Api, json!({ "method": method, "path": path }))
    }

    #[test]
    fn exact_and_trailing_slash() {
        assert!(route_matches("/roles", "/roles"));
        assert!(route_matches("/roles/", "/roles"));
        assert!(route_matches("/roles", "/roles/"));
        assert!(!route_matches("/roles", "/rolesx"));
        assert!(!route_matches("/roles", "/roles/1"));
    }

    #[test]
    fn parameter_segment_matches_any_single_id() {
        assert!(route_matches("/template/{id}", "/template/42"));
        assert!(route_matches("/template/:id", "/template/abc"));
        assert!(route_matches("/template/{id}", "/template/{id}"));
        assert!(!route_matches("/template/{id}", "/template"));
        assert!(!route_matches("/users/{id}", "/users/1/permissions"));
    }

    #[test]
    fn star_is_a_prefix_with_non_empty_remainder() {
        assert!(route_matches("/template/*", "/template/1"));
        assert!(route_matches("/template/*", "/template/1/history"));
        assert!(!route_matches("/template/*", "/template"));
        assert!(!route_matches("/template/*", "/templates/1"));
    }

    #[test]
    fn method_must_match() {
        let perms = [api("GET", "/roles")];
        assert!(decide(&perms, "GET", "/roles", None));
        assert!(decide(&perms, "get", "/roles", None));
        assert!(!decide(&perms, "POST", "/roles", None));
    }

    #[test]
    fn template_is_consulted_when_concrete_path_differs() {
        let perms = [api("PUT", "/template/{id}")];
        assert!(decide(&perms, "PUT", "/template/7", Some("/template/{id}")));
    }

    #[test]
    fn non_api_and_malformed_permissions_never_match() {
        let perms = [
            perm(PermissionKind::Menu, json!({ "method": "GET", "path": "/roles" })),
            perm(PermissionKind::Api, json!({ "path": "/roles" })),
        ];
        assert!(!decide(&perms, "GET", "/roles", None));
    }

    #[test]
    fn empty_set_is_forbidden() {
        assert!(!decide(&[], "GET", "/roles", None));
    }

    #[test]
    fn policy_classification() {
        let policy = AccessPolicy::default();
        assert_eq!(policy.classify("/auth/login"), Access::Public);
        assert_eq!(policy.classify("/health/"), Access::Public);
        assert_eq!(policy.classify("/auth/me"), Access::TokenOnly);
        assert_eq!(policy.classify("/roles"), Access::Guarded);
    }

    #[test]
    fn bearer_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        for (value, expected) in [
            ("bearer abc", Some("abc")),
            ("BEARER  abc ", Some("abc")),
            ("Bearerabc", None),
            ("bearer ", None),
        ] {
            headers.insert(header::AUTHORIZATION, value.parse().unwrap());
            assert_eq!(bearer_token(&headers), expected, "{value:?}");
        }
    }
}
