use std::sync::LazyLock;

use axum::extract::State;

use super::{JsonBody, body};
use crate::{
    AppState,
    auth::CurrentUser,
    error::ApiError,
    models::{
        AccessToken, ChangePasswordRequest, LoginRequest, RefreshRequest, TokenPair, UserPatch,
        UserProfile,
    },
    password::{hash_password, verify_decoy, verify_password},
    pipeline::Pipeline,
    response::Envelope,
    validation::{Check, Locale, Rules, Validate},
};

static LOGIN_RULES: LazyLock<Rules<LoginRequest>> = LazyLock::new(|| {
    Rules::new()
        .field("username", |r: &LoginRequest| &r.username, [Check::required()])
        .field("password", |r: &LoginRequest| &r.password, [Check::required()])
});

impl Validate for LoginRequest {
    fn validate(&self, locale: Locale) -> Result<(), String> {
        LOGIN_RULES.check(self, locale)
    }
}

static REFRESH_RULES: LazyLock<Rules<RefreshRequest>> = LazyLock::new(|| {
    Rules::new().field(
        "refresh_token",
        |r: &RefreshRequest| &r.refresh_token,
        [Check::required()],
    )
});

impl Validate for RefreshRequest {
    fn validate(&self, locale: Locale) -> Result<(), String> {
        REFRESH_RULES.check(self, locale)
    }
}

static CHANGE_PASSWORD_RULES: LazyLock<Rules<ChangePasswordRequest>> = LazyLock::new(|| {
    Rules::new()
        .field(
            "old_password",
            |r: &ChangePasswordRequest| &r.old_password,
            [Check::required()],
        )
        .field(
            "new_password",
            |r: &ChangePasswordRequest| &r.new_password,
            [Check::required(), Check::length(8, 128)],
        )
});

impl Validate for ChangePasswordRequest {
    fn validate(&self, locale: Locale) -> Result<(), String> {
        CHANGE_PASSWORD_RULES.check(self, locale)
    }
}

/// One message for unknown user and wrong password, so usernames cannot be probed.
fn bad_credentials() -> ApiError {
    ApiError::Unauthenticated("invalid username or password".to_string())
}

/// login
///
/// [Public Route] Exchanges a username and password for an access/refresh token pair.
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses((status = 200, description = "Envelope carrying the token pair", body = TokenPair))
)]
pub async fn login(
    State(state): State<AppState>,
    payload: JsonBody<LoginRequest>,
) -> Envelope<TokenPair> {
    Pipeline::bind(body(payload))
        .validate(state.config.locale)
        .execute(|req| async move {
            let Some(user) = state.store.find_user_by_username(&req.username).await? else {
                verify_decoy(&req.password);
                tracing::warn!(event = "login_failed", username = %req.username, "unknown user");
                return Err(bad_credentials());
            };

            if !verify_password(&req.password, &user.password) {
                tracing::warn!(event = "login_failed", username = %req.username, "password mismatch");
                return Err(bad_credentials());
            }

            let access = state.tokens.issue_access_token(user.id)?;
            let refresh = state.tokens.issue_refresh_token(user.id)?;
            tracing::info!(user_id = %user.id, "login succeeded");

            Ok(TokenPair {
                access_token: access.token,
                access_expires_at: access.expires_at,
                refresh_token: refresh.token,
                refresh_expires_at: refresh.expires_at,
            })
        })
        .await
}

/// refresh
///
/// [Public Route] Issues a new access token for a valid refresh token.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses((status = 200, description = "Envelope carrying the new access token", body = AccessToken))
)]
pub async fn refresh(
    State(state): State<AppState>,
    payload: JsonBody<RefreshRequest>,
) -> Envelope<AccessToken> {
    Pipeline::bind(body(payload))
        .validate(state.config.locale)
        .execute(|req| async move {
            let issued = state.tokens.refresh_access_token(&req.refresh_token)?;
            Ok(AccessToken {
                access_token: issued.token,
                expires_at: issued.expires_at,
            })
        })
        .await
}

/// me
///
/// [Token-Only Route] The caller's profile and role names.
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    security(("bearer" = [])),
    responses((status = 200, description = "Envelope carrying the caller's profile", body = UserProfile))
)]
pub async fn me(State(state): State<AppState>, user: CurrentUser) -> Envelope<UserProfile> {
    Pipeline::bind(Ok::<_, ApiError>(user))
        .execute(|CurrentUser { id }| async move {
            let user = state
                .store
                .find_user_by_id(id)
                .await?
                .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;
            let roles = state.store.user_roles(id).await?;
            Ok(UserProfile::new(user, roles))
        })
        .await
}

/// change_password
///
/// [Token-Only Route] Replaces the caller's password after checking the old one.
/// Tokens already issued stay valid until they expire.
#[utoipa::path(
    put,
    path = "/auth/password",
    tag = "auth",
    security(("bearer" = [])),
    request_body = ChangePasswordRequest,
    responses((status = 200, description = "Password changed"))
)]
pub async fn change_password(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: JsonBody<ChangePasswordRequest>,
) -> Envelope<()> {
    Pipeline::bind(body(payload))
        .validate(state.config.locale)
        .execute(|req| async move {
            let current = state
                .store
                .find_user_by_id(user.id)
                .await?
                .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

            if !verify_password(&req.old_password, &current.password) {
                return Err(ApiError::BadRequest("old password is incorrect".to_string()));
            }

            let patch = UserPatch {
                password_hash: Some(hash_password(&req.new_password)?),
                ..Default::default()
            };
            state.store.update_user(user.id, patch).await?;
            tracing::info!(user_id = %user.id, "password changed");
            Ok(())
        })
        .await
}
