use std::sync::LazyLock;

use axum::extract::State;
use serde_json::json;
use uuid::Uuid;

use super::{JsonBody, PathParam, body, path};
use crate::{
    AppState,
    error::ApiError,
    models::{AssignRoleRequest, CreateUserRequest, CreatedId, NewUser, Permission, UserProfile},
    password::hash_password,
    pipeline::Pipeline,
    response::Envelope,
    validation::{Check, Locale, Rules, Validate},
};

static CREATE_USER_RULES: LazyLock<Rules<CreateUserRequest>> = LazyLock::new(|| {
    Rules::new()
        .field(
            "username",
            |r: &CreateUserRequest| &r.username,
            [Check::required(), Check::length(3, 64)],
        )
        .field(
            "password",
            |r: &CreateUserRequest| &r.password,
            [Check::required(), Check::length(8, 128)],
        )
        .field("phone", |r: &CreateUserRequest| &r.phone, [Check::length(5, 20)])
        .field("role_ids", |r: &CreateUserRequest| &r.role_ids, [Check::uuid()])
});

impl Validate for CreateUserRequest {
    fn validate(&self, locale: Locale) -> Result<(), String> {
        CREATE_USER_RULES.check(self, locale)?;
        match &self.profile {
            Some(profile) if !profile.is_object() => Err("profile must be a JSON object".into()),
            _ => Ok(()),
        }
    }
}

static ASSIGN_ROLE_RULES: LazyLock<Rules<AssignRoleRequest>> = LazyLock::new(|| {
    Rules::new().field(
        "role_id",
        |r: &AssignRoleRequest| &r.role_id,
        [Check::required(), Check::uuid()],
    )
});

impl Validate for AssignRoleRequest {
    fn validate(&self, locale: Locale) -> Result<(), String> {
        ASSIGN_ROLE_RULES.check(self, locale)
    }
}

/// Parses an id that already passed the `uuid` check.
pub(crate) fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|e| ApiError::BadRequest(e.to_string()))
}

pub(crate) fn parse_ids(raw: &[String]) -> Result<Vec<Uuid>, ApiError> {
    raw.iter()
        .map(String::as_str)
        .map(parse_id)
        .collect()
}

/// create_user
///
/// Creates a user and assigns the initial roles in one transaction.
#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    security(("bearer" = [])),
    request_body = CreateUserRequest,
    responses((status = 200, description = "Envelope carrying the new user id", body = CreatedId))
)]
pub async fn create_user(
    State(state): State<AppState>,
    payload: JsonBody<CreateUserRequest>,
) -> Envelope<CreatedId> {
    Pipeline::bind(body(payload))
        .validate(state.config.locale)
        .execute(|req| async move {
            let role_ids = parse_ids(&req.role_ids)?;
            let new_user = NewUser {
                username: req.username.trim().to_string(),
                phone: req
                    .phone
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty()),
                password_hash: hash_password(&req.password)?,
                profile: req.profile.unwrap_or_else(|| json!({})),
            };
            let user = state.store.create_user_with_roles(new_user, &role_ids).await?;
            tracing::info!(user_id = %user.id, roles = role_ids.len(), "user created");
            Ok(CreatedId { id: user.id })
        })
        .await
}

/// get_user
#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "users",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "Envelope carrying the user profile", body = UserProfile))
)]
pub async fn get_user(State(state): State<AppState>, id: PathParam<Uuid>) -> Envelope<UserProfile> {
    Pipeline::bind(path(id))
        .execute(|id| async move {
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

/// delete_user
///
/// Removes the user; its role assignments go with it.
#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "users",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "User deleted"))
)]
pub async fn delete_user(State(state): State<AppState>, id: PathParam<Uuid>) -> Envelope<()> {
    Pipeline::bind(path(id))
        .execute(|id| async move {
            state.store.delete_user(id).await?;
            tracing::info!(user_id = %id, "user deleted");
            Ok(())
        })
        .await
}

/// assign_role
#[utoipa::path(
    post,
    path = "/users/{id}/roles",
    tag = "users",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "User id")),
    request_body = AssignRoleRequest,
    responses((status = 200, description = "Role assigned"))
)]
pub async fn assign_role(
    State(state): State<AppState>,
    id: PathParam<Uuid>,
    payload: JsonBody<AssignRoleRequest>,
) -> Envelope<()> {
    Pipeline::bind(path(id))
        .and_bind(body(payload))
        .validate(state.config.locale)
        .execute(|(user_id, req)| async move {
            let role_id = parse_id(&req.role_id)?;
            state.store.assign_role(user_id, role_id).await?;
            tracing::info!(%user_id, %role_id, "role assigned");
            Ok(())
        })
        .await
}

/// remove_role
#[utoipa::path(
    delete,
    path = "/users/{id}/roles/{role_id}",
    tag = "users",
    security(("bearer" = [])),
    params(
        ("id" = Uuid, Path, description = "User id"),
        ("role_id" = Uuid, Path, description = "Role id")
    ),
    responses((status = 200, description = "Role removed"))
)]
pub async fn remove_role(
    State(state): State<AppState>,
    ids: PathParam<(Uuid, Uuid)>,
) -> Envelope<()> {
    Pipeline::bind(path(ids))
        .execute(|(user_id, role_id)| async move {
            state.store.remove_role(user_id, role_id).await?;
            tracing::info!(%user_id, %role_id, "role removed");
            Ok(())
        })
        .await
}

/// user_permissions
///
/// The effective permission set: the union over all of the user's roles.
#[utoipa::path(
    get,
    path = "/users/{id}/permissions",
    tag = "users",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "Envelope carrying the effective permissions", body = [Permission]))
)]
pub async fn user_permissions(
    State(state): State<AppState>,
    id: PathParam<Uuid>,
) -> Envelope<Vec<Permission>> {
    Pipeline::bind(path(id))
        .execute(|id| async move {
            if state.store.find_user_by_id(id).await?.is_none() {
                return Err(ApiError::NotFound("user not found".to_string()));
            }
            Ok(state.store.effective_permissions(id).await?)
        })
        .await
}
