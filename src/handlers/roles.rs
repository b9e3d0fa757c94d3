use std::sync::LazyLock;

use axum::extract::State;
use uuid::Uuid;

use super::{JsonBody, PathParam, body, path, users::parse_id};
use crate::{
    AppState,
    error::ApiError,
    models::{CreateRoleRequest, GrantPermissionRequest, NewRole, Permission, Role},
    pipeline::Pipeline,
    response::Envelope,
    validation::{Check, Locale, Rules, Validate},
};

static CREATE_ROLE_RULES: LazyLock<Rules<CreateRoleRequest>> = LazyLock::new(|| {
    Rules::new()
        .field(
            "name",
            |r: &CreateRoleRequest| &r.name,
            [Check::required(), Check::length(2, 64)],
        )
        .field(
            "description",
            |r: &CreateRoleRequest| &r.description,
            [Check::length(0, 255)],
        )
});

impl Validate for CreateRoleRequest {
    fn validate(&self, locale: Locale) -> Result<(), String> {
        CREATE_ROLE_RULES.check(self, locale)
    }
}

static GRANT_RULES: LazyLock<Rules<GrantPermissionRequest>> = LazyLock::new(|| {
    Rules::new().field(
        "permission_id",
        |r: &GrantPermissionRequest| &r.permission_id,
        [Check::required(), Check::uuid()],
    )
});

impl Validate for GrantPermissionRequest {
    fn validate(&self, locale: Locale) -> Result<(), String> {
        GRANT_RULES.check(self, locale)
    }
}

/// create_role
#[utoipa::path(
    post,
    path = "/roles",
    tag = "roles",
    security(("bearer" = [])),
    request_body = CreateRoleRequest,
    responses((status = 200, description = "Envelope carrying the new role", body = Role))
)]
pub async fn create_role(
    State(state): State<AppState>,
    payload: JsonBody<CreateRoleRequest>,
) -> Envelope<Role> {
    Pipeline::bind(body(payload))
        .validate(state.config.locale)
        .execute(|req| async move {
            let role = state
                .store
                .create_role(NewRole {
                    name: req.name.trim().to_string(),
                    description: req.description,
                })
                .await?;
            tracing::info!(role_id = %role.id, name = %role.name, "role created");
            Ok(role)
        })
        .await
}

/// list_roles
#[utoipa::path(
    get,
    path = "/roles",
    tag = "roles",
    security(("bearer" = [])),
    responses((status = 200, description = "Envelope carrying every role", body = [Role]))
)]
pub async fn list_roles(State(state): State<AppState>) -> Envelope<Vec<Role>> {
    Pipeline::bind(Ok::<_, ApiError>(()))
        .execute(|()| async move { Ok(state.store.list_roles().await?) })
        .await
}

/// delete_role
///
/// Role assignments and permission grants of the role are removed with it.
#[utoipa::path(
    delete,
    path = "/roles/{id}",
    tag = "roles",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Role id")),
    responses((status = 200, description = "Role deleted"))
)]
pub async fn delete_role(State(state): State<AppState>, id: PathParam<Uuid>) -> Envelope<()> {
    Pipeline::bind(path(id))
        .execute(|id| async move {
            state.store.delete_role(id).await?;
            tracing::info!(role_id = %id, "role deleted");
            Ok(())
        })
        .await
}

/// role_permissions
#[utoipa::path(
    get,
    path = "/roles/{id}/permissions",
    tag = "roles",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Role id")),
    responses((status = 200, description = "Envelope carrying the role's permissions", body = [Permission]))
)]
pub async fn role_permissions(
    State(state): State<AppState>,
    id: PathParam<Uuid>,
) -> Envelope<Vec<Permission>> {
    Pipeline::bind(path(id))
        .execute(|id| async move {
            if state.store.find_role(id).await?.is_none() {
                return Err(ApiError::NotFound("role not found".to_string()));
            }
            Ok(state.store.role_permissions(id).await?)
        })
        .await
}

/// grant_permission
#[utoipa::path(
    post,
    path = "/roles/{id}/permissions",
    tag = "roles",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Role id")),
    request_body = GrantPermissionRequest,
    responses((status = 200, description = "Permission granted"))
)]
pub async fn grant_permission(
    State(state): State<AppState>,
    id: PathParam<Uuid>,
    payload: JsonBody<GrantPermissionRequest>,
) -> Envelope<()> {
    Pipeline::bind(path(id))
        .and_bind(body(payload))
        .validate(state.config.locale)
        .execute(|(role_id, req)| async move {
            let permission_id = parse_id(&req.permission_id)?;
            state.store.assign_permission_to_role(role_id, permission_id).await?;
            tracing::info!(%role_id, %permission_id, "permission granted");
            Ok(())
        })
        .await
}

/// revoke_permission
#[utoipa::path(
    delete,
    path = "/roles/{id}/permissions/{permission_id}",
    tag = "roles",
    security(("bearer" = [])),
    params(
        ("id" = Uuid, Path, description = "Role id"),
        ("permission_id" = Uuid, Path, description = "Permission id")
    ),
    responses((status = 200, description = "Permission revoked"))
)]
pub async fn revoke_permission(
    State(state): State<AppState>,
    ids: PathParam<(Uuid, Uuid)>,
) -> Envelope<()> {
    Pipeline::bind(path(ids))
        .execute(|(role_id, permission_id)| async move {
            state
                .store
                .revoke_permission_from_role(role_id, permission_id)
                .await?;
            tracing::info!(%role_id, %permission_id, "permission revoked");
            Ok(())
        })
        .await
}
