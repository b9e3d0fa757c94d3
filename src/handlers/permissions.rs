use std::sync::LazyLock;

use axum::extract::State;
use serde_json::json;
use uuid::Uuid;

use super::{JsonBody, PathParam, body, path};
use crate::{
    AppState,
    error::ApiError,
    models::{CreatePermissionRequest, NewPermission, Permission, PermissionKind},
    pipeline::Pipeline,
    response::Envelope,
    validation::{Check, Locale, Rules, Validate},
};

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

static CREATE_PERMISSION_RULES: LazyLock<Rules<CreatePermissionRequest>> = LazyLock::new(|| {
    Rules::new()
        .field(
            "name",
            |r: &CreatePermissionRequest| &r.name,
            [Check::required(), Check::length(2, 128)],
        )
        .field(
            "type",
            |r: &CreatePermissionRequest| &r.kind,
            [Check::required(), Check::one_of(PermissionKind::NAMES)],
        )
});

/// The `api` kind additionally needs exactly one `{method, path}` pair.
static API_ROUTE_RULES: LazyLock<Rules<CreatePermissionRequest>> = LazyLock::new(|| {
    Rules::new()
        .field(
            "method",
            |r: &CreatePermissionRequest| &r.method,
            [Check::required(), Check::one_of(METHODS)],
        )
        .field(
            "path",
            |r: &CreatePermissionRequest| &r.path,
            [Check::required(), Check::length(1, 255)],
        )
});

impl Validate for CreatePermissionRequest {
    fn validate(&self, locale: Locale) -> Result<(), String> {
        CREATE_PERMISSION_RULES.check(self, locale)?;
        if self.kind == PermissionKind::Api.as_str() {
            API_ROUTE_RULES.check(self, locale)?;
            if !self.path.as_deref().is_some_and(|p| p.starts_with('/')) {
                return Err("path must start with '/'".into());
            }
        }
        match &self.metadata {
            Some(metadata) if !metadata.is_object() => Err("metadata must be a JSON object".into()),
            _ => Ok(()),
        }
    }
}

impl CreatePermissionRequest {
    fn into_new(self) -> Result<NewPermission, ApiError> {
        let kind = PermissionKind::parse(&self.kind).ok_or_else(|| {
            ApiError::BadRequest(format!("unknown permission type {:?}", self.kind))
        })?;
        let name = self.name.trim().to_string();
        Ok(match (kind, self.method, self.path) {
            (PermissionKind::Api, Some(method), Some(path)) => {
                NewPermission::api(name, &method, &path)
            }
            (PermissionKind::Api, ..) => {
                return Err(ApiError::BadRequest("api permissions need method and path".into()));
            }
            (kind, ..) => NewPermission {
                name,
                kind,
                metadata: self.metadata.unwrap_or_else(|| json!({})),
            },
        })
    }
}

/// create_permission
///
/// `type = "api"` entries gate routes; other kinds are stored for clients only.
#[utoipa::path(
    post,
    path = "/permissions",
    tag = "permissions",
    security(("bearer" = [])),
    request_body = CreatePermissionRequest,
    responses((status = 200, description = "Envelope carrying the new permission", body = Permission))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    payload: JsonBody<CreatePermissionRequest>,
) -> Envelope<Permission> {
    Pipeline::bind(body(payload))
        .validate(state.config.locale)
        .execute(|req| async move {
            let permission = state.store.create_permission(req.into_new()?).await?;
            tracing::info!(permission_id = %permission.id, name = %permission.name, "permission created");
            Ok(permission)
        })
        .await
}

/// list_permissions
#[utoipa::path(
    get,
    path = "/permissions",
    tag = "permissions",
    security(("bearer" = [])),
    responses((status = 200, description = "Envelope carrying every permission", body = [Permission]))
)]
pub async fn list_permissions(State(state): State<AppState>) -> Envelope<Vec<Permission>> {
    Pipeline::bind(Ok::<_, ApiError>(()))
        .execute(|()| async move { Ok(state.store.list_permissions().await?) })
        .await
}

/// delete_permission
///
/// Grants of the permission are removed with it. Catalog entries deleted here are
/// re-created by the next bootstrap run.
#[utoipa::path(
    delete,
    path = "/permissions/{id}",
    tag = "permissions",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Permission id")),
    responses((status = 200, description = "Permission deleted"))
)]
pub async fn delete_permission(State(state): State<AppState>, id: PathParam<Uuid>) -> Envelope<()> {
    Pipeline::bind(path(id))
        .execute(|id| async move {
            state.store.delete_permission(id).await?;
            tracing::info!(permission_id = %id, "permission deleted");
            Ok(())
        })
        .await
}
