use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Core Schemas (Mapped to Database) ---

/// User
///
/// The canonical identity record in the `users` table. The password column holds an
/// argon2 hash and is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub phone: Option<String>,
    #[serde(skip_serializing, default)]
    pub password: String,
    /// Opaque structured profile blob.
    pub profile: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Role
///
/// A named bundle of permissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// PermissionKind
///
/// `api` permissions gate HTTP routes; the other kinds are carried for clients
/// (menus, UI actions) and never match a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum PermissionKind {
    Api,
    Action,
    Menu,
}

impl PermissionKind {
    pub const NAMES: &'static [&'static str] = &["api", "action", "menu"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Action => "action",
            Self::Menu => "menu",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "api" => Some(Self::Api),
            "action" => Some(Self::Action),
            "menu" => Some(Self::Menu),
            _ => None,
        }
    }
}

/// ApiRoute
///
/// The `{method, path}` metadata of an `api` permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ApiRoute {
    pub method: String,
    pub path: String,
}

/// Permission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PermissionKind,
    #[schema(value_type = Object)]
    pub metadata: Value,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl Permission {
    /// The route this permission unlocks, if it is a well-formed `api` permission.
    pub fn api_route(&self) -> Option<ApiRoute> {
        if self.kind != PermissionKind::Api {
            return None;
        }
        serde_json::from_value(self.metadata.clone()).ok()
    }
}

/// Raw `permissions` row; `kind` is stored as text.
#[derive(Debug, FromRow)]
pub(crate) struct PermissionRow {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PermissionRow> for Permission {
    type Error = crate::error::StoreError;

    fn try_from(row: PermissionRow) -> Result<Self, Self::Error> {
        let kind = PermissionKind::parse(&row.kind).ok_or_else(|| {
            crate::error::StoreError::Corrupt(format!(
                "permission {} has unknown kind {:?}",
                row.id, row.kind
            ))
        })?;
        Ok(Permission {
            id: row.id,
            name: row.name,
            kind,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

/// Template
///
/// The business record managed by the `/template` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub content: String,
    pub description: Option<String>,
    /// The user that created the template.
    pub created_by: Uuid,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

// --- Store Inputs ---

/// Fields needed to insert a user. `password_hash` must already be hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub profile: Value,
}

/// Partial user update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub phone: Option<String>,
    pub profile: Option<Value>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRole {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct NewPermission {
    pub name: String,
    pub kind: PermissionKind,
    pub metadata: Value,
}

impl NewPermission {
    pub fn api(name: impl Into<String>, method: &str, path: &str) -> Self {
        Self {
            name: name.into(),
            kind: PermissionKind::Api,
            metadata: serde_json::json!({ "method": method, "path": path }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub name: String,
    pub content: String,
    pub description: Option<String>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct TemplatePatch {
    pub name: Option<String>,
    pub content: Option<String>,
    pub description: Option<String>,
}

/// A resolved page request against the template table.
#[derive(Debug, Clone, Default)]
pub struct TemplateQuery {
    pub name: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

// --- Request Payloads (Input Schemas) ---

/// LoginRequest
///
/// Input payload for `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// RefreshRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

/// ChangePasswordRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub old_password: String,
    #[serde(default)]
    pub new_password: String,
}

/// CreateUserRequest
///
/// Admin creation of a user, optionally with initial roles (applied in one transaction).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub phone: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub profile: Option<Value>,
    #[serde(default)]
    pub role_ids: Vec<String>,
}

/// AssignRoleRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AssignRoleRequest {
    #[serde(default)]
    pub role_id: String,
}

/// CreateRoleRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateRoleRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// GrantPermissionRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct GrantPermissionRequest {
    #[serde(default)]
    pub permission_id: String,
}

/// CreatePermissionRequest
///
/// `type = "api"` entries must carry `method` and `path`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreatePermissionRequest {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub method: Option<String>,
    pub path: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
}

/// CreateTemplateRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateTemplateRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
    pub description: Option<String>,
}

/// UpdateTemplateRequest
///
/// Partial update; omitted fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateTemplateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// DeleteTemplatesRequest
///
/// Batch delete body for `DELETE /template`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DeleteTemplatesRequest {
    #[serde(default)]
    pub ids: Vec<String>,
}

/// TemplateFilter
///
/// Query parameters for `GET /template`.
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TemplateFilter {
    /// Case-insensitive substring match on the template name.
    pub name: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

// --- Response Schemas (Output) ---

/// TokenPair
///
/// Output of a successful login.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TokenPair {
    pub access_token: String,
    #[ts(type = "string")]
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    #[ts(type = "string")]
    pub refresh_expires_at: DateTime<Utc>,
}

/// AccessToken
///
/// Output of `POST /auth/refresh`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AccessToken {
    pub access_token: String,
    #[ts(type = "string")]
    pub expires_at: DateTime<Utc>,
}

/// UserProfile
///
/// Output of `GET /auth/me` and the user admin endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub phone: Option<String>,
    #[schema(value_type = Object)]
    pub profile: Value,
    pub roles: Vec<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user: User, roles: Vec<Role>) -> Self {
        Self {
            id: user.id,
            username: user.username,
            phone: user.phone,
            profile: user.profile,
            roles: roles.into_iter().map(|r| r.name).collect(),
            created_at: user.created_at,
        }
    }
}

/// CreatedId
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreatedId {
    pub id: Uuid,
}

/// Affected
///
/// Row count of a write that may touch several rows.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Affected {
    pub affected: u64,
}

/// TemplatePage
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TemplatePage {
    pub items: Vec<Template>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}
