use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction, query_builder::QueryBuilder};
use uuid::Uuid;

use crate::{
    error::{StoreError, StoreResult},
    models::{
        NewPermission, NewRole, NewTemplate, NewUser, Permission, PermissionRow, Role, Template,
        TemplatePatch, TemplateQuery, User, UserPatch,
    },
};

/// CredentialStore
///
/// The abstract contract over users, roles, permissions and the two join tables.
/// Handlers, the authorization middleware and the bootstrap routine only ever see
/// `Arc<dyn CredentialStore>`, so the Postgres and in-memory backends are
/// interchangeable.
///
/// Single-statement writes are atomic on their own. Anything that touches several
/// tables goes through [`CredentialStore::begin`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    // --- Users ---
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    /// Conflict if the username or phone is taken.
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;
    async fn update_user(&self, id: Uuid, patch: UserPatch) -> StoreResult<User>;
    /// Removes the user and, by cascade, its role assignments.
    async fn delete_user(&self, id: Uuid) -> StoreResult<()>;

    // --- User <-> Role ---
    /// Conflict if already assigned; NotFound if either side does not exist.
    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()>;
    async fn remove_role(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()>;
    async fn user_roles(&self, user_id: Uuid) -> StoreResult<Vec<Role>>;
    /// The union of the permissions of every role the user holds, each listed once.
    async fn effective_permissions(&self, user_id: Uuid) -> StoreResult<Vec<Permission>>;

    // --- Roles ---
    async fn create_role(&self, role: NewRole) -> StoreResult<Role>;
    async fn find_role(&self, id: Uuid) -> StoreResult<Option<Role>>;
    async fn list_roles(&self) -> StoreResult<Vec<Role>>;
    async fn delete_role(&self, id: Uuid) -> StoreResult<()>;

    // --- Permissions ---
    async fn create_permission(&self, permission: NewPermission) -> StoreResult<Permission>;
    async fn list_permissions(&self) -> StoreResult<Vec<Permission>>;
    async fn delete_permission(&self, id: Uuid) -> StoreResult<()>;

    // --- Role <-> Permission ---
    async fn assign_permission_to_role(&self, role_id: Uuid, permission_id: Uuid)
    -> StoreResult<()>;
    async fn revoke_permission_from_role(&self, role_id: Uuid, permission_id: Uuid)
    -> StoreResult<()>;
    async fn role_permissions(&self, role_id: Uuid) -> StoreResult<Vec<Permission>>;

    /// Opens a unit of work. Dropping the returned value without `commit` rolls back.
    async fn begin(&self) -> StoreResult<Box<dyn CredentialTx>>;

    /// create_user_with_roles
    ///
    /// Inserts a user and its initial role assignments in one transaction. A missing
    /// role leaves no user behind; a role listed twice is assigned once.
    async fn create_user_with_roles(&self, user: NewUser, role_ids: &[Uuid]) -> StoreResult<User> {
        let mut seen = HashSet::new();
        let mut tx = self.begin().await?;
        let created = tx.create_user(user).await?;
        for role_id in role_ids.iter().filter(|id| seen.insert(**id)) {
            tx.assign_role(created.id, *role_id).await?;
        }
        tx.commit().await?;
        Ok(created)
    }
}

/// CredentialTx
///
/// The operations available inside a credential transaction. This is the surface the
/// bootstrap routine and multi-table writes need; everything else goes through the
/// store directly.
#[async_trait]
pub trait CredentialTx: Send {
    async fn find_user_by_username(&mut self, username: &str) -> StoreResult<Option<User>>;
    async fn create_user(&mut self, user: NewUser) -> StoreResult<User>;
    async fn find_role_by_name(&mut self, name: &str) -> StoreResult<Option<Role>>;
    async fn create_role(&mut self, role: NewRole) -> StoreResult<Role>;
    async fn has_role(&mut self, user_id: Uuid, role_id: Uuid) -> StoreResult<bool>;
    async fn assign_role(&mut self, user_id: Uuid, role_id: Uuid) -> StoreResult<()>;
    /// Inserts the permission unless one with the same name exists. Returns whether
    /// a row was inserted.
    async fn ensure_permission(&mut self, permission: NewPermission) -> StoreResult<bool>;
    async fn permission_ids(&mut self) -> StoreResult<Vec<Uuid>>;
    /// Grants each listed permission the role does not hold yet. Returns the number
    /// of pairs inserted.
    async fn grant_missing(&mut self, role_id: Uuid, permission_ids: &[Uuid]) -> StoreResult<u64>;
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// CredentialState
///
/// The concrete type used to share the credential store across the application state.
pub type CredentialState = Arc<dyn CredentialStore>;

/// TemplateStore
///
/// Persistence for the template business module.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn create(&self, template: NewTemplate) -> StoreResult<Template>;
    async fn get(&self, id: Uuid) -> StoreResult<Option<Template>>;
    /// One page of templates plus the total number matching the filter.
    async fn list(&self, query: TemplateQuery) -> StoreResult<(Vec<Template>, i64)>;
    async fn update(&self, id: Uuid, patch: TemplatePatch) -> StoreResult<Template>;
    /// All-or-nothing: if any id is unknown nothing is deleted and the unknown ids
    /// are reported.
    async fn delete_batch(&self, ids: &[Uuid]) -> StoreResult<u64>;
}

pub type TemplateState = Arc<dyn TemplateStore>;

// --- SQL fragments ---

/// An ILIKE pattern matching `term` as a literal substring. Backslash is the
/// default LIKE escape character in Postgres.
fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

const USER_COLUMNS: &str = "id, username, phone, password, profile, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, name, description, created_at, updated_at";
const PERMISSION_COLUMNS: &str = "id, name, kind, metadata, created_at";
const TEMPLATE_COLUMNS: &str = "id, name, content, description, created_by, created_at, updated_at";

/// Maps a join-table insert failure: duplicate pair is a conflict, a dangling
/// reference names the missing side by its foreign key constraint.
fn join_write(
    context: &'static str,
    duplicate: &'static str,
) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |source| match &source {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(duplicate.to_string())
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::NotFound(fk_entity(db.constraint()))
        }
        _ => StoreError::Database { context, source },
    }
}

fn fk_entity(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("user_roles_user_fk") => "user",
        Some("user_roles_role_fk" | "role_permissions_role_fk") => "role",
        Some("role_permissions_permission_fk") => "permission",
        _ => "referenced row",
    }
}

fn into_permissions(rows: Vec<PermissionRow>) -> StoreResult<Vec<Permission>> {
    rows.into_iter().map(Permission::try_from).collect()
}

/// PostgresCredentialStore
///
/// The `CredentialStore` backed by PostgreSQL. Schema: `migrations/0001_rbac.sql`.
pub struct PostgresCredentialStore {
    pool: PgPool,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"))
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::db("find user by username"))
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::db("find user by id"))
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        insert_user(&self.pool, user).await
    }

    /// update_user
    ///
    /// Uses `COALESCE` so that only the `Some` fields of the patch overwrite columns.
    async fn update_user(&self, id: Uuid, patch: UserPatch) -> StoreResult<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET phone = COALESCE($2, phone),
                profile = COALESCE($3, profile),
                password = COALESCE($4, password),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.phone)
        .bind(patch.profile)
        .bind(patch.password_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::write("update user", "user"))?
        .ok_or(StoreError::NotFound("user"))
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<()> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::db("delete user"))?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("user"));
        }
        Ok(())
    }

    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(join_write("assign role", "role already assigned to user"))?;
        Ok(())
    }

    async fn remove_role(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        let res = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::db("remove role"))?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("role assignment"));
        }
        Ok(())
    }

    async fn user_roles(&self, user_id: Uuid) -> StoreResult<Vec<Role>> {
        sqlx::query_as::<_, Role>(
            r#"
            SELECT r.id, r.name, r.description, r.created_at, r.updated_at
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::db("list user roles"))
    }

    /// effective_permissions
    ///
    /// Computed fresh on every call; `DISTINCT` collapses permissions reachable
    /// through more than one role.
    async fn effective_permissions(&self, user_id: Uuid) -> StoreResult<Vec<Permission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT DISTINCT p.id, p.name, p.kind, p.metadata, p.created_at
            FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            JOIN user_roles ur ON ur.role_id = rp.role_id
            WHERE ur.user_id = $1
            ORDER BY p.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::db("effective permissions"))?;
        into_permissions(rows)
    }

    async fn create_role(&self, role: NewRole) -> StoreResult<Role> {
        insert_role(&self.pool, role).await
    }

    async fn find_role(&self, id: Uuid) -> StoreResult<Option<Role>> {
        sqlx::query_as::<_, Role>(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::db("find role"))
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        sqlx::query_as::<_, Role>(&format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name"))
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::db("list roles"))
    }

    async fn delete_role(&self, id: Uuid) -> StoreResult<()> {
        let res = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::db("delete role"))?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("role"));
        }
        Ok(())
    }

    async fn create_permission(&self, permission: NewPermission) -> StoreResult<Permission> {
        let row = sqlx::query_as::<_, PermissionRow>(&format!(
            "INSERT INTO permissions (id, name, kind, metadata) VALUES ($1, $2, $3, $4) RETURNING {PERMISSION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&permission.name)
        .bind(permission.kind.as_str())
        .bind(&permission.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::write("create permission", "permission"))?;
        row.try_into()
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::db("list permissions"))?;
        into_permissions(rows)
    }

    async fn delete_permission(&self, id: Uuid) -> StoreResult<()> {
        let res = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::db("delete permission"))?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("permission"));
        }
        Ok(())
    }

    async fn assign_permission_to_role(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> StoreResult<()> {
        sqlx::query("INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)")
            .bind(role_id)
            .bind(permission_id)
            .execute(&self.pool)
            .await
            .map_err(join_write("grant permission", "permission already granted to role"))?;
        Ok(())
    }

    async fn revoke_permission_from_role(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> StoreResult<()> {
        let res =
            sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
                .bind(role_id)
                .bind(permission_id)
                .execute(&self.pool)
                .await
                .map_err(StoreError::db("revoke permission"))?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("permission grant"));
        }
        Ok(())
    }

    async fn role_permissions(&self, role_id: Uuid) -> StoreResult<Vec<Permission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT p.id, p.name, p.kind, p.metadata, p.created_at
            FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            WHERE rp.role_id = $1
            ORDER BY p.name
            "#,
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::db("list role permissions"))?;
        into_permissions(rows)
    }

    async fn begin(&self) -> StoreResult<Box<dyn CredentialTx>> {
        let tx = self.pool.begin().await.map_err(StoreError::db("begin transaction"))?;
        Ok(Box::new(PgCredentialTx { tx }))
    }
}

async fn insert_user<'e, E>(executor: E, user: NewUser) -> StoreResult<User>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (id, username, phone, password, profile) VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(&user.username)
    .bind(&user.phone)
    .bind(&user.password_hash)
    .bind(&user.profile)
    .fetch_one(executor)
    .await
    .map_err(StoreError::write("create user", "user"))
}

async fn insert_role<'e, E>(executor: E, role: NewRole) -> StoreResult<Role>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, Role>(&format!(
        "INSERT INTO roles (id, name, description) VALUES ($1, $2, $3) RETURNING {ROLE_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(&role.name)
    .bind(&role.description)
    .fetch_one(executor)
    .await
    .map_err(StoreError::write("create role", "role"))
}

/// PgCredentialTx
///
/// Wraps a sqlx transaction. sqlx rolls back on drop, which gives the
/// drop-without-commit semantics of [`CredentialTx`] for free.
pub struct PgCredentialTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CredentialTx for PgCredentialTx {
    async fn find_user_by_username(&mut self, username: &str) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"))
            .bind(username)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::db("find user by username"))
    }

    async fn create_user(&mut self, user: NewUser) -> StoreResult<User> {
        insert_user(&mut *self.tx, user).await
    }

    async fn find_role_by_name(&mut self, name: &str) -> StoreResult<Option<Role>> {
        sqlx::query_as::<_, Role>(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1"))
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::db("find role by name"))
    }

    async fn create_role(&mut self, role: NewRole) -> StoreResult<Role> {
        insert_role(&mut *self.tx, role).await
    }

    async fn has_role(&mut self, user_id: Uuid, role_id: Uuid) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM user_roles WHERE user_id = $1 AND role_id = $2)",
        )
        .bind(user_id)
        .bind(role_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::db("check role assignment"))
    }

    async fn assign_role(&mut self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
            .bind(user_id)
            .bind(role_id)
            .execute(&mut *self.tx)
            .await
            .map_err(join_write("assign role", "role already assigned to user"))?;
        Ok(())
    }

    async fn ensure_permission(&mut self, permission: NewPermission) -> StoreResult<bool> {
        let res = sqlx::query(
            "INSERT INTO permissions (id, name, kind, metadata) VALUES ($1, $2, $3, $4) ON CONFLICT (name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(&permission.name)
        .bind(permission.kind.as_str())
        .bind(&permission.metadata)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::db("seed permission"))?;
        Ok(res.rows_affected() > 0)
    }

    async fn permission_ids(&mut self) -> StoreResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM permissions")
            .fetch_all(&mut *self.tx)
            .await
            .map_err(StoreError::db("list permission ids"))
    }

    async fn grant_missing(&mut self, role_id: Uuid, permission_ids: &[Uuid]) -> StoreResult<u64> {
        let res = sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            SELECT $1, pid FROM UNNEST($2::uuid[]) AS pid
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(permission_ids)
        .execute(&mut *self.tx)
        .await
        .map_err(join_write("grant missing permissions", "permission already granted to role"))?;
        Ok(res.rows_affected())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(StoreError::db("commit transaction"))
    }
}

/// PostgresTemplateStore
pub struct PostgresTemplateStore {
    pool: PgPool,
}

impl PostgresTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateStore for PostgresTemplateStore {
    async fn create(&self, template: NewTemplate) -> StoreResult<Template> {
        sqlx::query_as::<_, Template>(&format!(
            "INSERT INTO templates (id, name, content, description, created_by) VALUES ($1, $2, $3, $4, $5) RETURNING {TEMPLATE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&template.name)
        .bind(&template.content)
        .bind(&template.description)
        .bind(template.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::write("create template", "template"))
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Template>> {
        sqlx::query_as::<_, Template>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::db("get template"))
    }

    /// list
    ///
    /// Builds the filter with `QueryBuilder` so the search term is always bound,
    /// never interpolated.
    async fn list(&self, query: TemplateQuery) -> StoreResult<(Vec<Template>, i64)> {
        let pattern = query.name.as_deref().map(contains_pattern);

        let mut count: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM templates");
        if let Some(p) = &pattern {
            count.push(" WHERE name ILIKE ");
            count.push_bind(p.clone());
        }
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::db("count templates"))?;

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {TEMPLATE_COLUMNS} FROM templates"));
        if let Some(p) = pattern {
            builder.push(" WHERE name ILIKE ");
            builder.push_bind(p);
        }
        builder.push(" ORDER BY created_at DESC, id LIMIT ");
        builder.push_bind(query.limit);
        builder.push(" OFFSET ");
        builder.push_bind(query.offset);

        let items = builder
            .build_query_as::<Template>()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::db("list templates"))?;
        Ok((items, total))
    }

    async fn update(&self, id: Uuid, patch: TemplatePatch) -> StoreResult<Template> {
        sqlx::query_as::<_, Template>(&format!(
            r#"
            UPDATE templates
            SET name = COALESCE($2, name),
                content = COALESCE($3, content),
                description = COALESCE($4, description),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TEMPLATE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.name)
        .bind(patch.content)
        .bind(patch.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::write("update template", "template"))?
        .ok_or(StoreError::NotFound("template"))
    }

    /// delete_batch
    ///
    /// Locks the requested rows first; if any id is unknown the transaction is
    /// dropped (rolled back) before anything is deleted.
    async fn delete_batch(&self, ids: &[Uuid]) -> StoreResult<u64> {
        let wanted: Vec<Uuid> = {
            let mut seen = HashSet::new();
            ids.iter().copied().filter(|id| seen.insert(*id)).collect()
        };

        let mut tx = self.pool.begin().await.map_err(StoreError::db("begin transaction"))?;

        let found: HashSet<Uuid> =
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM templates WHERE id = ANY($1) FOR UPDATE")
                .bind(&wanted)
                .fetch_all(&mut *tx)
                .await
                .map_err(StoreError::db("lock templates"))?
                .into_iter()
                .collect();

        let missing: Vec<Uuid> = wanted.iter().copied().filter(|id| !found.contains(id)).collect();
        if !missing.is_empty() {
            return Err(StoreError::MissingIds(missing));
        }

        let res = sqlx::query("DELETE FROM templates WHERE id = ANY($1)")
            .bind(&wanted)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::db("delete templates"))?;
        tx.commit().await.map_err(StoreError::db("commit transaction"))?;
        Ok(res.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::contains_pattern;

    #[test]
    fn search_term_wildcards_are_escaped() {
        assert_eq!(contains_pattern("welcome"), "%welcome%");
        assert_eq!(contains_pattern("50%_off"), r"%50\%\_off%");
        assert_eq!(contains_pattern(r"a\b"), r"%a\\b%");
    }
}
