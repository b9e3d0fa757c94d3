//! In-process store backends.
//!
//! Used by the test-suite and by local runs without `DATABASE_URL`. All state sits
//! behind one `tokio::sync::Mutex`, which makes every single operation atomic. A
//! transaction takes the lock for its whole lifetime and mutates a private copy of
//! the tables; `commit` swaps the copy in, dropping the transaction discards it.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
    error::{StoreError, StoreResult},
    models::{
        NewPermission, NewRole, NewTemplate, NewUser, Permission, Role, Template, TemplatePatch,
        TemplateQuery, User, UserPatch,
    },
    repository::{CredentialStore, CredentialTx, TemplateStore},
};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    /// (user_id, role_id)
    user_roles: BTreeSet<(Uuid, Uuid)>,
    /// (role_id, permission_id)
    role_permissions: BTreeSet<(Uuid, Uuid)>,
}

impl Tables {
    fn user_by_username(&self, username: &str) -> Option<User> {
        self.users.values().find(|u| u.username == username).cloned()
    }

    fn insert_user(&mut self, user: NewUser) -> StoreResult<User> {
        let taken = self.users.values().any(|u| {
            u.username == user.username || (user.phone.is_some() && u.phone == user.phone)
        });
        if taken {
            return Err(StoreError::Conflict("user already exists".into()));
        }
        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            phone: user.phone,
            password: user.password_hash,
            profile: user.profile,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(created.id, created.clone());
        Ok(created)
    }

    fn update_user(&mut self, id: Uuid, patch: UserPatch) -> StoreResult<User> {
        if let Some(phone) = &patch.phone {
            if self.users.values().any(|u| u.id != id && u.phone.as_ref() == Some(phone)) {
                return Err(StoreError::Conflict("user already exists".into()));
            }
        }
        let user = self.users.get_mut(&id).ok_or(StoreError::NotFound("user"))?;
        if let Some(phone) = patch.phone {
            user.phone = Some(phone);
        }
        if let Some(profile) = patch.profile {
            user.profile = profile;
        }
        if let Some(hash) = patch.password_hash {
            user.password = hash;
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    fn delete_user(&mut self, id: Uuid) -> StoreResult<()> {
        self.users.remove(&id).ok_or(StoreError::NotFound("user"))?;
        self.user_roles.retain(|(user_id, _)| *user_id != id);
        Ok(())
    }

    fn role_by_name(&self, name: &str) -> Option<Role> {
        self.roles.values().find(|r| r.name == name).cloned()
    }

    fn insert_role(&mut self, role: NewRole) -> StoreResult<Role> {
        if self.roles.values().any(|r| r.name == role.name) {
            return Err(StoreError::Conflict("role already exists".into()));
        }
        let now = Utc::now();
        let created = Role {
            id: Uuid::new_v4(),
            name: role.name,
            description: role.description,
            created_at: now,
            updated_at: now,
        };
        self.roles.insert(created.id, created.clone());
        Ok(created)
    }

    fn delete_role(&mut self, id: Uuid) -> StoreResult<()> {
        self.roles.remove(&id).ok_or(StoreError::NotFound("role"))?;
        self.user_roles.retain(|(_, role_id)| *role_id != id);
        self.role_permissions.retain(|(role_id, _)| *role_id != id);
        Ok(())
    }

    fn assign_role(&mut self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        if !self.users.contains_key(&user_id) {
            return Err(StoreError::NotFound("user"));
        }
        if !self.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound("role"));
        }
        if !self.user_roles.insert((user_id, role_id)) {
            return Err(StoreError::Conflict("role already assigned to user".into()));
        }
        Ok(())
    }

    fn user_roles(&self, user_id: Uuid) -> Vec<Role> {
        let mut roles: Vec<Role> = self
            .user_roles
            .iter()
            .filter(|(u, _)| *u == user_id)
            .filter_map(|(_, r)| self.roles.get(r).cloned())
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        roles
    }

    fn permissions_of<'a>(&self, role_ids: impl Iterator<Item = &'a Uuid>) -> Vec<Permission> {
        let role_ids: HashSet<&Uuid> = role_ids.collect();
        let ids: BTreeSet<Uuid> = self
            .role_permissions
            .iter()
            .filter(|(r, _)| role_ids.contains(r))
            .map(|(_, p)| *p)
            .collect();
        let mut perms: Vec<Permission> = ids
            .iter()
            .filter_map(|id| self.permissions.get(id).cloned())
            .collect();
        perms.sort_by(|a, b| a.name.cmp(&b.name));
        perms
    }

    fn insert_permission(&mut self, permission: NewPermission) -> StoreResult<Permission> {
        if self.permissions.values().any(|p| p.name == permission.name) {
            return Err(StoreError::Conflict("permission already exists".into()));
        }
        let created = Permission {
            id: Uuid::new_v4(),
            name: permission.name,
            kind: permission.kind,
            metadata: permission.metadata,
            created_at: Utc::now(),
        };
        self.permissions.insert(created.id, created.clone());
        Ok(created)
    }

    fn grant(&mut self, role_id: Uuid, permission_id: Uuid) -> StoreResult<bool> {
        if !self.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound("role"));
        }
        if !self.permissions.contains_key(&permission_id) {
            return Err(StoreError::NotFound("permission"));
        }
        Ok(self.role_permissions.insert((role_id, permission_id)))
    }
}

/// InMemoryCredentialStore
#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().await.user_by_username(username))
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        self.tables.lock().await.insert_user(user)
    }

    async fn update_user(&self, id: Uuid, patch: UserPatch) -> StoreResult<User> {
        self.tables.lock().await.update_user(id, patch)
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<()> {
        self.tables.lock().await.delete_user(id)
    }

    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        self.tables.lock().await.assign_role(user_id, role_id)
    }

    async fn remove_role(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        if self.tables.lock().await.user_roles.remove(&(user_id, role_id)) {
            Ok(())
        } else {
            Err(StoreError::NotFound("role assignment"))
        }
    }

    async fn user_roles(&self, user_id: Uuid) -> StoreResult<Vec<Role>> {
        Ok(self.tables.lock().await.user_roles(user_id))
    }

    async fn effective_permissions(&self, user_id: Uuid) -> StoreResult<Vec<Permission>> {
        let tables = self.tables.lock().await;
        let roles = tables
            .user_roles
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, r)| r);
        Ok(tables.permissions_of(roles))
    }

    async fn create_role(&self, role: NewRole) -> StoreResult<Role> {
        self.tables.lock().await.insert_role(role)
    }

    async fn find_role(&self, id: Uuid) -> StoreResult<Option<Role>> {
        Ok(self.tables.lock().await.roles.get(&id).cloned())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let mut roles: Vec<Role> = self.tables.lock().await.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn delete_role(&self, id: Uuid) -> StoreResult<()> {
        self.tables.lock().await.delete_role(id)
    }

    async fn create_permission(&self, permission: NewPermission) -> StoreResult<Permission> {
        self.tables.lock().await.insert_permission(permission)
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let mut perms: Vec<Permission> =
            self.tables.lock().await.permissions.values().cloned().collect();
        perms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(perms)
    }

    async fn delete_permission(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.permissions.remove(&id).ok_or(StoreError::NotFound("permission"))?;
        tables.role_permissions.retain(|(_, p)| *p != id);
        Ok(())
    }

    async fn assign_permission_to_role(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> StoreResult<()> {
        if self.tables.lock().await.grant(role_id, permission_id)? {
            Ok(())
        } else {
            Err(StoreError::Conflict("permission already granted to role".into()))
        }
    }

    async fn revoke_permission_from_role(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> StoreResult<()> {
        if self.tables.lock().await.role_permissions.remove(&(role_id, permission_id)) {
            Ok(())
        } else {
            Err(StoreError::NotFound("permission grant"))
        }
    }

    async fn role_permissions(&self, role_id: Uuid) -> StoreResult<Vec<Permission>> {
        Ok(self.tables.lock().await.permissions_of(std::iter::once(&role_id)))
    }

    async fn begin(&self) -> StoreResult<Box<dyn CredentialTx>> {
        let guard = self.tables.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }
}

/// Holds the store lock until committed or dropped.
struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

#[async_trait]
impl CredentialTx for MemoryTx {
    async fn find_user_by_username(&mut self, username: &str) -> StoreResult<Option<User>> {
        Ok(self.work.user_by_username(username))
    }

    async fn create_user(&mut self, user: NewUser) -> StoreResult<User> {
        self.work.insert_user(user)
    }

    async fn find_role_by_name(&mut self, name: &str) -> StoreResult<Option<Role>> {
        Ok(self.work.role_by_name(name))
    }

    async fn create_role(&mut self, role: NewRole) -> StoreResult<Role> {
        self.work.insert_role(role)
    }

    async fn has_role(&mut self, user_id: Uuid, role_id: Uuid) -> StoreResult<bool> {
        Ok(self.work.user_roles.contains(&(user_id, role_id)))
    }

    async fn assign_role(&mut self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        self.work.assign_role(user_id, role_id)
    }

    async fn ensure_permission(&mut self, permission: NewPermission) -> StoreResult<bool> {
        if self.work.permissions.values().any(|p| p.name == permission.name) {
            return Ok(false);
        }
        self.work.insert_permission(permission).map(|_| true)
    }

    async fn permission_ids(&mut self) -> StoreResult<Vec<Uuid>> {
        Ok(self.work.permissions.keys().copied().collect())
    }

    async fn grant_missing(&mut self, role_id: Uuid, permission_ids: &[Uuid]) -> StoreResult<u64> {
        let mut inserted = 0;
        for permission_id in permission_ids {
            if self.work.grant(role_id, *permission_id)? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}

/// InMemoryTemplateStore
#[derive(Clone, Default)]
pub struct InMemoryTemplateStore {
    rows: Arc<Mutex<HashMap<Uuid, Template>>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn create(&self, template: NewTemplate) -> StoreResult<Template> {
        let mut rows = self.rows.lock().await;
        if rows.values().any(|t| t.name == template.name) {
            return Err(StoreError::Conflict("template already exists".into()));
        }
        let now = Utc::now();
        let created = Template {
            id: Uuid::new_v4(),
            name: template.name,
            content: template.content,
            description: template.description,
            created_by: template.created_by,
            created_at: now,
            updated_at: now,
        };
        rows.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Template>> {
        Ok(self.rows.lock().await.get(&id).cloned())
    }

    async fn list(&self, query: TemplateQuery) -> StoreResult<(Vec<Template>, i64)> {
        let needle = query.name.map(|n| n.to_lowercase());
        let mut matching: Vec<Template> = self
            .rows
            .lock()
            .await
            .values()
            .filter(|t| {
                needle
                    .as_deref()
                    .is_none_or(|n| t.name.to_lowercase().contains(n))
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect();
        Ok((items, total))
    }

    async fn update(&self, id: Uuid, patch: TemplatePatch) -> StoreResult<Template> {
        let mut rows = self.rows.lock().await;
        if let Some(name) = &patch.name {
            if rows.values().any(|t| t.id != id && &t.name == name) {
                return Err(StoreError::Conflict("template already exists".into()));
            }
        }
        let row = rows.get_mut(&id).ok_or(StoreError::NotFound("template"))?;
        if let Some(name) = patch.name {
            row.name = name;
        }
        if let Some(content) = patch.content {
            row.content = content;
        }
        if let Some(description) = patch.description {
            row.description = Some(description);
        }
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete_batch(&self, ids: &[Uuid]) -> StoreResult<u64> {
        let mut rows = self.rows.lock().await;
        let wanted: BTreeSet<Uuid> = ids.iter().copied().collect();
        let missing: Vec<Uuid> = wanted
            .iter()
            .copied()
            .filter(|id| !rows.contains_key(id))
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::MissingIds(missing));
        }
        for id in &wanted {
            rows.remove(id);
        }
        Ok(wanted.len() as u64)
    }
}
