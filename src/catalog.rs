//! The process-wide table of known permission keys.
//!
//! Every RBAC-gated route has exactly one entry here. The catalog is built once at
//! startup, shared read-only, and seeded into the store by the bootstrap routine.

use std::collections::HashSet;

use crate::models::{NewPermission, Permission};

/// CatalogEntry
///
/// One `api` permission: a stable name plus the route template it unlocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: &'static str,
    pub method: &'static str,
    pub path: &'static str,
}

const fn entry(name: &'static str, method: &'static str, path: &'static str) -> CatalogEntry {
    CatalogEntry { name, method, path }
}

const BUILTIN: &[CatalogEntry] = &[
    // users
    entry("user:create", "POST", "/users"),
    entry("user:read", "GET", "/users/{id}"),
    entry("user:delete", "DELETE", "/users/{id}"),
    entry("user:assign-role", "POST", "/users/{id}/roles"),
    entry("user:remove-role", "DELETE", "/users/{id}/roles/{role_id}"),
    entry("user:permissions", "GET", "/users/{id}/permissions"),
    // roles
    entry("role:create", "POST", "/roles"),
    entry("role:list", "GET", "/roles"),
    entry("role:delete", "DELETE", "/roles/{id}"),
    entry("role:permissions", "GET", "/roles/{id}/permissions"),
    entry("role:grant", "POST", "/roles/{id}/permissions"),
    entry("role:revoke", "DELETE", "/roles/{id}/permissions/{permission_id}"),
    // permissions
    entry("permission:create", "POST", "/permissions"),
    entry("permission:list", "GET", "/permissions"),
    entry("permission:delete", "DELETE", "/permissions/{id}"),
    // templates
    entry("template:create", "POST", "/template"),
    entry("template:list", "GET", "/template"),
    entry("template:read", "GET", "/template/{id}"),
    entry("template:update", "PUT", "/template/{id}"),
    entry("template:delete", "DELETE", "/template"),
];

/// PermissionCatalog
#[derive(Debug, Clone)]
pub struct PermissionCatalog {
    entries: Vec<CatalogEntry>,
}

impl PermissionCatalog {
    /// The catalog of every gated route this service mounts.
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN.to_vec(),
        }
    }

    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store inputs for seeding every entry.
    pub fn new_permissions(&self) -> Vec<NewPermission> {
        self.entries
            .iter()
            .map(|e| NewPermission::api(e.name, e.method, e.path))
            .collect()
    }

    /// Names of catalog entries that have no stored permission of the same name.
    pub fn verify(&self, stored: &[Permission]) -> Vec<&'static str> {
        let known: HashSet<&str> = stored.iter().map(|p| p.name.as_str()).collect();
        self.entries
            .iter()
            .filter(|e| !known.contains(e.name))
            .map(|e| e.name)
            .collect()
    }
}
