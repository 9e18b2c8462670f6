//! In-memory store.
//!
//! All collections sit behind one `parking_lot::RwLock`, so every
//! check-then-insert runs under a single write guard and is atomic with
//! respect to concurrent writers.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{
    matches_substring, AuditLogFilter, PermissionFilter, RbacStore, RoleFilter, UserFilter,
};
use crate::audit::AuditEntry;
use crate::error::{Result, TaskgateError};
use crate::pagination::{OffsetPagination, SortField, SortSpec};
use crate::rbac::models::{
    AuditLogId, GrantOutcome, Permission, PermissionId, PermissionName, Role, RoleId,
    RolePermission, User, UserId,
};

#[derive(Debug, Default)]
struct Collections {
    permissions: HashMap<PermissionId, Permission>,
    roles: HashMap<RoleId, Role>,
    /// Keyed by (role, permission); the key set is the uniqueness constraint.
    role_permissions: HashMap<(RoleId, PermissionId), RolePermission>,
    users: HashMap<UserId, User>,
    audit_logs: HashMap<AuditLogId, AuditEntry>,
}

impl Collections {
    fn permission_by_name(&self, name: &PermissionName) -> Option<&Permission> {
        self.permissions.values().find(|p| &p.name == name)
    }

    fn role_by_name(&self, name: &str) -> Option<&Role> {
        self.roles.values().find(|r| r.name == name)
    }

    fn check_role_constraints(&self, role: &Role) -> Result<()> {
        if self
            .roles
            .values()
            .any(|r| r.id != role.id && r.name == role.name)
        {
            return Err(TaskgateError::conflict(format!(
                "Role '{}' already exists",
                role.name
            )));
        }
        if role.is_superuser
            && self
                .roles
                .values()
                .any(|r| r.id != role.id && r.is_superuser)
        {
            return Err(TaskgateError::conflict("A superuser role already exists"));
        }
        Ok(())
    }

    fn check_user_constraints(&self, user: &User) -> Result<()> {
        if let Some(other) = self.users.values().find(|u| {
            u.id != user.id && (u.username == user.username || u.email == user.email)
        }) {
            let field = if other.username == user.username {
                "username"
            } else {
                "email"
            };
            return Err(TaskgateError::conflict(format!(
                "A user with this {} already exists",
                field
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sorting
// ═══════════════════════════════════════════════════════════════════════════════

fn cmp_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

fn compare_permissions(a: &Permission, b: &Permission, field: SortField) -> Ordering {
    match field {
        SortField::Name => a.name.cmp(&b.name),
        SortField::Description => cmp_text(&a.description, &b.description),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        _ => a.created_at.cmp(&b.created_at),
    }
    .then_with(|| a.id.cmp(&b.id))
}

fn compare_roles(a: &Role, b: &Role, field: SortField) -> Ordering {
    match field {
        SortField::Name => a.name.cmp(&b.name),
        SortField::Description => cmp_text(&a.description, &b.description),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        _ => a.created_at.cmp(&b.created_at),
    }
    .then_with(|| a.id.cmp(&b.id))
}

fn compare_users(a: &User, b: &User, field: SortField) -> Ordering {
    match field {
        SortField::Name => cmp_text(&a.name, &b.name),
        SortField::Username => a.username.cmp(&b.username),
        SortField::Email => a.email.cmp(&b.email),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        _ => a.created_at.cmp(&b.created_at),
    }
    .then_with(|| a.id.cmp(&b.id))
}

fn compare_audit(a: &AuditEntry, b: &AuditEntry, field: SortField) -> Ordering {
    match field {
        SortField::Method => a.method.cmp(&b.method),
        SortField::Path => a.path.cmp(&b.path),
        SortField::StatusCode => a.status_code.cmp(&b.status_code),
        _ => a.created_at.cmp(&b.created_at),
    }
    .then_with(|| a.id.cmp(&b.id))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Collections>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RbacStore for InMemoryStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────────

    async fn create_permission(&self, permission: &Permission) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.permission_by_name(&permission.name).is_some() {
            return Err(TaskgateError::conflict(format!(
                "Permission '{}' already exists",
                permission.name
            )));
        }
        inner.permissions.insert(permission.id, permission.clone());
        Ok(())
    }

    async fn ensure_permission(&self, permission: &Permission) -> Result<(Permission, GrantOutcome)> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.permission_by_name(&permission.name) {
            return Ok((existing.clone(), GrantOutcome::AlreadyPresent));
        }
        inner.permissions.insert(permission.id, permission.clone());
        Ok((permission.clone(), GrantOutcome::Created))
    }

    async fn find_permission(&self, id: PermissionId) -> Result<Option<Permission>> {
        Ok(self.inner.read().permissions.get(&id).cloned())
    }

    async fn find_permission_by_name(&self, name: &PermissionName) -> Result<Option<Permission>> {
        Ok(self.inner.read().permission_by_name(name).cloned())
    }

    async fn list_permissions(
        &self,
        filter: &PermissionFilter,
        sort: SortSpec,
        page: Option<OffsetPagination>,
    ) -> Result<(Vec<Permission>, u64)> {
        let inner = self.inner.read();
        let mut matched: Vec<Permission> = inner
            .permissions
            .values()
            .filter(|p| matches_substring(p.name.as_str(), filter.name.as_deref()))
            .filter(|p| matches_substring(&p.description, filter.description.as_deref()))
            .cloned()
            .collect();
        matched.sort_by(|a, b| sort.apply(compare_permissions(a, b, sort.field)));

        let total = matched.len() as u64;
        let items = match page {
            Some(page) => page.paginate_iter(matched.into_iter()),
            None => matched,
        };
        Ok((items, total))
    }

    async fn update_permission_description(
        &self,
        id: PermissionId,
        description: &str,
    ) -> Result<Option<Permission>> {
        let mut inner = self.inner.write();
        Ok(inner.permissions.get_mut(&id).map(|p| {
            p.description = description.to_string();
            p.updated_at = Utc::now();
            p.clone()
        }))
    }

    async fn delete_permission(&self, id: PermissionId) -> Result<bool> {
        let mut inner = self.inner.write();
        let removed = inner.permissions.remove(&id).is_some();
        inner.role_permissions.retain(|(_, p), _| *p != id);
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    async fn create_role(&self, role: &Role) -> Result<()> {
        let mut inner = self.inner.write();
        inner.check_role_constraints(role)?;
        inner.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn ensure_role(&self, role: &Role) -> Result<(Role, GrantOutcome)> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.role_by_name(&role.name) {
            return Ok((existing.clone(), GrantOutcome::AlreadyPresent));
        }
        inner.check_role_constraints(role)?;
        inner.roles.insert(role.id, role.clone());
        Ok((role.clone(), GrantOutcome::Created))
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>> {
        Ok(self.inner.read().roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        Ok(self.inner.read().role_by_name(name).cloned())
    }

    async fn find_superuser_role(&self) -> Result<Option<Role>> {
        Ok(self
            .inner
            .read()
            .roles
            .values()
            .find(|r| r.is_superuser)
            .cloned())
    }

    async fn list_roles(&self, filter: &RoleFilter, sort: SortSpec) -> Result<Vec<Role>> {
        let inner = self.inner.read();
        let mut roles: Vec<Role> = inner
            .roles
            .values()
            .filter(|r| matches_substring(&r.name, filter.name.as_deref()))
            .filter(|r| matches_substring(&r.description, filter.description.as_deref()))
            .cloned()
            .collect();
        roles.sort_by(|a, b| sort.apply(compare_roles(a, b, sort.field)));
        Ok(roles)
    }

    async fn update_role(&self, role: &Role) -> Result<Option<Role>> {
        let mut inner = self.inner.write();
        if !inner.roles.contains_key(&role.id) {
            return Ok(None);
        }
        inner.check_role_constraints(role)?;

        let mut updated = role.clone();
        updated.updated_at = Utc::now();
        inner.roles.insert(role.id, updated.clone());
        Ok(Some(updated))
    }

    async fn delete_role(&self, id: RoleId) -> Result<bool> {
        let mut inner = self.inner.write();
        let removed = inner.roles.remove(&id).is_some();
        inner.role_permissions.retain(|(r, _), _| *r != id);
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Role-Permission Graph
    // ─────────────────────────────────────────────────────────────────────────

    async fn grant(&self, role_id: RoleId, permission_id: PermissionId) -> Result<GrantOutcome> {
        let mut inner = self.inner.write();
        if !inner.roles.contains_key(&role_id) {
            return Err(TaskgateError::not_found("role", role_id));
        }
        if !inner.permissions.contains_key(&permission_id) {
            return Err(TaskgateError::not_found("permission", permission_id));
        }

        let key = (role_id, permission_id);
        if inner.role_permissions.contains_key(&key) {
            return Ok(GrantOutcome::AlreadyPresent);
        }
        inner
            .role_permissions
            .insert(key, RolePermission::new(role_id, permission_id));
        Ok(GrantOutcome::Created)
    }

    async fn permissions_for_role(&self, role_id: RoleId) -> Result<Vec<PermissionName>> {
        let inner = self.inner.read();
        let names: BTreeSet<PermissionName> = inner
            .role_permissions
            .keys()
            .filter(|(r, _)| *r == role_id)
            .filter_map(|(_, p)| inner.permissions.get(p))
            .map(|p| p.name.clone())
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn role_permissions(&self, role_id: RoleId) -> Result<Vec<RolePermission>> {
        let inner = self.inner.read();
        Ok(inner
            .role_permissions
            .values()
            .filter(|rp| rp.role_id == role_id)
            .cloned()
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    async fn create_user(&self, user: &User) -> Result<()> {
        let mut inner = self.inner.write();
        inner.check_user_constraints(user)?;
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.inner.read().users.get(&id).cloned())
    }

    async fn list_users(&self, filter: &UserFilter, sort: SortSpec) -> Result<Vec<User>> {
        let inner = self.inner.read();
        let mut users: Vec<User> = inner
            .users
            .values()
            .filter(|u| filter.role_id.map_or(true, |r| u.role_id == r))
            .filter(|u| matches_substring(&u.name, filter.name.as_deref()))
            .filter(|u| matches_substring(&u.username, filter.username.as_deref()))
            .filter(|u| matches_substring(&u.email, filter.email.as_deref()))
            .cloned()
            .collect();
        users.sort_by(|a, b| sort.apply(compare_users(a, b, sort.field)));
        Ok(users)
    }

    async fn update_user(&self, user: &User) -> Result<Option<User>> {
        let mut inner = self.inner.write();
        if !inner.users.contains_key(&user.id) {
            return Ok(None);
        }
        inner.check_user_constraints(user)?;

        let mut updated = user.clone();
        updated.updated_at = Utc::now();
        inner.users.insert(user.id, updated.clone());
        Ok(Some(updated))
    }

    async fn delete_user(&self, id: UserId) -> Result<bool> {
        Ok(self.inner.write().users.remove(&id).is_some())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Audit Log
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        self.inner.write().audit_logs.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn find_audit_entry(&self, id: AuditLogId) -> Result<Option<AuditEntry>> {
        Ok(self.inner.read().audit_logs.get(&id).cloned())
    }

    async fn list_audit_entries(
        &self,
        filter: &AuditLogFilter,
        sort: SortSpec,
        page: OffsetPagination,
    ) -> Result<(Vec<AuditEntry>, u64)> {
        let inner = self.inner.read();
        let mut entries: Vec<AuditEntry> = inner
            .audit_logs
            .values()
            .filter(|e| {
                filter
                    .method
                    .as_deref()
                    .map_or(true, |m| e.method.eq_ignore_ascii_case(m))
            })
            .filter(|e| matches_substring(&e.path, filter.path.as_deref()))
            .filter(|e| filter.status_code.map_or(true, |s| e.status_code == s))
            .filter(|e| filter.user_id.map_or(true, |u| e.user_id == Some(u)))
            .filter(|e| filter.role_id.map_or(true, |r| e.role_id == Some(r)))
            .cloned()
            .collect();
        entries.sort_by(|a, b| sort.apply(compare_audit(a, b, sort.field)));

        let total = entries.len() as u64;
        Ok((page.paginate_iter(entries.into_iter()), total))
    }

    async fn delete_audit_entry(&self, id: AuditLogId) -> Result<bool> {
        Ok(self.inner.write().audit_logs.remove(&id).is_some())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Health
    // ─────────────────────────────────────────────────────────────────────────

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
