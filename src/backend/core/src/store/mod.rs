//! Persistence for roles, permissions, role-permission associations, users
//! and audit log entries.
//!
//! The [`RbacStore`] trait is the only seam the rest of the crate talks to:
//! - **InMemoryStore**: collections behind a single `RwLock`; used in tests and
//!   when no database URL is configured
//! - **PostgresStore**: sqlx-backed, with unique indexes enforcing the
//!   no-duplicate invariants
//!
//! Writes that must be idempotent (`ensure_*`, `grant`) are atomic
//! insert-if-absent operations in both backends.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::audit::AuditEntry;
use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::pagination::{OffsetPagination, SortSpec};
use crate::rbac::models::{
    AuditLogId, GrantOutcome, Permission, PermissionId, PermissionName, Role, RoleId,
    RolePermission, User, UserId,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Filters
// ═══════════════════════════════════════════════════════════════════════════════

/// Case-insensitive substring filters for roles.
#[derive(Debug, Clone, Default)]
pub struct RoleFilter {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Case-insensitive substring filters for permissions.
#[derive(Debug, Clone, Default)]
pub struct PermissionFilter {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// User filters: exact role, substring on the text fields.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role_id: Option<RoleId>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
}

/// Audit log filters: exact method, status, user and role; substring path.
#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub method: Option<String>,
    pub path: Option<String>,
    pub status_code: Option<u16>,
    pub user_id: Option<UserId>,
    pub role_id: Option<RoleId>,
}

/// Case-insensitive substring match; an absent needle matches everything.
pub(crate) fn matches_substring(haystack: &str, needle: Option<&str>) -> bool {
    match needle {
        None => true,
        Some(needle) => haystack.to_lowercase().contains(&needle.to_lowercase()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Document store for the RBAC collections.
#[async_trait]
pub trait RbacStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a permission. Fails with `Conflict` if the name is taken.
    async fn create_permission(&self, permission: &Permission) -> Result<()>;

    /// Insert the permission unless one with the same name exists; return the
    /// stored record either way.
    async fn ensure_permission(&self, permission: &Permission) -> Result<(Permission, GrantOutcome)>;

    async fn find_permission(&self, id: PermissionId) -> Result<Option<Permission>>;

    async fn find_permission_by_name(&self, name: &PermissionName) -> Result<Option<Permission>>;

    /// Filtered, sorted listing plus the total number of matches.
    async fn list_permissions(
        &self,
        filter: &PermissionFilter,
        sort: SortSpec,
        page: Option<OffsetPagination>,
    ) -> Result<(Vec<Permission>, u64)>;

    async fn update_permission_description(
        &self,
        id: PermissionId,
        description: &str,
    ) -> Result<Option<Permission>>;

    /// Delete a permission and every association referencing it.
    async fn delete_permission(&self, id: PermissionId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a role. Fails with `Conflict` on a duplicate name or a second
    /// superuser role.
    async fn create_role(&self, role: &Role) -> Result<()>;

    /// Insert the role unless one with the same name exists.
    async fn ensure_role(&self, role: &Role) -> Result<(Role, GrantOutcome)>;

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>>;

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>>;

    /// The role tagged superuser, if one exists.
    async fn find_superuser_role(&self) -> Result<Option<Role>>;

    async fn list_roles(&self, filter: &RoleFilter, sort: SortSpec) -> Result<Vec<Role>>;

    /// Overwrite name, description and superuser tag. Same conflicts as
    /// `create_role`.
    async fn update_role(&self, role: &Role) -> Result<Option<Role>>;

    /// Delete a role and every association referencing it.
    async fn delete_role(&self, id: RoleId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Role-Permission Graph
    // ─────────────────────────────────────────────────────────────────────────

    /// Associate a permission with a role; a no-op if already associated.
    async fn grant(&self, role_id: RoleId, permission_id: PermissionId) -> Result<GrantOutcome>;

    /// Names of every permission granted to the role, sorted.
    async fn permissions_for_role(&self, role_id: RoleId) -> Result<Vec<PermissionName>>;

    /// Raw association rows referencing the role.
    async fn role_permissions(&self, role_id: RoleId) -> Result<Vec<RolePermission>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a user. Fails with `Conflict` on a duplicate username or email.
    async fn create_user(&self, user: &User) -> Result<()>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>>;

    async fn list_users(&self, filter: &UserFilter, sort: SortSpec) -> Result<Vec<User>>;

    async fn update_user(&self, user: &User) -> Result<Option<User>>;

    async fn delete_user(&self, id: UserId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Audit Log
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<()>;

    async fn find_audit_entry(&self, id: AuditLogId) -> Result<Option<AuditEntry>>;

    async fn list_audit_entries(
        &self,
        filter: &AuditLogFilter,
        sort: SortSpec,
        page: OffsetPagination,
    ) -> Result<(Vec<AuditEntry>, u64)>;

    async fn delete_audit_entry(&self, id: AuditLogId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Health
    // ─────────────────────────────────────────────────────────────────────────

    /// Backend name for logs and the health endpoint.
    fn backend_name(&self) -> &'static str;

    async fn health_check(&self) -> Result<()>;
}

/// Open the configured store: Postgres (migrated) when a URL is set, the
/// in-memory store otherwise.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn RbacStore>> {
    match config.url.as_deref() {
        Some(url) => {
            let store = PostgresStore::connect(url, config).await?;
            store.migrate().await?;
            info!(max_connections = config.max_connections, "Connected to database");
            Ok(Arc::new(store))
        }
        None => {
            warn!("No database URL configured, state will not survive a restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}
