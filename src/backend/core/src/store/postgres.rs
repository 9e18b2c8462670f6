//! PostgreSQL store.
//!
//! Uniqueness is enforced by the schema (see `migrations/`): the
//! insert-if-absent writes rely on `ON CONFLICT DO NOTHING`, and a partial
//! unique index keeps the superuser tag on at most one role.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use super::{AuditLogFilter, PermissionFilter, RbacStore, RoleFilter, UserFilter};
use crate::audit::AuditEntry;
use crate::config::DatabaseConfig;
use crate::error::{Result, TaskgateError};
use crate::pagination::{OffsetPagination, SortSpec};
use crate::rbac::models::{
    AuditLogId, GrantOutcome, Permission, PermissionId, PermissionName, Role, RoleId,
    RolePermission, User, UserId,
};

const PERMISSION_COLUMNS: &str = "id, name, description, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, name, description, is_superuser, created_at, updated_at";
const USER_COLUMNS: &str = "id, username, name, email, role_id, created_at, updated_at";
const AUDIT_COLUMNS: &str = "id, method, path, status_code, user_id, role_id, permission, \
                             decision, duration_ms, user_agent, client_ip, created_at";

/// Escape `LIKE` metacharacters so user input matches literally.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_contains(qb: &mut QueryBuilder<'_, Postgres>, column: &'static str, needle: Option<&str>) {
    if let Some(needle) = needle {
        qb.push(" AND ")
            .push(column)
            .push(" ILIKE ")
            .push_bind(format!("%{}%", escape_like(needle)));
    }
}

fn push_page(qb: &mut QueryBuilder<'_, Postgres>, page: OffsetPagination) {
    qb.push(" LIMIT ")
        .push_bind(i64::try_from(page.limit()).unwrap_or(i64::MAX))
        .push(" OFFSET ")
        .push_bind(i64::try_from(page.offset()).unwrap_or(i64::MAX));
}

/// sqlx-backed store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a connection pool.
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn push_permission_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &PermissionFilter) {
        push_contains(qb, "name", filter.name.as_deref());
        push_contains(qb, "description", filter.description.as_deref());
    }

    fn push_audit_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &AuditLogFilter) {
        if let Some(ref method) = filter.method {
            qb.push(" AND method = ").push_bind(method.to_uppercase());
        }
        push_contains(qb, "path", filter.path.as_deref());
        if let Some(status) = filter.status_code {
            qb.push(" AND status_code = ").push_bind(i32::from(status));
        }
        if let Some(user_id) = filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id.0);
        }
        if let Some(role_id) = filter.role_id {
            qb.push(" AND role_id = ").push_bind(role_id.0);
        }
    }
}

#[async_trait]
impl RbacStore for PostgresStore {
    // ═══════════════════════════════════════════════════════════════════════════
    // Permissions
    // ═══════════════════════════════════════════════════════════════════════════

    async fn create_permission(&self, permission: &Permission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO permissions (id, name, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(permission.id.0)
        .bind(permission.name.as_str())
        .bind(&permission.description)
        .bind(permission.created_at)
        .bind(permission.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_permission(&self, permission: &Permission) -> Result<(Permission, GrantOutcome)> {
        let inserted = sqlx::query_as::<_, PermissionRow>(&format!(
            r#"
            INSERT INTO permissions (id, name, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO NOTHING
            RETURNING {PERMISSION_COLUMNS}
            "#
        ))
        .bind(permission.id.0)
        .bind(permission.name.as_str())
        .bind(&permission.description)
        .bind(permission.created_at)
        .bind(permission.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row.into(), GrantOutcome::Created));
        }

        let existing = self
            .find_permission_by_name(&permission.name)
            .await?
            .ok_or_else(|| {
                TaskgateError::internal(format!(
                    "permission '{}' vanished after conflicting insert",
                    permission.name
                ))
            })?;
        Ok((existing, GrantOutcome::AlreadyPresent))
    }

    async fn find_permission(&self, id: PermissionId) -> Result<Option<Permission>> {
        let row = sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn find_permission_by_name(&self, name: &PermissionName) -> Result<Option<Permission>> {
        let row = sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE name = $1"
        ))
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_permissions(
        &self,
        filter: &PermissionFilter,
        sort: SortSpec,
        page: Option<OffsetPagination>,
    ) -> Result<(Vec<Permission>, u64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM permissions WHERE TRUE");
        Self::push_permission_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE TRUE"
        ));
        Self::push_permission_filter(&mut qb, filter);
        qb.push(" ").push(sort.sql_clause());
        if let Some(page) = page {
            push_page(&mut qb, page);
        }

        let rows = qb
            .build_query_as::<PermissionRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok((rows.into_iter().map(Into::into).collect(), total as u64))
    }

    async fn update_permission_description(
        &self,
        id: PermissionId,
        description: &str,
    ) -> Result<Option<Permission>> {
        let row = sqlx::query_as::<_, PermissionRow>(&format!(
            r#"
            UPDATE permissions SET description = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {PERMISSION_COLUMNS}
            "#
        ))
        .bind(id.0)
        .bind(description)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn delete_permission(&self, id: PermissionId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM role_permissions WHERE permission_id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Roles
    // ═══════════════════════════════════════════════════════════════════════════

    async fn create_role(&self, role: &Role) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO roles (id, name, description, is_superuser, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(role.id.0)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_superuser)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_role(&self, role: &Role) -> Result<(Role, GrantOutcome)> {
        let inserted = sqlx::query_as::<_, RoleRow>(&format!(
            r#"
            INSERT INTO roles (id, name, description, is_superuser, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name) DO NOTHING
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(role.id.0)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_superuser)
        .bind(role.created_at)
        .bind(role.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row.into(), GrantOutcome::Created));
        }

        let existing = self.find_role_by_name(&role.name).await?.ok_or_else(|| {
            TaskgateError::internal(format!(
                "role '{}' vanished after conflicting insert",
                role.name
            ))
        })?;
        Ok((existing, GrantOutcome::AlreadyPresent))
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn find_superuser_role(&self) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE is_superuser"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_roles(&self, filter: &RoleFilter, sort: SortSpec) -> Result<Vec<Role>> {
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {ROLE_COLUMNS} FROM roles WHERE TRUE"));
        push_contains(&mut qb, "name", filter.name.as_deref());
        push_contains(&mut qb, "description", filter.description.as_deref());
        qb.push(" ").push(sort.sql_clause());

        let rows = qb.build_query_as::<RoleRow>().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_role(&self, role: &Role) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            r#"
            UPDATE roles SET name = $2, description = $3, is_superuser = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(role.id.0)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_superuser)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn delete_role(&self, id: RoleId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Role-Permission Graph
    // ═══════════════════════════════════════════════════════════════════════════

    async fn grant(&self, role_id: RoleId, permission_id: PermissionId) -> Result<GrantOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (role_id, permission_id) DO NOTHING
            "#,
        )
        .bind(role_id.0)
        .bind(permission_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => TaskgateError::not_found(
                "role or permission",
                format!("{}/{}", role_id, permission_id),
            ),
            _ => TaskgateError::from(e),
        })?;

        Ok(if result.rows_affected() == 1 {
            GrantOutcome::Created
        } else {
            GrantOutcome::AlreadyPresent
        })
    }

    async fn permissions_for_role(&self, role_id: RoleId) -> Result<Vec<PermissionName>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT p.name
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = $1
            ORDER BY p.name
            "#,
        )
        .bind(role_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(names.into_iter().map(PermissionName::from).collect())
    }

    async fn role_permissions(&self, role_id: RoleId) -> Result<Vec<RolePermission>> {
        let rows = sqlx::query_as::<_, RolePermissionRow>(
            "SELECT role_id, permission_id, created_at FROM role_permissions WHERE role_id = $1",
        )
        .bind(role_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Users
    // ═══════════════════════════════════════════════════════════════════════════

    async fn create_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, name, email, role_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id.0)
        .bind(&user.username)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role_id.0)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_users(&self, filter: &UserFilter, sort: SortSpec) -> Result<Vec<User>> {
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users WHERE TRUE"));
        if let Some(role_id) = filter.role_id {
            qb.push(" AND role_id = ").push_bind(role_id.0);
        }
        push_contains(&mut qb, "name", filter.name.as_deref());
        push_contains(&mut qb, "username", filter.username.as_deref());
        push_contains(&mut qb, "email", filter.email.as_deref());
        qb.push(" ").push(sort.sql_clause());

        let rows = qb.build_query_as::<UserRow>().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_user(&self, user: &User) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET username = $2, name = $3, email = $4, role_id = $5, updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id.0)
        .bind(&user.username)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn delete_user(&self, id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Audit Log
    // ═══════════════════════════════════════════════════════════════════════════

    async fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, method, path, status_code, user_id, role_id, permission,
                decision, duration_ms, user_agent, client_ip, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entry.id.0)
        .bind(&entry.method)
        .bind(&entry.path)
        .bind(i32::from(entry.status_code))
        .bind(entry.user_id.map(|u| u.0))
        .bind(entry.role_id.map(|r| r.0))
        .bind(entry.permission.as_ref().map(|p| p.as_str().to_string()))
        .bind(&entry.decision)
        .bind(i64::try_from(entry.duration_ms).unwrap_or(i64::MAX))
        .bind(&entry.user_agent)
        .bind(&entry.client_ip)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_audit_entry(&self, id: AuditLogId) -> Result<Option<AuditEntry>> {
        let row = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_audit_entries(
        &self,
        filter: &AuditLogFilter,
        sort: SortSpec,
        page: OffsetPagination,
    ) -> Result<(Vec<AuditEntry>, u64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_logs WHERE TRUE");
        Self::push_audit_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs WHERE TRUE"
        ));
        Self::push_audit_filter(&mut qb, filter);
        qb.push(" ").push(sort.sql_clause());
        push_page(&mut qb, page);

        let rows = qb.build_query_as::<AuditRow>().fetch_all(&self.pool).await?;
        Ok((rows.into_iter().map(Into::into).collect(), total as u64))
    }

    async fn delete_audit_entry(&self, id: AuditLogId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Health
    // ═══════════════════════════════════════════════════════════════════════════

    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types (for sqlx queries)
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct PermissionRow {
    id: Uuid,
    name: String,
    description: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PermissionRow> for Permission {
    fn from(row: PermissionRow) -> Self {
        Self {
            id: PermissionId(row.id),
            name: PermissionName(row.name),
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    id: Uuid,
    name: String,
    description: String,
    is_superuser: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Self {
            id: RoleId(row.id),
            name: row.name,
            description: row.description,
            is_superuser: row.is_superuser,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RolePermissionRow {
    role_id: Uuid,
    permission_id: Uuid,
    created_at: DateTime<Utc>,
}

impl From<RolePermissionRow> for RolePermission {
    fn from(row: RolePermissionRow) -> Self {
        Self {
            role_id: RoleId(row.role_id),
            permission_id: PermissionId(row.permission_id),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    name: String,
    email: String,
    role_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: UserId(row.id),
            username: row.username,
            name: row.name,
            email: row.email,
            role_id: RoleId(row.role_id),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    method: String,
    path: String,
    status_code: i32,
    user_id: Option<Uuid>,
    role_id: Option<Uuid>,
    permission: Option<String>,
    decision: Option<String>,
    duration_ms: i64,
    user_agent: Option<String>,
    client_ip: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        Self {
            id: AuditLogId(row.id),
            method: row.method,
            path: row.path,
            status_code: u16::try_from(row.status_code).unwrap_or_default(),
            user_id: row.user_id.map(UserId),
            role_id: row.role_id.map(RoleId),
            permission: row.permission.map(PermissionName),
            decision: row.decision,
            duration_ms: u64::try_from(row.duration_ms).unwrap_or_default(),
            user_agent: row.user_agent,
            client_ip: row.client_ip,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn test_filters_render_bind_placeholders() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM audit_logs WHERE TRUE");
        PostgresStore::push_audit_filter(
            &mut qb,
            &AuditLogFilter {
                method: Some("get".to_string()),
                status_code: Some(403),
                ..Default::default()
            },
        );
        assert_eq!(
            qb.sql(),
            "SELECT 1 FROM audit_logs WHERE TRUE AND method = $1 AND status_code = $2"
        );
    }
}
