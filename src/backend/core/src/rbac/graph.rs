//! Role-permission graph: the persisted many-to-many association between
//! roles and permissions.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use super::models::{GrantOutcome, Permission, PermissionName, Role, RoleId, RoleWithPermissions};
use crate::error::{Result, TaskgateError};
use crate::pagination::SortSpec;
use crate::store::{RbacStore, RoleFilter};

/// Grants and lookups over the association collection.
#[derive(Clone)]
pub struct RolePermissionGraph {
    store: Arc<dyn RbacStore>,
}

impl RolePermissionGraph {
    pub fn new(store: Arc<dyn RbacStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RbacStore> {
        &self.store
    }

    /// Grant a permission (by name) to a role. Idempotent.
    pub async fn grant(&self, role_id: RoleId, permission: &PermissionName) -> Result<GrantOutcome> {
        let record = self
            .store
            .find_permission_by_name(permission)
            .await?
            .ok_or_else(|| TaskgateError::not_found("permission", permission))?;

        let outcome = self.store.grant(role_id, record.id).await?;
        debug!(role_id = %role_id, permission = %permission, outcome = ?outcome, "Grant applied");
        Ok(outcome)
    }

    /// Look up permission records by name. Any unknown name is a `NotFound`.
    pub async fn resolve_names(&self, names: &[PermissionName]) -> Result<Vec<Permission>> {
        let mut records = Vec::with_capacity(names.len());
        for name in names {
            let record = self
                .store
                .find_permission_by_name(name)
                .await?
                .ok_or_else(|| TaskgateError::not_found("permission", name))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Grant several permissions. Every name is resolved before any grant is
    /// written, so an unknown name leaves the graph untouched.
    pub async fn grant_all(&self, role_id: RoleId, permissions: &[PermissionName]) -> Result<usize> {
        let records = self.resolve_names(permissions).await?;

        let mut created = 0;
        for record in records {
            if self.store.grant(role_id, record.id).await? == GrantOutcome::Created {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Every permission granted to the role. Unknown roles have none.
    pub async fn list_permissions(&self, role_id: RoleId) -> Result<BTreeSet<PermissionName>> {
        Ok(self
            .store
            .permissions_for_role(role_id)
            .await?
            .into_iter()
            .collect())
    }

    /// Attach permission names to a role.
    pub async fn with_permissions(&self, role: Role) -> Result<RoleWithPermissions> {
        let permissions = self.store.permissions_for_role(role.id).await?;
        Ok(RoleWithPermissions { role, permissions })
    }

    /// Roles matching the filter, each with its permission names. The
    /// per-role lookups run concurrently.
    pub async fn list_roles(&self, filter: &RoleFilter, sort: SortSpec) -> Result<Vec<RoleWithPermissions>> {
        let roles = self.store.list_roles(filter, sort).await?;
        try_join_all(roles.into_iter().map(|role| self.with_permissions(role))).await
    }

    /// Delete a role and all of its associations.
    pub async fn delete_role(&self, role_id: RoleId) -> Result<bool> {
        self.store.delete_role(role_id).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::store::InMemoryStore;

    async fn graph_with(names: &[&str]) -> (RolePermissionGraph, Role) {
        let store = Arc::new(InMemoryStore::new());
        for name in names {
            store.create_permission(&Permission::new(*name, *name)).await.unwrap();
        }
        let role = Role::new("EDITOR", "Editor");
        store.create_role(&role).await.unwrap();
        (RolePermissionGraph::new(store), role)
    }

    #[tokio::test]
    async fn test_grant_is_idempotent() {
        let (graph, role) = graph_with(&["GET_TASKS"]).await;
        let name = PermissionName::from("GET_TASKS");

        assert_eq!(graph.grant(role.id, &name).await.unwrap(), GrantOutcome::Created);
        assert_eq!(graph.grant(role.id, &name).await.unwrap(), GrantOutcome::AlreadyPresent);

        let granted = graph.list_permissions(role.id).await.unwrap();
        assert_eq!(granted.len(), 1);
        assert!(granted.contains(&name));
    }

    #[tokio::test]
    async fn test_grant_all_rejects_unknown_without_partial_writes() {
        let (graph, role) = graph_with(&["GET_TASKS"]).await;
        let err = graph
            .grant_all(role.id, &["GET_TASKS".into(), "FLY_TASK".into()])
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(graph.list_permissions(role.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_role_has_no_permissions() {
        let (graph, _) = graph_with(&["GET_TASKS"]).await;
        assert!(graph.list_permissions(RoleId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_roles_embeds_permission_names() {
        let (graph, role) = graph_with(&["GET_TASKS", "GET_TASK"]).await;
        graph
            .grant_all(role.id, &["GET_TASKS".into(), "GET_TASK".into()])
            .await
            .unwrap();

        let roles = graph
            .list_roles(&RoleFilter::default(), SortSpec::default())
            .await
            .unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].role.name, "EDITOR");
        assert_eq!(
            roles[0].permissions,
            vec![PermissionName::from("GET_TASK"), PermissionName::from("GET_TASKS")]
        );
    }

    #[tokio::test]
    async fn test_delete_role_leaves_no_associations() {
        let (graph, role) = graph_with(&["GET_TASKS"]).await;
        graph.grant(role.id, &"GET_TASKS".into()).await.unwrap();

        assert!(graph.delete_role(role.id).await.unwrap());
        assert!(graph.store().role_permissions(role.id).await.unwrap().is_empty());
    }
}
