//! The authorization gate.
//!
//! Answers "may this principal satisfy this requirement?" against the
//! current persisted grants. Every call reads the graph afresh, so grant
//! edits take effect on the next request.
//!
//! Evaluation order:
//! 1. no principal → `Deny(Unauthenticated)`
//! 2. load the permissions granted to the principal's role
//! 3. owner-only routes allow only the superuser role, whatever it holds
//! 4. otherwise allow iff the requirement is in the granted set
//!
//! Lookup failures never escape: they become `Deny(LookupFailed)`.

use metrics::counter;
use tracing::{debug, warn};

use super::graph::RolePermissionGraph;
use super::models::{Decision, DenyReason, PermissionName, Principal};
use crate::error::Result;

/// Stateless decision point over the role-permission graph.
#[derive(Clone)]
pub struct AuthorizationGate {
    graph: RolePermissionGraph,
}

impl AuthorizationGate {
    pub fn new(graph: RolePermissionGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &RolePermissionGraph {
        &self.graph
    }

    /// Decide whether `principal` may proceed.
    pub async fn authorize(
        &self,
        principal: Option<&Principal>,
        requirement: &PermissionName,
        owner_only: bool,
    ) -> Decision {
        let decision = match principal {
            None => Decision::Deny(DenyReason::Unauthenticated),
            Some(principal) => match self.evaluate(principal, requirement, owner_only).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(
                        user_id = %principal.user_id,
                        role_id = %principal.role_id,
                        permission = %requirement,
                        error = %e,
                        "Permission lookup failed, denying access"
                    );
                    Decision::Deny(DenyReason::LookupFailed)
                }
            },
        };

        let reason = match &decision {
            Decision::Allow => "granted",
            Decision::Deny(reason) => reason.label(),
        };
        counter!(
            "taskgate_authz_decisions_total",
            "decision" => decision.label(),
            "reason" => reason,
        )
        .increment(1);

        debug!(
            user_id = ?principal.map(|p| p.user_id),
            permission = %requirement,
            owner_only,
            decision = decision.label(),
            reason,
            "Authorization decided"
        );

        decision
    }

    async fn evaluate(
        &self,
        principal: &Principal,
        requirement: &PermissionName,
        owner_only: bool,
    ) -> Result<Decision> {
        let granted = self.graph.list_permissions(principal.role_id).await?;

        if owner_only {
            let superuser = self.graph.store().find_superuser_role().await?;
            return Ok(match superuser {
                Some(role) if role.id == principal.role_id => Decision::Allow,
                _ => Decision::Deny(DenyReason::NotOwner),
            });
        }

        Ok(if granted.contains(requirement) {
            Decision::Allow
        } else {
            Decision::Deny(DenyReason::MissingPermission(requirement.clone()))
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEntry;
    use crate::error::TaskgateError;
    use crate::pagination::{OffsetPagination, SortSpec};
    use crate::rbac::models::{
        AuditLogId, GrantOutcome, Permission, PermissionId, Role, RoleId, RolePermission, User,
        UserId,
    };
    use crate::store::{
        AuditLogFilter, InMemoryStore, PermissionFilter, RbacStore, RoleFilter, UserFilter,
    };
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn principal_for(role_id: RoleId) -> Principal {
        Principal {
            user_id: UserId::new(),
            username: "alice".to_string(),
            role_id,
            issued_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    async fn setup() -> (AuthorizationGate, Role, Role) {
        let store = Arc::new(InMemoryStore::new());
        let names = ["GET_TASKS", "EDIT_USER_ROLE"];
        for name in names {
            store.create_permission(&Permission::new(name, name)).await.unwrap();
        }

        let owner = Role::new("OWNER", "Owner").superuser();
        let admin = Role::new("ADMIN", "Holds every permission");
        store.create_role(&owner).await.unwrap();
        store.create_role(&admin).await.unwrap();

        let graph = RolePermissionGraph::new(store);
        let all: Vec<PermissionName> = names.iter().map(|n| PermissionName::from(*n)).collect();
        graph.grant_all(owner.id, &all).await.unwrap();
        graph.grant_all(admin.id, &all).await.unwrap();

        (AuthorizationGate::new(graph), owner, admin)
    }

    #[tokio::test]
    async fn test_null_principal_is_unauthenticated() {
        let (gate, _, _) = setup().await;
        for owner_only in [false, true] {
            let decision = gate.authorize(None, &"GET_TASKS".into(), owner_only).await;
            assert_eq!(decision, Decision::Deny(DenyReason::Unauthenticated));
        }
    }

    #[tokio::test]
    async fn test_granted_permission_allows() {
        let (gate, _, admin) = setup().await;
        let principal = principal_for(admin.id);
        let decision = gate.authorize(Some(&principal), &"GET_TASKS".into(), false).await;
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_missing_permission_denies() {
        let (gate, _, admin) = setup().await;
        let principal = principal_for(admin.id);
        let decision = gate.authorize(Some(&principal), &"DELETE_TASK".into(), false).await;
        assert_eq!(
            decision,
            Decision::Deny(DenyReason::MissingPermission("DELETE_TASK".into()))
        );
    }

    #[tokio::test]
    async fn test_owner_only_denies_non_superuser_holding_everything() {
        let (gate, _, admin) = setup().await;
        let principal = principal_for(admin.id);
        let decision = gate
            .authorize(Some(&principal), &"EDIT_USER_ROLE".into(), true)
            .await;
        assert_eq!(decision, Decision::Deny(DenyReason::NotOwner));
    }

    #[tokio::test]
    async fn test_owner_only_allows_superuser_regardless_of_grants() {
        let (gate, owner, _) = setup().await;
        let principal = principal_for(owner.id);
        let decision = gate
            .authorize(Some(&principal), &"NOT_IN_CATALOG".into(), true)
            .await;
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_unknown_role_denied() {
        let (gate, _, _) = setup().await;
        let principal = principal_for(RoleId::new());
        let decision = gate.authorize(Some(&principal), &"GET_TASKS".into(), false).await;
        assert!(decision.is_denied());
        assert_eq!(
            decision,
            Decision::Deny(DenyReason::MissingPermission("GET_TASKS".into()))
        );
    }

    #[tokio::test]
    async fn test_grant_visible_on_next_check() {
        let (gate, _, admin) = setup().await;
        let principal = principal_for(admin.id);
        let requirement = PermissionName::from("CREATE_TASK");

        assert!(gate.authorize(Some(&principal), &requirement, false).await.is_denied());

        gate.graph()
            .store()
            .create_permission(&Permission::new("CREATE_TASK", "CREATE_TASK"))
            .await
            .unwrap();
        gate.graph().grant(admin.id, &requirement).await.unwrap();

        assert!(gate.authorize(Some(&principal), &requirement, false).await.is_allowed());
    }

    /// Store whose every read fails.
    struct BrokenStore;

    #[async_trait]
    impl RbacStore for BrokenStore {
        async fn create_permission(&self, _: &Permission) -> crate::error::Result<()> {
            Err(TaskgateError::database("down"))
        }
        async fn ensure_permission(&self, _: &Permission) -> crate::error::Result<(Permission, GrantOutcome)> {
            Err(TaskgateError::database("down"))
        }
        async fn find_permission(&self, _: PermissionId) -> crate::error::Result<Option<Permission>> {
            Err(TaskgateError::database("down"))
        }
        async fn find_permission_by_name(&self, _: &PermissionName) -> crate::error::Result<Option<Permission>> {
            Err(TaskgateError::database("down"))
        }
        async fn list_permissions(
            &self,
            _: &PermissionFilter,
            _: SortSpec,
            _: Option<OffsetPagination>,
        ) -> crate::error::Result<(Vec<Permission>, u64)> {
            Err(TaskgateError::database("down"))
        }
        async fn update_permission_description(&self, _: PermissionId, _: &str) -> crate::error::Result<Option<Permission>> {
            Err(TaskgateError::database("down"))
        }
        async fn delete_permission(&self, _: PermissionId) -> crate::error::Result<bool> {
            Err(TaskgateError::database("down"))
        }
        async fn create_role(&self, _: &Role) -> crate::error::Result<()> {
            Err(TaskgateError::database("down"))
        }
        async fn ensure_role(&self, _: &Role) -> crate::error::Result<(Role, GrantOutcome)> {
            Err(TaskgateError::database("down"))
        }
        async fn find_role(&self, _: RoleId) -> crate::error::Result<Option<Role>> {
            Err(TaskgateError::database("down"))
        }
        async fn find_role_by_name(&self, _: &str) -> crate::error::Result<Option<Role>> {
            Err(TaskgateError::database("down"))
        }
        async fn find_superuser_role(&self) -> crate::error::Result<Option<Role>> {
            Err(TaskgateError::database("down"))
        }
        async fn list_roles(&self, _: &RoleFilter, _: SortSpec) -> crate::error::Result<Vec<Role>> {
            Err(TaskgateError::database("down"))
        }
        async fn update_role(&self, _: &Role) -> crate::error::Result<Option<Role>> {
            Err(TaskgateError::database("down"))
        }
        async fn delete_role(&self, _: RoleId) -> crate::error::Result<bool> {
            Err(TaskgateError::database("down"))
        }
        async fn grant(&self, _: RoleId, _: PermissionId) -> crate::error::Result<GrantOutcome> {
            Err(TaskgateError::database("down"))
        }
        async fn permissions_for_role(&self, _: RoleId) -> crate::error::Result<Vec<PermissionName>> {
            Err(TaskgateError::database("down"))
        }
        async fn role_permissions(&self, _: RoleId) -> crate::error::Result<Vec<RolePermission>> {
            Err(TaskgateError::database("down"))
        }
        async fn create_user(&self, _: &User) -> crate::error::Result<()> {
            Err(TaskgateError::database("down"))
        }
        async fn find_user(&self, _: UserId) -> crate::error::Result<Option<User>> {
            Err(TaskgateError::database("down"))
        }
        async fn list_users(&self, _: &UserFilter, _: SortSpec) -> crate::error::Result<Vec<User>> {
            Err(TaskgateError::database("down"))
        }
        async fn update_user(&self, _: &User) -> crate::error::Result<Option<User>> {
            Err(TaskgateError::database("down"))
        }
        async fn delete_user(&self, _: UserId) -> crate::error::Result<bool> {
            Err(TaskgateError::database("down"))
        }
        async fn insert_audit_entry(&self, _: &AuditEntry) -> crate::error::Result<()> {
            Err(TaskgateError::database("down"))
        }
        async fn find_audit_entry(&self, _: AuditLogId) -> crate::error::Result<Option<AuditEntry>> {
            Err(TaskgateError::database("down"))
        }
        async fn list_audit_entries(
            &self,
            _: &AuditLogFilter,
            _: SortSpec,
            _: OffsetPagination,
        ) -> crate::error::Result<(Vec<AuditEntry>, u64)> {
            Err(TaskgateError::database("down"))
        }
        async fn delete_audit_entry(&self, _: AuditLogId) -> crate::error::Result<bool> {
            Err(TaskgateError::database("down"))
        }
        fn backend_name(&self) -> &'static str {
            "broken"
        }
        async fn health_check(&self) -> crate::error::Result<()> {
            Err(TaskgateError::database("down"))
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_denies() {
        let gate = AuthorizationGate::new(RolePermissionGraph::new(Arc::new(BrokenStore)));
        let principal = principal_for(RoleId::new());

        for owner_only in [false, true] {
            let decision = gate
                .authorize(Some(&principal), &"GET_TASKS".into(), owner_only)
                .await;
            assert_eq!(decision, Decision::Deny(DenyReason::LookupFailed));
        }
    }
}
