//! Startup reconciliation of the catalog and the role-permission graph.
//!
//! Seeding only ever adds: missing permissions, missing roles and missing
//! grants are created, everything already present is reused. Running it on
//! every boot is safe. A failed run is not rolled back.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use metrics::counter;
use tracing::{error, info, warn};

use super::catalog::{PermissionCatalog, RoleSpec};
use super::models::{GrantOutcome, Permission, PermissionId, PermissionName, Role};
use crate::error::Result;
use crate::store::RbacStore;

/// What one seeding run created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
    pub grants_created: usize,
}

impl SeedReport {
    /// True when the run found everything already in place.
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Seeder {
    store: Arc<dyn RbacStore>,
    catalog: PermissionCatalog,
}

impl Seeder {
    pub fn new(store: Arc<dyn RbacStore>, catalog: PermissionCatalog) -> Self {
        Self { store, catalog }
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    pub async fn seed(&self) -> Result<SeedReport> {
        match self.run().await {
            Ok(report) => {
                counter!("taskgate_seed_runs_total", "outcome" => "success").increment(1);
                info!(
                    permissions_created = report.permissions_created,
                    roles_created = report.roles_created,
                    grants_created = report.grants_created,
                    "Seeding complete"
                );
                Ok(report)
            }
            Err(e) => {
                counter!("taskgate_seed_runs_total", "outcome" => "failure").increment(1);
                error!(error = %e, "Seeding failed");
                Err(e)
            }
        }
    }

    async fn run(&self) -> Result<SeedReport> {
        let mut report = SeedReport::default();

        let ensured = try_join_all(self.catalog.permissions.iter().map(|name| {
            let permission = Permission::new(name.clone(), name.as_str());
            async move { self.store.ensure_permission(&permission).await }
        }))
        .await?;

        let mut ids: HashMap<PermissionName, PermissionId> = HashMap::with_capacity(ensured.len());
        for (permission, outcome) in ensured {
            if outcome == GrantOutcome::Created {
                report.permissions_created += 1;
            }
            ids.insert(permission.name, permission.id);
        }

        for spec in &self.catalog.roles {
            let role = self.ensure_role(spec, &mut report).await?;

            let wanted: Vec<PermissionId> = spec
                .permissions
                .iter()
                .filter_map(|name| match ids.get(name) {
                    Some(id) => Some(*id),
                    None => {
                        warn!(role = %spec.name, permission = %name, "Role references a permission outside the catalog, skipping");
                        None
                    }
                })
                .collect();

            let outcomes = try_join_all(wanted.into_iter().map(|permission_id| {
                let role_id = role.id;
                async move { self.store.grant(role_id, permission_id).await }
            }))
            .await?;

            report.grants_created += outcomes
                .into_iter()
                .filter(|o| *o == GrantOutcome::Created)
                .count();
        }

        Ok(report)
    }

    /// Roles are inserted untagged; the superuser tag is moved afterwards so
    /// a differently named holder never blocks the insert.
    async fn ensure_role(&self, spec: &RoleSpec, report: &mut SeedReport) -> Result<Role> {
        let candidate = Role::new(spec.name.clone(), spec.description.clone());

        let (role, outcome) = self.store.ensure_role(&candidate).await?;
        if outcome == GrantOutcome::Created {
            report.roles_created += 1;
        }

        if !spec.superuser || role.is_superuser {
            return Ok(role);
        }

        if let Some(mut previous) = self.store.find_superuser_role().await? {
            warn!(from = %previous.name, to = %role.name, "Moving the superuser flag");
            previous.is_superuser = false;
            self.store.update_role(&previous).await?;
        }

        let mut promoted = role;
        promoted.is_superuser = true;
        Ok(self.store.update_role(&promoted).await?.unwrap_or(promoted))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::SortSpec;
    use crate::store::{InMemoryStore, PermissionFilter, RoleFilter};

    async fn snapshot(store: &InMemoryStore) -> (Vec<String>, Vec<(String, bool, Vec<PermissionName>)>) {
        let (permissions, _) = store
            .list_permissions(&PermissionFilter::default(), SortSpec::default(), None)
            .await
            .unwrap();
        let mut permission_names: Vec<String> =
            permissions.into_iter().map(|p| p.name.to_string()).collect();
        permission_names.sort();

        let mut roles = Vec::new();
        for role in store.list_roles(&RoleFilter::default(), SortSpec::default()).await.unwrap() {
            let granted = store.permissions_for_role(role.id).await.unwrap();
            roles.push((role.name, role.is_superuser, granted));
        }
        roles.sort();
        (permission_names, roles)
    }

    #[tokio::test]
    async fn test_seed_builtin() {
        let store = Arc::new(InMemoryStore::new());
        let catalog = PermissionCatalog::builtin();
        let report = Seeder::new(store.clone(), catalog.clone()).seed().await.unwrap();

        assert_eq!(report.permissions_created, catalog.permissions.len());
        assert_eq!(report.roles_created, 2);
        assert_eq!(report.grants_created, catalog.permissions.len() + 11);

        let owner = store.find_superuser_role().await.unwrap().unwrap();
        assert_eq!(owner.name, "OWNER");
    }

    #[tokio::test]
    async fn test_seed_twice_is_identical() {
        let store = Arc::new(InMemoryStore::new());
        let seeder = Seeder::new(store.clone(), PermissionCatalog::builtin());

        seeder.seed().await.unwrap();
        let first = snapshot(&store).await;

        let report = seeder.seed().await.unwrap();
        assert!(report.is_noop());
        assert_eq!(snapshot(&store).await, first);
    }

    #[tokio::test]
    async fn test_seed_reuses_existing_role() {
        let store = Arc::new(InMemoryStore::new());
        let existing = Role::new("USER", "Pre-existing");
        store.create_role(&existing).await.unwrap();

        Seeder::new(store.clone(), PermissionCatalog::builtin()).seed().await.unwrap();

        let user = store.find_role_by_name("USER").await.unwrap().unwrap();
        assert_eq!(user.id, existing.id);
        assert!(store
            .permissions_for_role(user.id)
            .await
            .unwrap()
            .contains(&PermissionName::from("EDIT_USER")));
    }

    #[tokio::test]
    async fn test_seed_promotes_existing_owner() {
        let store = Arc::new(InMemoryStore::new());
        let existing = Role::new("OWNER", "Created before the flag existed");
        store.create_role(&existing).await.unwrap();

        Seeder::new(store.clone(), PermissionCatalog::builtin()).seed().await.unwrap();

        let owner = store.find_superuser_role().await.unwrap().unwrap();
        assert_eq!(owner.id, existing.id);
    }

    #[tokio::test]
    async fn test_seed_moves_flag_from_other_holder() {
        let store = Arc::new(InMemoryStore::new());
        let root = Role::new("ROOT", "Renamed owner").superuser();
        store.create_role(&root).await.unwrap();

        let seeder = Seeder::new(store.clone(), PermissionCatalog::builtin());
        let report = seeder.seed().await.unwrap();
        assert_eq!(report.roles_created, 2);
        assert_eq!(report.grants_created, PermissionCatalog::builtin().permissions.len() + 11);

        let owner = store.find_superuser_role().await.unwrap().unwrap();
        assert_eq!(owner.name, "OWNER");
        assert!(!store.find_role(root.id).await.unwrap().unwrap().is_superuser);

        assert!(seeder.seed().await.unwrap().is_noop());
    }

    #[tokio::test]
    async fn test_alternate_catalog() {
        let store = Arc::new(InMemoryStore::new());
        let catalog = PermissionCatalog::new(
            vec!["GET_TASKS".into(), "GET_TASK".into()],
            vec![RoleSpec::new("READER", "Reader").with_permissions(["GET_TASKS"])],
        );

        let report = Seeder::new(store.clone(), catalog).seed().await.unwrap();
        assert_eq!(report.permissions_created, 2);
        assert_eq!(report.grants_created, 1);
        assert!(store.find_superuser_role().await.unwrap().is_none());
    }
}
