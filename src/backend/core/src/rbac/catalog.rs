//! The permission catalog: every permission identifier the service knows and
//! the declarative role specifications the Seeder reconciles at startup.
//!
//! The catalog is a plain value. The server takes it from configuration
//! (`rbac.catalog`) and falls back to [`PermissionCatalog::builtin`]:
//!
//! | Role  | Superuser | Permissions                                   |
//! |-------|-----------|-----------------------------------------------|
//! | OWNER | yes       | every permission in the catalog               |
//! | USER  | no        | task and project permissions plus `EDIT_USER` |

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::PermissionName;

/// Resources that carry the full `GET_X / GET_XS / CREATE_X / EDIT_X / DELETE_X` set.
const CRUD_RESOURCES: [(&str, &str); 4] = [
    ("TASK", "TASKS"),
    ("PROJECT", "PROJECTS"),
    ("ROLE", "ROLES"),
    ("PERMISSION", "PERMISSIONS"),
];

const USER_PERMISSIONS: [&str; 5] = [
    "GET_USERS",
    "GET_USER",
    "EDIT_USER",
    "EDIT_USER_ROLE",
    "DELETE_USER",
];

const LOG_PERMISSIONS: [&str; 3] = ["GET_LOGS", "GET_LOG", "DELETE_LOG"];

fn crud(singular: &str, plural: &str) -> [PermissionName; 5] {
    [
        PermissionName::new(format!("GET_{}", plural)),
        PermissionName::new(format!("GET_{}", singular)),
        PermissionName::new(format!("CREATE_{}", singular)),
        PermissionName::new(format!("EDIT_{}", singular)),
        PermissionName::new(format!("DELETE_{}", singular)),
    ]
}

// ═══════════════════════════════════════════════════════════════════════════════
// Catalog Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Declarative role specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Tags the role as the single superuser role.
    #[serde(default)]
    pub superuser: bool,
    #[serde(default)]
    pub permissions: Vec<PermissionName>,
}

impl RoleSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            superuser: false,
            permissions: Vec::new(),
        }
    }

    /// Builder: mark as superuser.
    pub fn superuser(mut self) -> Self {
        self.superuser = true;
        self
    }

    /// Builder: grant permissions.
    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PermissionName>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }
}

/// The universe of permissions plus the roles to seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCatalog {
    pub permissions: Vec<PermissionName>,
    #[serde(default)]
    pub roles: Vec<RoleSpec>,
}

/// Problems detected while validating a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("permission identifier '{0}' must be upper-case words joined by underscores")]
    MalformedPermission(PermissionName),

    #[error("permission '{0}' is listed more than once")]
    DuplicatePermission(PermissionName),

    #[error("role '{0}' is declared more than once")]
    DuplicateRole(String),

    #[error("role '{role}' references permission '{permission}' which is not in the catalog")]
    UnknownPermission { role: String, permission: PermissionName },

    #[error("at most one role may be flagged superuser, found: {0:?}")]
    MultipleSuperusers(Vec<String>),
}

impl PermissionCatalog {
    pub fn new(permissions: Vec<PermissionName>, roles: Vec<RoleSpec>) -> Self {
        Self { permissions, roles }
    }

    /// The catalog the service ships with.
    pub fn builtin() -> Self {
        let mut permissions: Vec<PermissionName> = CRUD_RESOURCES
            .iter()
            .flat_map(|(singular, plural)| crud(singular, plural))
            .collect();
        permissions.extend(USER_PERMISSIONS.iter().copied().map(PermissionName::from));
        permissions.extend(LOG_PERMISSIONS.iter().copied().map(PermissionName::from));

        let owner = RoleSpec::new("OWNER", "Owner Role")
            .superuser()
            .with_permissions(permissions.clone());

        let user = RoleSpec::new("USER", "User Role")
            .with_permissions(crud("TASK", "TASKS"))
            .with_permissions(crud("PROJECT", "PROJECTS"))
            .with_permissions(["EDIT_USER"]);

        Self::new(permissions, vec![owner, user])
    }

    pub fn contains(&self, permission: &PermissionName) -> bool {
        self.permissions.contains(permission)
    }

    pub fn role(&self, name: &str) -> Option<&RoleSpec> {
        self.roles.iter().find(|r| r.name == name)
    }

    /// The role spec flagged superuser, if any.
    pub fn superuser_role(&self) -> Option<&RoleSpec> {
        self.roles.iter().find(|r| r.superuser)
    }

    /// Check every structural rule and report the first violation.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut seen = HashSet::new();
        for permission in &self.permissions {
            if !permission.is_well_formed() {
                return Err(CatalogError::MalformedPermission(permission.clone()));
            }
            if !seen.insert(permission) {
                return Err(CatalogError::DuplicatePermission(permission.clone()));
            }
        }

        let mut role_names = HashSet::new();
        for role in &self.roles {
            if !role_names.insert(role.name.as_str()) {
                return Err(CatalogError::DuplicateRole(role.name.clone()));
            }
            if let Some(missing) = role.permissions.iter().find(|p| !seen.contains(p)) {
                return Err(CatalogError::UnknownPermission {
                    role: role.name.clone(),
                    permission: missing.clone(),
                });
            }
        }

        let superusers: Vec<String> = self
            .roles
            .iter()
            .filter(|r| r.superuser)
            .map(|r| r.name.clone())
            .collect();
        if superusers.len() > 1 {
            return Err(CatalogError::MultipleSuperusers(superusers));
        }

        Ok(())
    }
}

impl Default for PermissionCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = PermissionCatalog::builtin();
        assert!(catalog.validate().is_ok());
        assert_eq!(catalog.permissions.len(), 4 * 5 + 5 + 3);
    }

    #[test]
    fn test_builtin_owner_holds_everything() {
        let catalog = PermissionCatalog::builtin();
        let owner = catalog.superuser_role().unwrap();
        assert_eq!(owner.name, "OWNER");
        assert_eq!(owner.permissions.len(), catalog.permissions.len());
    }

    #[test]
    fn test_builtin_user_role() {
        let catalog = PermissionCatalog::builtin();
        let user = catalog.role("USER").unwrap();
        assert!(!user.superuser);
        assert!(user.permissions.contains(&"GET_TASKS".into()));
        assert!(user.permissions.contains(&"DELETE_PROJECT".into()));
        assert!(user.permissions.contains(&"EDIT_USER".into()));
        assert!(!user.permissions.contains(&"EDIT_USER_ROLE".into()));
        assert!(!user.permissions.contains(&"GET_ROLES".into()));
        assert_eq!(user.permissions.len(), 11);
    }

    #[test]
    fn test_validate_rejects_unknown_permission() {
        let catalog = PermissionCatalog::new(
            vec!["GET_TASKS".into()],
            vec![RoleSpec::new("USER", "").with_permissions(["GET_PROJECTS"])],
        );
        assert!(matches!(
            catalog.validate(),
            Err(CatalogError::UnknownPermission { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_malformed_permission() {
        let catalog = PermissionCatalog::new(vec!["get-tasks".into()], vec![]);
        assert_eq!(
            catalog.validate(),
            Err(CatalogError::MalformedPermission("get-tasks".into()))
        );
    }

    #[test]
    fn test_validate_rejects_two_superusers() {
        let catalog = PermissionCatalog::new(
            vec!["GET_TASKS".into()],
            vec![
                RoleSpec::new("OWNER", "").superuser(),
                RoleSpec::new("ROOT", "").superuser(),
            ],
        );
        assert!(matches!(
            catalog.validate(),
            Err(CatalogError::MultipleSuperusers(names)) if names.len() == 2
        ));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let catalog = PermissionCatalog::new(vec!["GET_TASKS".into(), "GET_TASKS".into()], vec![]);
        assert!(matches!(
            catalog.validate(),
            Err(CatalogError::DuplicatePermission(_))
        ));

        let catalog = PermissionCatalog::new(
            vec![],
            vec![RoleSpec::new("USER", ""), RoleSpec::new("USER", "")],
        );
        assert!(matches!(catalog.validate(), Err(CatalogError::DuplicateRole(_))));
    }

    #[test]
    fn test_catalog_deserializes_with_defaults() {
        let json = r#"{
            "permissions": ["GET_TASKS"],
            "roles": [{ "name": "VIEWER", "permissions": ["GET_TASKS"] }]
        }"#;
        let catalog: PermissionCatalog = serde_json::from_str(json).unwrap();
        let viewer = catalog.role("VIEWER").unwrap();
        assert!(!viewer.superuser);
        assert_eq!(viewer.description, "");
        assert!(catalog.validate().is_ok());
    }
}
