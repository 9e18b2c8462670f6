//! Mapping from a request's route path and verb to the permission it requires.
//!
//! Two flavours exist:
//!
//! - [`derive`] is the best-effort string transform: the resource is the
//!   third path segment, singularized by dropping its last character unless
//!   the request is a collection-level GET. It never fails; missing segments
//!   produce `ACTION_undefined`.
//! - [`PermissionDeriver::try_derive`] looks the resource up in a
//!   [`ResourceNaming`] table and rejects short paths and unknown resources.
//!   Route declarations resolve through it at startup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::{PermissionName, Verb};

/// Index of the resource segment in `/api/v1/<resource>/...`.
const RESOURCE_SEGMENT: usize = 2;

/// Segment count of a collection-root path such as `/api/v1/tasks`.
const COLLECTION_DEPTH: usize = 3;

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Derive the required permission from a path and verb.
///
/// `POST /api/v1/tasks` gives `CREATE_TASK`, `GET /api/v1/tasks` gives
/// `GET_TASKS` and `GET /api/v1/tasks/123` gives `GET_TASK`.
pub fn derive(path: &str, verb: Verb) -> PermissionName {
    let segments = segments(path);

    let resource = match segments.get(RESOURCE_SEGMENT) {
        Some(segment) if segments.len() == COLLECTION_DEPTH && verb == Verb::Get => {
            segment.to_uppercase()
        }
        Some(segment) => {
            let mut chars = segment.chars();
            chars.next_back();
            chars.as_str().to_uppercase()
        }
        None => "undefined".to_string(),
    };

    PermissionName::new(format!("{}_{}", verb.action(), resource))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Naming Table
// ═══════════════════════════════════════════════════════════════════════════════

/// Singular and plural permission suffixes for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNames {
    pub singular: String,
    pub plural: String,
}

impl ResourceNames {
    pub fn new(singular: impl Into<String>, plural: impl Into<String>) -> Self {
        Self {
            singular: singular.into(),
            plural: plural.into(),
        }
    }
}

/// Collection path segment → permission suffixes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceNaming {
    resources: HashMap<String, ResourceNames>,
}

impl ResourceNaming {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: register a resource.
    pub fn with(
        mut self,
        segment: impl Into<String>,
        singular: impl Into<String>,
        plural: impl Into<String>,
    ) -> Self {
        self.insert(segment, ResourceNames::new(singular, plural));
        self
    }

    pub fn insert(&mut self, segment: impl Into<String>, names: ResourceNames) {
        self.resources.insert(segment.into(), names);
    }

    pub fn get(&self, segment: &str) -> Option<&ResourceNames> {
        self.resources.get(segment)
    }
}

impl ResourceNaming {
    /// Naming for every collection the service exposes.
    pub fn defaults() -> Self {
        Self::new()
            .with("tasks", "TASK", "TASKS")
            .with("projects", "PROJECT", "PROJECTS")
            .with("users", "USER", "USERS")
            .with("roles", "ROLE", "ROLES")
            .with("permissions", "PERMISSION", "PERMISSIONS")
            .with("logs", "LOG", "LOGS")
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Strict Deriver
// ═══════════════════════════════════════════════════════════════════════════════

/// Reasons a path cannot be mapped to a permission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeriveError {
    #[error("path '{path}' has {found} segment(s); at least 3 are required")]
    PathTooShort { path: String, found: usize },

    #[error("no naming entry for resource '{resource}' in path '{path}'")]
    UnknownResource { path: String, resource: String },
}

/// Table-driven permission derivation.
#[derive(Debug, Clone)]
pub struct PermissionDeriver {
    naming: ResourceNaming,
}

impl Default for PermissionDeriver {
    fn default() -> Self {
        Self::new(ResourceNaming::defaults())
    }
}

impl PermissionDeriver {
    pub fn new(naming: ResourceNaming) -> Self {
        Self { naming }
    }

    /// Derive the permission for `path` and `verb`, failing instead of guessing.
    pub fn try_derive(&self, path: &str, verb: Verb) -> Result<PermissionName, DeriveError> {
        let segments = segments(path);

        if segments.len() < COLLECTION_DEPTH {
            return Err(DeriveError::PathTooShort {
                path: path.to_string(),
                found: segments.len(),
            });
        }

        let resource = segments[RESOURCE_SEGMENT];
        let names = self
            .naming
            .get(resource)
            .ok_or_else(|| DeriveError::UnknownResource {
                path: path.to_string(),
                resource: resource.to_string(),
            })?;

        let suffix = if segments.len() == COLLECTION_DEPTH && verb == Verb::Get {
            &names.plural
        } else {
            &names.singular
        };

        Ok(PermissionName::new(format!("{}_{}", verb.action(), suffix)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_collection_and_item() {
        assert_eq!(derive("/api/v1/tasks", Verb::Post), "CREATE_TASK");
        assert_eq!(derive("/api/v1/tasks", Verb::Get), "GET_TASKS");
        assert_eq!(derive("/api/v1/tasks/123", Verb::Get), "GET_TASK");
        assert_eq!(derive("/api/v1/tasks/123", Verb::Delete), "DELETE_TASK");
        assert_eq!(derive("/api/v1/tasks/123", Verb::Put), "EDIT_TASK");
        assert_eq!(derive("/api/v1/tasks/123", Verb::Patch), "EDIT_TASK");
    }

    #[test]
    fn test_derive_ignores_empty_segments() {
        assert_eq!(derive("//api//v1/projects/", Verb::Get), "GET_PROJECTS");
        assert_eq!(derive("/api/v1/projects/7/", Verb::Get), "GET_PROJECT");
    }

    #[test]
    fn test_derive_short_path_degrades() {
        assert_eq!(derive("/tasks", Verb::Post), "CREATE_undefined");
        assert_eq!(derive("", Verb::Get), "GET_undefined");
    }

    #[test]
    fn test_derive_naive_singularization() {
        // Irregular plurals lose their last character regardless.
        assert_eq!(derive("/api/v1/people/1", Verb::Get), "GET_PEOPL");
    }

    #[test]
    fn test_try_derive_matches_naive_for_regular_resources() {
        let deriver = PermissionDeriver::default();
        for (path, verb) in [
            ("/api/v1/tasks", Verb::Post),
            ("/api/v1/tasks", Verb::Get),
            ("/api/v1/tasks/1", Verb::Get),
            ("/api/v1/roles/1", Verb::Put),
            ("/api/v1/logs/1", Verb::Delete),
        ] {
            assert_eq!(deriver.try_derive(path, verb).unwrap(), derive(path, verb));
        }
    }

    #[test]
    fn test_try_derive_rejects_short_path() {
        let deriver = PermissionDeriver::default();
        let err = deriver.try_derive("/api/v1", Verb::Get).unwrap_err();
        assert_eq!(
            err,
            DeriveError::PathTooShort {
                path: "/api/v1".to_string(),
                found: 2
            }
        );
    }

    #[test]
    fn test_try_derive_rejects_unknown_resource() {
        let deriver = PermissionDeriver::default();
        let err = deriver.try_derive("/api/v1/people/1", Verb::Get).unwrap_err();
        assert!(matches!(err, DeriveError::UnknownResource { ref resource, .. } if resource == "people"));
    }

    #[test]
    fn test_try_derive_irregular_plural_from_table() {
        let deriver = PermissionDeriver::new(ResourceNaming::new().with("people", "PERSON", "PEOPLE"));
        assert_eq!(deriver.try_derive("/api/v1/people", Verb::Get).unwrap(), "GET_PEOPLE");
        assert_eq!(deriver.try_derive("/api/v1/people/4", Verb::Get).unwrap(), "GET_PERSON");
        assert_eq!(deriver.try_derive("/api/v1/people", Verb::Post).unwrap(), "CREATE_PERSON");
    }
}
