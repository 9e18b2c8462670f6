//! Per-route access declarations.
//!
//! Every API route declares how it is guarded. Derived permissions are
//! resolved through [`PermissionDeriver::try_derive`] and every required
//! permission is checked against the catalog once, at startup. A failure
//! aborts startup rather than surfacing as a malformed requirement later.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use super::catalog::PermissionCatalog;
use super::deriver::{DeriveError, PermissionDeriver};
use super::gate::AuthorizationGate;
use super::middleware::{Guard, RequirePermissionLayer};
use super::models::{PermissionName, PermissionRequirement, Verb};

/// Prefix under which every API route is mounted.
pub const API_PREFIX: &str = "/api/v1";

/// Declared access policy of one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAccess {
    Public,
    Authenticated,
    /// A permission, derived from the route when `explicit` is `None`.
    Permission { explicit: Option<PermissionName> },
    /// Superuser role only.
    OwnerOnly { permission: PermissionName },
}

/// One `(verb, path pattern, access)` declaration. Paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecl {
    pub verb: Verb,
    pub path: String,
    pub access: RouteAccess,
}

impl RouteDecl {
    pub fn new(verb: Verb, path: impl Into<String>, access: RouteAccess) -> Self {
        Self {
            verb,
            path: path.into(),
            access,
        }
    }

    pub fn derived(verb: Verb, path: impl Into<String>) -> Self {
        Self::new(verb, path, RouteAccess::Permission { explicit: None })
    }
}

#[derive(Debug, Error)]
pub enum RouteTableError {
    #[error("route {verb} {path}: {source}")]
    Derive {
        verb: Verb,
        path: String,
        #[source]
        source: DeriveError,
    },

    #[error("route {verb} {path} requires {permission}, which is not in the catalog")]
    UnknownPermission {
        verb: Verb,
        path: String,
        permission: PermissionName,
    },

    #[error("route {verb} {path} is declared more than once")]
    Duplicate { verb: Verb, path: String },

    #[error("route {verb} {path} is not declared")]
    Undeclared { verb: Verb, path: String },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Declaration Table
// ═══════════════════════════════════════════════════════════════════════════════

/// The declared routes, before resolution.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteDecl>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a declaration.
    pub fn route(mut self, decl: RouteDecl) -> Self {
        self.routes.push(decl);
        self
    }

    pub fn routes(&self) -> &[RouteDecl] {
        &self.routes
    }

    /// Declarations of the administration API.
    pub fn default_api() -> Self {
        let path = |p: &str| format!("{}{}", API_PREFIX, p);
        let mut table = Self::new();

        for collection in ["/roles", "/permissions"] {
            let item = format!("{}/:id", collection);
            table = table
                .route(RouteDecl::derived(Verb::Post, path(collection)))
                .route(RouteDecl::derived(Verb::Get, path(collection)))
                .route(RouteDecl::derived(Verb::Get, path(&item)))
                .route(RouteDecl::derived(Verb::Put, path(&item)))
                .route(RouteDecl::derived(Verb::Delete, path(&item)));
        }

        table
            .route(RouteDecl::derived(Verb::Get, path("/users")))
            .route(RouteDecl::new(Verb::Get, path("/users/getMe"), RouteAccess::Authenticated))
            .route(RouteDecl::new(
                Verb::Put,
                path("/users/editMe"),
                RouteAccess::Permission {
                    explicit: Some("EDIT_USER".into()),
                },
            ))
            .route(RouteDecl::new(
                Verb::Put,
                path("/users/role/:id"),
                RouteAccess::OwnerOnly {
                    permission: "EDIT_USER_ROLE".into(),
                },
            ))
            .route(RouteDecl::derived(Verb::Get, path("/users/:id")))
            .route(RouteDecl::derived(Verb::Delete, path("/users/:id")))
            .route(RouteDecl::derived(Verb::Get, path("/logs")))
            .route(RouteDecl::derived(Verb::Get, path("/logs/:id")))
            .route(RouteDecl::derived(Verb::Delete, path("/logs/:id")))
    }

    /// Resolve every declaration to a concrete guard.
    pub fn resolve(
        &self,
        deriver: &PermissionDeriver,
        catalog: &PermissionCatalog,
    ) -> Result<ResolvedRoutes, RouteTableError> {
        let mut resolved = HashMap::with_capacity(self.routes.len());
        let mut order = Vec::with_capacity(self.routes.len());

        for decl in &self.routes {
            let guard = match &decl.access {
                RouteAccess::Public => Guard::Public,
                RouteAccess::Authenticated => Guard::Authenticated,
                RouteAccess::Permission { explicit } => {
                    let permission = match explicit {
                        Some(name) => name.clone(),
                        None => deriver.try_derive(&decl.path, decl.verb).map_err(|source| {
                            RouteTableError::Derive {
                                verb: decl.verb,
                                path: decl.path.clone(),
                                source,
                            }
                        })?,
                    };
                    Guard::Permission {
                        requirement: PermissionRequirement::Explicit(
                            check_catalog(catalog, decl, permission)?,
                        ),
                        owner_only: false,
                    }
                }
                RouteAccess::OwnerOnly { permission } => Guard::Permission {
                    requirement: PermissionRequirement::Explicit(check_catalog(
                        catalog,
                        decl,
                        permission.clone(),
                    )?),
                    owner_only: true,
                },
            };

            let key = (decl.verb, decl.path.clone());
            if resolved.insert(key.clone(), guard).is_some() {
                return Err(RouteTableError::Duplicate {
                    verb: decl.verb,
                    path: decl.path.clone(),
                });
            }
            order.push(key);
        }

        Ok(ResolvedRoutes { resolved, order })
    }
}

fn check_catalog(
    catalog: &PermissionCatalog,
    decl: &RouteDecl,
    permission: PermissionName,
) -> Result<PermissionName, RouteTableError> {
    if catalog.contains(&permission) {
        Ok(permission)
    } else {
        Err(RouteTableError::UnknownPermission {
            verb: decl.verb,
            path: decl.path.clone(),
            permission,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resolved Table
// ═══════════════════════════════════════════════════════════════════════════════

/// Guards keyed by `(verb, absolute path pattern)`.
#[derive(Debug, Clone)]
pub struct ResolvedRoutes {
    resolved: HashMap<(Verb, String), Guard>,
    order: Vec<(Verb, String)>,
}

impl ResolvedRoutes {
    pub fn guard(&self, verb: Verb, path: &str) -> Option<&Guard> {
        self.resolved.get(&(verb, path.to_string()))
    }

    /// The permission layer for a mounted route. Mounting an undeclared
    /// route is an error.
    pub fn layer(
        &self,
        gate: &AuthorizationGate,
        verb: Verb,
        path: &str,
    ) -> Result<RequirePermissionLayer, RouteTableError> {
        self.guard(verb, path)
            .map(|guard| RequirePermissionLayer::new(gate.clone(), guard.clone()))
            .ok_or_else(|| RouteTableError::Undeclared {
                verb,
                path: path.to_string(),
            })
    }

    /// Number of declared routes.
    pub fn count(&self) -> usize {
        self.order.len()
    }

    /// Declarations in their declared order.
    pub fn iter(&self) -> impl Iterator<Item = (Verb, &str, &Guard)> + '_ {
        self.order.iter().filter_map(move |key| {
            self.resolved
                .get(key)
                .map(|guard| (key.0, key.1.as_str(), guard))
        })
    }
}

impl fmt::Display for ResolvedRoutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (verb, path, guard) in self.iter() {
            let (access, permission) = match guard {
                Guard::Public => ("public", String::from("-")),
                Guard::Authenticated => ("authenticated", String::from("-")),
                Guard::Permission {
                    requirement,
                    owner_only,
                } => {
                    let permission = match requirement {
                        PermissionRequirement::Explicit(name) => name.to_string(),
                        PermissionRequirement::Derived => String::from("(derived)"),
                    };
                    (if *owner_only { "owner-only" } else { "permission" }, permission)
                }
            };
            writeln!(f, "{:<7} {:<28} {:<14} {}", verb, path, access, permission)?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
