//! Role-based access control.
//!
//! - **Catalog**: the universe of permission identifiers and the roles to seed
//! - **Graph**: persisted role → permission grants
//! - **Deriver**: maps a route path and verb to the permission it requires
//! - **Gate**: allow/deny decisions, including owner-only routes
//! - **Seeder**: idempotent startup reconciliation of catalog and graph
//! - **Middleware**: tower layer enforcing a route's requirement
//!
//! # Usage
//!
//! ```rust,ignore
//! use taskgate_core::rbac::{AuthorizationGate, RequirePermissionLayer, RolePermissionGraph};
//!
//! let gate = AuthorizationGate::new(RolePermissionGraph::new(store));
//!
//! let app = Router::new()
//!     .route("/api/v1/tasks", get(list_tasks))
//!     .route_layer(RequirePermissionLayer::derived(gate));
//! ```

pub mod catalog;
pub mod deriver;
pub mod gate;
pub mod graph;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod seeder;

pub use catalog::{CatalogError, PermissionCatalog, RoleSpec};
pub use deriver::{derive, DeriveError, PermissionDeriver, ResourceNames, ResourceNaming};
pub use gate::AuthorizationGate;
pub use graph::RolePermissionGraph;
pub use identity::{AuthError, Claims, IdentityProvider, JwtIdentityProvider};
pub use middleware::{AuthorizationRecord, Guard, RequirePermissionLayer, RequirePermissionService};
pub use models::{
    Decision, DenyReason, Permission, PermissionId, PermissionName, PermissionRequirement,
    Principal, Role, RoleId, RolePermission, RoleWithPermissions, User, UserId, Verb,
};
pub use routes::{ResolvedRoutes, RouteAccess, RouteDecl, RouteTable, RouteTableError, API_PREFIX};
pub use seeder::{SeedReport, Seeder};
