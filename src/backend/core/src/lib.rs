#![allow(clippy::result_large_err)]
//! # Taskgate Core
//!
//! Role and permission administration service with route-level access control.
//!
//! ## Architecture
//!
//! - **RBAC**: permission catalog, role-permission graph, permission
//!   derivation, the authorization gate and the startup seeder
//! - **Store**: persistence seam with in-memory and Postgres backends
//! - **Middleware**: authentication and audit layers
//! - **Audit**: asynchronous request audit log
//! - **API**: administration routes under `/api/v1`
//! - **Observability**: structured logging and Prometheus metrics

pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod pagination;
pub mod rbac;
pub mod store;

pub use error::{ErrorCode, ErrorSeverity, Result, TaskgateError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{ErrorCode, ErrorSeverity, Result, TaskgateError};
    pub use crate::rbac::{
        AuthorizationGate, Decision, DenyReason, PermissionCatalog, PermissionName,
        PermissionRequirement, Principal, RequirePermissionLayer, RolePermissionGraph, Seeder,
        Verb,
    };
    pub use crate::store::{InMemoryStore, PostgresStore, RbacStore};
}
