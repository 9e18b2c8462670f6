//! HTTP middleware for the API surface.
pub mod audit;
pub mod auth;

pub use audit::AuditLayer;
pub use auth::{extract_token, AuthLayer, CurrentPrincipal};
