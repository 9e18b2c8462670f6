//! Axum authorization middleware that enforces permission requirements on
//! requests.
//!
//! The layer reads the [`Principal`] injected by
//! [`AuthLayer`](crate::middleware::AuthLayer), resolves the route's
//! requirement and asks the [`AuthorizationGate`] for a decision. Denials
//! short-circuit with the failure envelope: 401 without a principal, 403
//! otherwise. Either way an [`AuthorizationRecord`] is attached to the
//! response for the audit log.

use axum::{
    body::Body,
    extract::{OriginalUri, Request},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::debug;

use super::gate::AuthorizationGate;
use super::models::{Decision, DenyReason, PermissionName, PermissionRequirement, Principal, Verb};
use crate::error::TaskgateError;

// ═══════════════════════════════════════════════════════════════════════════════
// Decision Record
// ═══════════════════════════════════════════════════════════════════════════════

/// What the permission layer decided, attached to the response extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRecord {
    /// The requirement checked, if the route had one.
    pub permission: Option<PermissionName>,
    pub decision: &'static str,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Guards
// ═══════════════════════════════════════════════════════════════════════════════

/// What a route demands of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// Anyone.
    Public,
    /// Any verified principal.
    Authenticated,
    /// A permission held by the principal's role, or the superuser role when
    /// `owner_only` is set.
    Permission {
        requirement: PermissionRequirement,
        owner_only: bool,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer that wraps services with permission enforcement.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/users/editMe", put(edit_me))
///     .route_layer(RequirePermissionLayer::explicit(gate.clone(), "EDIT_USER"));
/// ```
#[derive(Clone)]
pub struct RequirePermissionLayer {
    gate: AuthorizationGate,
    guard: Guard,
}

impl RequirePermissionLayer {
    pub fn new(gate: AuthorizationGate, guard: Guard) -> Self {
        Self { gate, guard }
    }

    /// Require a fixed permission.
    pub fn explicit(gate: AuthorizationGate, permission: impl Into<PermissionName>) -> Self {
        Self::new(
            gate,
            Guard::Permission {
                requirement: PermissionRequirement::Explicit(permission.into()),
                owner_only: false,
            },
        )
    }

    /// Require the permission derived from each request's path and verb.
    pub fn derived(gate: AuthorizationGate) -> Self {
        Self::new(
            gate,
            Guard::Permission {
                requirement: PermissionRequirement::Derived,
                owner_only: false,
            },
        )
    }

    /// Restrict to the superuser role.
    pub fn owner_only(gate: AuthorizationGate, permission: impl Into<PermissionName>) -> Self {
        Self::new(
            gate,
            Guard::Permission {
                requirement: PermissionRequirement::Explicit(permission.into()),
                owner_only: true,
            },
        )
    }

    /// Require any verified principal.
    pub fn authenticated(gate: AuthorizationGate) -> Self {
        Self::new(gate, Guard::Authenticated)
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }
}

impl<S> Layer<S> for RequirePermissionLayer {
    type Service = RequirePermissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequirePermissionService {
            inner,
            gate: self.gate.clone(),
            guard: self.guard.clone(),
        }
    }
}

/// The concrete permission for one request. Only derived requirements look
/// at the verb and path.
fn resolve_requirement(
    requirement: &PermissionRequirement,
    request: &Request<Body>,
) -> Result<PermissionName, TaskgateError> {
    match requirement {
        PermissionRequirement::Explicit(name) => Ok(name.clone()),
        PermissionRequirement::Derived => {
            let verb = Verb::try_from(request.method())?;
            let path = request
                .extensions()
                .get::<OriginalUri>()
                .map(|OriginalUri(uri)| uri.path().to_string())
                .unwrap_or_else(|| request.uri().path().to_string());
            Ok(requirement.resolve(&path, verb))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Service that enforces a route's guard per request.
#[derive(Clone)]
pub struct RequirePermissionService<S> {
    inner: S,
    gate: AuthorizationGate,
    guard: Guard,
}

impl<S> Service<Request<Body>> for RequirePermissionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let gate = self.gate.clone();
        let guard = self.guard.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let principal = request.extensions().get::<Principal>().cloned();

            let (permission, decision) = match guard {
                Guard::Public => return inner.call(request).await,
                Guard::Authenticated => {
                    let decision = match principal {
                        Some(_) => Decision::Allow,
                        None => Decision::Deny(DenyReason::Unauthenticated),
                    };
                    (None, decision)
                }
                Guard::Permission {
                    requirement,
                    owner_only,
                } => match resolve_requirement(&requirement, &request) {
                    Ok(permission) => {
                        let decision = gate
                            .authorize(principal.as_ref(), &permission, owner_only)
                            .await;
                        (Some(permission), decision)
                    }
                    // A missing principal is always reported as such.
                    Err(_) if principal.is_none() => {
                        (None, Decision::Deny(DenyReason::Unauthenticated))
                    }
                    Err(e) => return Ok(e.into_response()),
                },
            };

            let record = AuthorizationRecord {
                permission,
                decision: decision.label(),
            };

            let mut response = match decision {
                Decision::Allow => inner.call(request).await?,
                Decision::Deny(reason) => {
                    debug!(
                        permission = ?record.permission,
                        reason = reason.label(),
                        "Request denied"
                    );
                    TaskgateError::from(reason).into_response()
                }
            };
            response.extensions_mut().insert(record);
            Ok(response)
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
