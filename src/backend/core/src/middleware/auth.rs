//! Authentication middleware.
//!
//! Resolves the request's credential into a [`Principal`]. The token is read
//! from `Authorization: Bearer <token>` or, failing that, from the configured
//! cookie. A request without any credential continues with no principal; the
//! permission gate decides what that means for the route. A credential that
//! fails verification is rejected with 401 here.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use metrics::counter;
use tower::{Layer, Service};
use tracing::debug;

use crate::error::TaskgateError;
use crate::rbac::identity::IdentityProvider;
use crate::rbac::models::{DenyReason, Principal};

// ═══════════════════════════════════════════════════════════════════════════════
// Token Extraction
// ═══════════════════════════════════════════════════════════════════════════════

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| {
            s.strip_prefix("Bearer ")
                .or_else(|| s.strip_prefix("bearer "))
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}

fn cookie_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract the raw token from the request headers.
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    bearer_token(headers).or_else(|| cookie_token(headers, cookie_name))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Authentication layer.
#[derive(Clone)]
pub struct AuthLayer {
    identity: Arc<dyn IdentityProvider>,
    cookie_name: Arc<str>,
}

impl AuthLayer {
    pub fn new(identity: Arc<dyn IdentityProvider>, cookie_name: impl Into<Arc<str>>) -> Self {
        Self {
            identity,
            cookie_name: cookie_name.into(),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            identity: self.identity.clone(),
            cookie_name: self.cookie_name.clone(),
        }
    }
}

/// Authentication service.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    identity: Arc<dyn IdentityProvider>,
    cookie_name: Arc<str>,
}

impl<S> Service<Request<Body>> for AuthService<S>
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

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let identity = self.identity.clone();
        let cookie_name = self.cookie_name.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(token) = extract_token(request.headers(), &cookie_name) else {
                return inner.call(request).await;
            };

            let principal = match identity.verify(&token) {
                Ok(principal) => principal,
                Err(e) => {
                    debug!(error = %e, "Rejecting request with invalid credential");
                    counter!("taskgate_auth_failures_total", "reason" => "invalid_token")
                        .increment(1);
                    return Ok(TaskgateError::from(e).into_response());
                }
            };

            request.extensions_mut().insert(principal.clone());
            let mut response = inner.call(request).await?;
            response.extensions_mut().insert(principal);
            Ok(response)
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Extractor
// ═══════════════════════════════════════════════════════════════════════════════

/// The authenticated principal, for handlers behind [`AuthLayer`].
pub struct CurrentPrincipal(pub Principal);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = TaskgateError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(CurrentPrincipal)
            .ok_or_else(|| DenyReason::Unauthenticated.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};
    use axum::{routing::get, Router};
    use tower::ServiceExt;

    use crate::rbac::identity::AuthError;
    use crate::rbac::models::{RoleId, UserId};

    struct FixedIdentity;

    impl IdentityProvider for FixedIdentity {
        fn verify(&self, raw_token: &str) -> Result<Principal, AuthError> {
            if raw_token != "good" {
                return Err(AuthError::InvalidToken);
            }
            let now = chrono::Utc::now();
            Ok(Principal {
                user_id: UserId::new(),
                username: "alice".to_string(),
                role_id: RoleId::new(),
                issued_at: now,
                expires_at: now + chrono::Duration::hours(1),
            })
        }
    }

    fn app() -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|principal: Option<CurrentPrincipal>| async move {
                    principal.map(|CurrentPrincipal(p)| p.username).unwrap_or_default()
                }),
            )
            .layer(AuthLayer::new(Arc::new(FixedIdentity), "token"))
    }

    #[test]
    fn test_extract_bearer_before_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::COOKIE, HeaderValue::from_static("token=xyz"));
        assert_eq!(extract_token(&headers, "token").as_deref(), Some("abc"));
    }

    #[test]
    fn test_extract_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; token=xyz"));
        assert_eq!(extract_token(&headers, "token").as_deref(), Some("xyz"));
        assert_eq!(extract_token(&headers, "session"), None);
    }

    #[test]
    fn test_extract_ignores_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_token(&headers, "token"), None);
    }

    #[tokio::test]
    async fn test_missing_token_passes_through() {
        let response = app()
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.extensions().get::<Principal>().is_none());
    }

    #[tokio::test]
    async fn test_invalid_token_is_401() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header(header::AUTHORIZATION, "Bearer bad")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_token_attaches_principal() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header(header::AUTHORIZATION, "Bearer good")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.extensions().get::<Principal>().map(|p| p.username.as_str()),
            Some("alice")
        );
    }
}
