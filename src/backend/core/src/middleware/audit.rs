//! Audit logging middleware.

use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, OriginalUri, Request},
    http::HeaderMap,
    response::Response,
};
use futures::future::BoxFuture;
use tower::{Layer, Service};

use crate::audit::{AuditEntry, AuditLogger};
use crate::rbac::middleware::AuthorizationRecord;
use crate::rbac::models::Principal;

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// The peer address, or the proxy-reported client when proxy headers are
/// trusted.
fn client_ip(req: &Request, trust_proxy_headers: bool) -> Option<String> {
    let peer = || {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    };
    if !trust_proxy_headers {
        return peer();
    }

    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| header_str(req.headers(), "x-real-ip"))
        .or_else(peer)
}

/// Layer that records every request passing through it.
#[derive(Clone)]
pub struct AuditLayer {
    logger: AuditLogger,
    trust_proxy_headers: bool,
}

impl AuditLayer {
    pub fn new(logger: AuditLogger) -> Self {
        Self {
            logger,
            trust_proxy_headers: false,
        }
    }

    /// Record `X-Forwarded-For` / `X-Real-IP` instead of the peer address.
    /// Only safe behind a proxy that overwrites them.
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }
}

impl<S> Layer<S> for AuditLayer {
    type Service = AuditService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuditService {
            inner,
            logger: self.logger.clone(),
            trust_proxy_headers: self.trust_proxy_headers,
        }
    }
}

#[derive(Clone)]
pub struct AuditService<S> {
    inner: S,
    logger: AuditLogger,
    trust_proxy_headers: bool,
}

impl<S> Service<Request> for AuditService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let mut inner = self.inner.clone();
        let logger = self.logger.clone();

        let method = req.method().to_string();
        let path = req
            .extensions()
            .get::<OriginalUri>()
            .map(|OriginalUri(uri)| uri.path().to_string())
            .unwrap_or_else(|| req.uri().path().to_string());
        let user_agent = header_str(req.headers(), "user-agent");
        let client_ip = client_ip(&req, self.trust_proxy_headers);
        let start = Instant::now();

        Box::pin(async move {
            let response = inner.call(req).await?;

            let mut entry = AuditEntry::new(method, path, response.status().as_u16());
            entry.duration_ms = start.elapsed().as_millis() as u64;
            entry.user_agent = user_agent;
            entry.client_ip = client_ip;

            if let Some(principal) = response.extensions().get::<Principal>() {
                entry.user_id = Some(principal.user_id);
                entry.role_id = Some(principal.role_id);
            }
            if let Some(record) = response.extensions().get::<AuthorizationRecord>() {
                entry.permission = record.permission.clone();
                entry.decision = Some(record.decision.to_string());
            }

            logger.record(entry);
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(forwarded: Option<&str>, peer: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/api/v1/roles");
        if let Some(forwarded) = forwarded {
            builder = builder.header("x-forwarded-for", forwarded);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            req.extensions_mut()
                .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        }
        req
    }

    #[test]
    fn test_client_ip_ignores_proxy_headers_by_default() {
        let req = request(Some("203.0.113.9"), Some("10.0.0.5:4000"));
        assert_eq!(client_ip(&req, false).as_deref(), Some("10.0.0.5"));

        let req = request(Some("203.0.113.9"), None);
        assert_eq!(client_ip(&req, false), None);
    }

    #[test]
    fn test_client_ip_trusted_proxy() {
        let req = request(Some("203.0.113.9, 10.0.0.1"), Some("10.0.0.5:4000"));
        assert_eq!(client_ip(&req, true).as_deref(), Some("203.0.113.9"));

        let req = request(None, Some("10.0.0.5:4000"));
        assert_eq!(client_ip(&req, true).as_deref(), Some("10.0.0.5"));
    }
}
