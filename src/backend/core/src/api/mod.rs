//! REST API.
//!
//! Administration routes live under `/api/v1` behind, from the outside in:
//! the audit layer, the authentication layer and a per-route permission
//! layer resolved from the [`RouteTable`]. `/health` and `/metrics` are
//! public and unversioned.

mod logs;
mod permissions;
mod roles;
mod users;

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, FromRequest, FromRequestParts, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, MethodRouter},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::audit::AuditLogger;
use crate::config::Config;
use crate::error::{Result, TaskgateError};
use crate::middleware::{AuditLayer, AuthLayer};
use crate::pagination::PageInfo;
use crate::rbac::identity::IdentityProvider;
use crate::rbac::models::Verb;
use crate::rbac::routes::{ResolvedRoutes, API_PREFIX};
use crate::rbac::{AuthorizationGate, RolePermissionGraph};
use crate::store::RbacStore;

// ═══════════════════════════════════════════════════════════════════════════════
// State
// ═══════════════════════════════════════════════════════════════════════════════

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RbacStore>,
    pub graph: RolePermissionGraph,
    pub gate: AuthorizationGate,
    pub identity: Arc<dyn IdentityProvider>,
    pub audit: AuditLogger,
    pub routes: Arc<ResolvedRoutes>,
    pub config: Arc<Config>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RbacStore>,
        identity: Arc<dyn IdentityProvider>,
        audit: AuditLogger,
        routes: ResolvedRoutes,
        config: Config,
    ) -> Self {
        let graph = RolePermissionGraph::new(store.clone());
        Self {
            gate: AuthorizationGate::new(graph.clone()),
            graph,
            store,
            identity,
            audit,
            routes: Arc::new(routes),
            config: Arc::new(config),
            metrics: None,
        }
    }

    /// Builder: serve `/metrics` from this handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Envelope and Extractors
// ═══════════════════════════════════════════════════════════════════════════════

/// Success envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PageInfo>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            pagination: None,
        }
    }

    pub fn with_pagination(mut self, pagination: PageInfo) -> Self {
        self.pagination = Some(pagination);
        self
    }
}

/// JSON body whose rejections use the failure envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(TaskgateError))]
pub struct ApiJson<T>(pub T);

/// Path parameters whose rejections use the failure envelope.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(TaskgateError))]
pub struct ApiPath<T>(pub T);

impl From<JsonRejection> for TaskgateError {
    fn from(rejection: JsonRejection) -> Self {
        TaskgateError::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for TaskgateError {
    fn from(rejection: PathRejection) -> Self {
        TaskgateError::bad_request(format!("Invalid id: {}", rejection.body_text()))
    }
}

/// Parse an optional id-valued query parameter.
pub(crate) fn parse_query_id<T: std::str::FromStr>(field: &str, raw: Option<&str>) -> Result<Option<T>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            TaskgateError::bad_request(format!("{} must be a valid id, got '{}'", field, raw))
        }),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Router
// ═══════════════════════════════════════════════════════════════════════════════

/// Mounts handlers under the API prefix with the guard each one declared.
struct GuardedRouter<'a> {
    state: &'a AppState,
    router: Router<AppState>,
    mounted: usize,
}

impl<'a> GuardedRouter<'a> {
    fn new(state: &'a AppState) -> Self {
        Self {
            state,
            router: Router::new(),
            mounted: 0,
        }
    }

    fn mount(mut self, verb: Verb, path: &str, handler: MethodRouter<AppState>) -> Result<Self> {
        let full = format!("{}{}", API_PREFIX, path);
        let layer = self
            .state
            .routes
            .layer(&self.state.gate, verb, &full)
            .map_err(|e| TaskgateError::configuration(e.to_string()))?;

        self.router = self.router.route(path, handler.route_layer(layer));
        self.mounted += 1;
        Ok(self)
    }

    fn finish(self) -> Result<Router<AppState>> {
        if self.mounted != self.state.routes.count() {
            return Err(TaskgateError::configuration(format!(
                "{} routes declared but {} mounted",
                self.state.routes.count(),
                self.mounted
            )));
        }
        Ok(self.router)
    }
}

fn api_routes(state: &AppState) -> Result<Router<AppState>> {
    use axum::routing::{delete, post, put};

    GuardedRouter::new(state)
        .mount(Verb::Post, "/roles", post(roles::create_role))?
        .mount(Verb::Get, "/roles", get(roles::get_roles))?
        .mount(Verb::Get, "/roles/:id", get(roles::get_role))?
        .mount(Verb::Put, "/roles/:id", put(roles::update_role))?
        .mount(Verb::Delete, "/roles/:id", delete(roles::delete_role))?
        .mount(Verb::Post, "/permissions", post(permissions::create_permission))?
        .mount(Verb::Get, "/permissions", get(permissions::get_permissions))?
        .mount(Verb::Get, "/permissions/:id", get(permissions::get_permission))?
        .mount(Verb::Put, "/permissions/:id", put(permissions::update_permission))?
        .mount(Verb::Delete, "/permissions/:id", delete(permissions::delete_permission))?
        .mount(Verb::Get, "/users", get(users::get_users))?
        .mount(Verb::Get, "/users/getMe", get(users::get_me))?
        .mount(Verb::Put, "/users/editMe", put(users::edit_me))?
        .mount(Verb::Put, "/users/role/:id", put(users::update_user_role))?
        .mount(Verb::Get, "/users/:id", get(users::get_user))?
        .mount(Verb::Delete, "/users/:id", delete(users::delete_user))?
        .mount(Verb::Get, "/logs", get(logs::get_logs))?
        .mount(Verb::Get, "/logs/:id", get(logs::get_log))?
        .mount(Verb::Delete, "/logs/:id", delete(logs::delete_log))?
        .finish()
}

/// Build the application router.
pub fn build_router(state: AppState) -> Result<Router> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = api_routes(&state)?
        .fallback(not_found)
        .layer(AuthLayer::new(
            state.identity.clone(),
            state.config.auth.cookie_name.as_str(),
        ))
        .layer(
            AuditLayer::new(state.audit.clone())
                .trust_proxy_headers(state.config.server.trust_proxy_headers),
        );

    let mut router = Router::new()
        .route("/health", get(health_check))
        .nest(API_PREFIX, api);

    if let Some(handle) = state.metrics.clone() {
        router = router.route(
            "/metrics",
            get(crate::observability::metrics_handler).with_state(handle),
        );
    }

    Ok(router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Unversioned Handlers
// ═══════════════════════════════════════════════════════════════════════════════

/// GET /health
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let healthy = state.store.health_check().await.is_ok();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "success": healthy,
            "status": if healthy { "healthy" } else { "unhealthy" },
            "store": state.store.backend_name(),
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

async fn not_found() -> TaskgateError {
    TaskgateError::new(crate::error::ErrorCode::NotFound, "Route not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_envelope() {
        let body = serde_json::to_value(ApiResponse::success("Fetched", vec![1, 2])).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Fetched");
        assert_eq!(body["data"], serde_json::json!([1, 2]));
        assert!(body.get("pagination").is_none());
    }

    #[test]
    fn test_api_response_with_pagination() {
        let body = serde_json::to_value(
            ApiResponse::success("Fetched", Vec::<u8>::new()).with_pagination(PageInfo::new(2, 10, 25)),
        )
        .unwrap();
        assert_eq!(body["pagination"]["length"], 25);
        assert_eq!(body["pagination"]["current"], 2);
        assert_eq!(body["pagination"]["total"], 3);
    }

    #[test]
    fn test_parse_query_id() {
        use crate::rbac::models::RoleId;

        assert_eq!(parse_query_id::<RoleId>("role", None).unwrap(), None);
        assert_eq!(parse_query_id::<RoleId>("role", Some(" ")).unwrap(), None);
        assert!(parse_query_id::<RoleId>("role", Some("abc")).is_err());

        let id = RoleId::new();
        assert_eq!(
            parse_query_id::<RoleId>("role", Some(&id.to_string())).unwrap(),
            Some(id)
        );
    }
}
