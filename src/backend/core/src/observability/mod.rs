//! Observability: structured logging and Prometheus metrics.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::error::{Result, TaskgateError};

/// Initialize the tracing subscriber. `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TaskgateError::configuration(format!("Invalid log level: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json_logging {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).try_init()
    };

    installed.map_err(|e| TaskgateError::configuration(format!("Failed to install subscriber: {}", e)))
}

/// Install the Prometheus recorder and describe the service's metrics.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TaskgateError::configuration(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();
    Ok(handle)
}

/// Register all metric descriptions.
pub fn register_metrics() {
    use metrics::describe_counter;

    describe_counter!(
        "taskgate_authz_decisions_total",
        "Authorization decisions by outcome and reason"
    );
    describe_counter!("taskgate_errors_total", "Errors returned to clients by code");
    describe_counter!("taskgate_seed_runs_total", "Seeding runs by outcome");
    describe_counter!("taskgate_auth_success_total", "Verified credentials");
    describe_counter!("taskgate_auth_failures_total", "Rejected credentials");
    describe_counter!(
        "taskgate_audit_dropped_total",
        "Audit entries dropped because the writer was saturated or gone"
    );
}

/// GET /metrics
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}
