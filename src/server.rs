//! Web server module for the exporter.
//!
//! Serves the Prometheus scrape endpoint and a JSON health report built from
//! the collector statuses.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::collector::{CollectorStatus, JobInfo, Scheduler};
use crate::config::Settings;
use crate::metrics::names::{self, labels};
use crate::metrics::{MetricRegistry, MetricSpec, MetricsError};

/// Crate version reported by `exporter_build_info`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<MetricRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub settings: Arc<Settings>,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    collectors: Vec<CollectorStatus>,
    jobs: Vec<JobInfo>,
}

/// Register `exporter_build_info` and `exporter_up`, both set to 1.
pub fn register_exporter_metrics(registry: &MetricRegistry) -> Result<(), MetricsError> {
    registry
        .info(
            MetricSpec::new(names::EXPORTER_BUILD_INFO, "Exporter build information")
                .labels(&[labels::VERSION]),
        )?
        .set(&[VERSION]);
    registry
        .gauge(MetricSpec::new(names::EXPORTER_UP, "Whether the exporter is running"))?
        .with_label_values(&[])
        .set(1.0);
    Ok(())
}

/// Create the Axum router with all routes.
///
/// `server.path_prefix` is prepended to the metrics and health routes; the
/// landing page always lives at `/`.
pub fn create_router(state: AppState) -> Router {
    let prefix = state.settings.server.path_prefix.clone();
    let enable_health_check = state.settings.server.enable_health_check;

    let mut router = Router::new()
        .route("/", get(landing_handler))
        .route(&format!("{prefix}/metrics"), get(metrics_handler));
    if enable_health_check {
        router = router.route(&format!("{prefix}/health"), get(health_handler));
    }

    router
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(Arc::new(state))
}

async fn landing_handler(State(state): State<Arc<AppState>>) -> String {
    let prefix = &state.settings.server.path_prefix;
    let mut body = format!(
        "UniFi Protect Exporter {VERSION}\n\nMetrics: {prefix}/metrics\n"
    );
    if state.settings.server.enable_health_check {
        body.push_str(&format!("Health: {prefix}/health\n"));
    }
    body
}

/// Prometheus scrape endpoint.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.encode_text() {
        Ok(body) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {e}")).into_response()
        }
    }
}

/// Collector health report; 503 while any collector is unhealthy.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let collectors = state.scheduler.statuses();
    let healthy = collectors.iter().all(|status| status.healthy);
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        collectors,
        jobs: state.scheduler.list_jobs(),
    };

    if healthy {
        Json(response).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response()
    }
}
