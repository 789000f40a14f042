//! HTTP Server
//!
//! Exposes the discovery engine over HTTP. There is no background loop: each
//! request to a collection endpoint runs the selected collector once, and the
//! caller owns the polling cadence.
//!
//! # Endpoints
//!
//! - `GET /` - HTML landing page
//! - `GET /api/collect` - Full [`CollectionResult`] as JSON
//! - `GET /api/ports` - Only the reconciled port list
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /health` - 200 unless the last run failed outright, 503 otherwise
//!
//! # State
//!
//! The collector is detected once at startup and shared, so its TTL cache and
//! middleware connection survive between requests.

use crate::collectors::Collector;
use crate::config::Config;
use crate::host::{Host, SystemHost};
use crate::metrics::MetricsCollector;
use crate::model::CollectionResult;
use crate::registry::resolve_collector;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    collector: Arc<dyn Collector>,
    metrics: MetricsCollector,
    last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(collector: Arc<dyn Collector>, metrics: MetricsCollector) -> Self {
        if let Some(detection) = collector.detection_info() {
            metrics.record_detection(detection);
        }
        Self {
            collector,
            metrics,
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Run one collection and fold it into the metrics.
    pub async fn run_collection(&self) -> CollectionResult {
        let started = Instant::now();
        let result = self.collector.collect_all().await;
        self.metrics.record_collection(&result, started.elapsed());
        *self.last_error.write().await = result.error.clone();
        result
    }
}

pub async fn start(config: Config) -> anyhow::Result<()> {
    let host: Arc<dyn Host> = Arc::new(SystemHost);
    let collector: Arc<dyn Collector> = Arc::from(resolve_collector(&config, host).await);
    info!("Using {} collector", collector.platform_name());

    let state = AppState::new(collector, MetricsCollector::new()?);
    let app = router(state);

    let addr = format!("{}:{}", config.server.addr, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Discovery server listening on {}", addr);
    info!("Collection available at http://{}/api/collect", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/collect", get(collect_handler))
        .route("/api/ports", get(ports_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn root_handler() -> impl IntoResponse {
    r#"<html>
<head><title>Portracker Discovery</title></head>
<body>
<h1>Portracker Discovery</h1>
<p><a href="/api/collect">Collect</a></p>
<p><a href="/api/ports">Ports</a></p>
<p><a href="/metrics">Metrics</a></p>
<p><a href="/health">Health</a></p>
</body>
</html>"#
}

async fn collect_handler(State(state): State<AppState>) -> Json<CollectionResult> {
    Json(state.run_collection().await)
}

async fn ports_handler(State(state): State<AppState>) -> Response {
    let result = state.run_collection().await;
    Json(result.ports).into_response()
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(metrics) => metrics.into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error rendering metrics: {}", e),
            )
                .into_response()
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.last_error.read().await.as_ref() {
        None => (StatusCode::OK, "OK".to_string()),
        Some(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Last collection failed: {}", error),
        ),
    }
}
