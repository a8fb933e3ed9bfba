//! Admin HTTP server for health checks and metrics.
//!
//! - `GET /health` - Liveness plus task counts; 503 once shutdown begins
//! - `GET /metrics` - OpenMetrics text from the prometheus-client registry
//!
//! Runs on its own port so it never shares a channel with task clients.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use prometheus_client::registry::Registry;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use taskgate_core::TaskService;
use taskgate_core::service::ServiceStats;

use crate::error::ServeError;

/// Shared state for the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub service: Arc<TaskService>,
    pub prom_registry: Arc<Registry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthBody {
    status: &'static str,
    version: &'static str,
    tasks: ServiceStats,
}

/// Admin server bound to a listener.
pub struct AdminServer {
    listener: TcpListener,
    state: AdminState,
}

impl AdminServer {
    /// Binds `bind:port`.
    ///
    /// # Errors
    ///
    /// `AdminAddress` if the address does not parse, `AdminBind` if the
    /// port cannot be bound.
    pub async fn bind(bind: &str, port: u16, state: AdminState) -> Result<Self, ServeError> {
        let addr: SocketAddr =
            format!("{bind}:{port}")
                .parse()
                .map_err(|_| ServeError::AdminAddress {
                    bind: bind.to_string(),
                })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServeError::AdminBind { addr, source })?;
        Ok(Self { listener, state })
    }

    /// Address actually bound (differs from the request when port 0 was used).
    pub fn local_addr(&self) -> Result<SocketAddr, ServeError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServeError> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Admin server listening");

        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Admin server shutting down");
            })
            .await?;
        Ok(())
    }
}

/// Router for the admin endpoints.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let shutting_down = state.service.is_shutting_down();
    let body = HealthBody {
        status: if shutting_down { "shutting_down" } else { "ok" },
        version: env!("CARGO_PKG_VERSION"),
        tasks: state.service.stats(),
    };
    let code = if shutting_down {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(body))
}

async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let mut buffer = String::new();

    if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &state.prom_registry) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {e}"),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buffer,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use taskgate_core::config::Config;
    use taskgate_core::executor::OperationCatalog;
    use taskgate_core::telemetry::TaskgateMetrics;
    use tower::ServiceExt;

    fn create_test_state() -> AdminState {
        let mut registry = Registry::default();
        let metrics = Arc::new(TaskgateMetrics::new(&mut registry));
        let service = TaskService::new(
            &Config::default(),
            OperationCatalog::with_builtins(),
            Some(metrics),
        );
        AdminState {
            service,
            prom_registry: Arc::new(registry),
        }
    }

    async fn get(state: AdminState, uri: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_task_counts() {
        let state = create_test_state();
        state
            .service
            .start("echo", json!({"value": 1, "steps": 0}))
            .unwrap();

        let (status, body) = get(state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["tasks"]["totalTasks"], 1);
    }

    #[tokio::test]
    async fn test_health_unavailable_after_shutdown() {
        let state = create_test_state();
        state.service.shutdown().await;

        let (status, body) = get(state, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("shutting_down"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_exposes_task_metrics() {
        let state = create_test_state();
        state.service.start("echo", json!({"value": 1})).unwrap();

        let (status, body) = get(state, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("taskgate_tasks_started"), "{body}");
        assert!(body.ends_with("# EOF\n"));
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        let err = AdminServer::bind("not an address", 0, create_test_state())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServeError::AdminAddress { .. }));
    }
}
