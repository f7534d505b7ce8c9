//! Axum-based HTTP gateway
//!
//! Exposes every configured device through one router: health, device
//! status and events, named resources, raw register access, configuration
//! and logs. Handlers only hold [`Arc<Gateway>`](crate::gateway::Gateway)
//! handles from the registry; all device access goes through the gateway.

use crate::config::Config;
use crate::error::{ErrorCategory, GatewayError};
use crate::gateway::GatewayRegistry;
use crate::health::{HealthRegistry, HealthState};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

mod devices;
mod logs;

pub use logs::logs_stream;

#[derive(Clone)]
pub struct AppState {
    pub registry: GatewayRegistry,
    pub health: Arc<HealthRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(registry: GatewayRegistry, config: Config) -> Self {
        let health = HealthRegistry::from_gateways(&registry);
        Self {
            registry,
            health: Arc::new(health),
            config: Arc::new(config),
        }
    }

    /// Upper bound for a full `/api/health` evaluation
    fn health_deadline(&self) -> Duration {
        Duration::from_millis(self.config.gateway.probe_timeout_ms)
    }
}

/// HTTP status for an error, by category
pub fn status_code(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::UnknownDevice { .. } | GatewayError::UnknownResource { .. } => {
            StatusCode::NOT_FOUND
        }
        GatewayError::Serialization { .. } | GatewayError::Io { .. } | GatewayError::Web { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::RetryExhausted { last, .. } => match **last {
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        },
        other => match other.category() {
            ErrorCategory::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCategory::Transient | ErrorCategory::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::Terminal => StatusCode::BAD_GATEWAY,
            ErrorCategory::Unhandled => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.category().as_str(),
            "kind": self.kind(),
            "message": self.to_string(),
        });
        (status_code(&self), Json(body)).into_response()
    }
}

async fn health_live() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("APP_VERSION"),
    }))
}

fn health_status(state: HealthState) -> StatusCode {
    match state {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
    }
}

async fn health_ready(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.cached();
    (health_status(report.state), Json(report))
}

async fn health_full(State(state): State<AppState>) -> impl IntoResponse {
    let token = CancellationToken::new();
    // Probes are abandoned if the client goes away
    let _guard = token.clone().drop_guard();
    let checks = state.health.check_all(&token);
    tokio::pin!(checks);
    let outcome = tokio::time::timeout(state.health_deadline(), &mut checks).await;
    let report = match outcome {
        Ok(report) => report,
        Err(_) => {
            // Finished checks keep their result; pending probes report cancelled
            token.cancel();
            checks.await
        }
    };
    (health_status(report.state), Json(report))
}

async fn get_config(State(state): State<AppState>) -> Response {
    match serde_json::to_value(state.config.as_ref()) {
        Ok(json) => Json(json).into_response(),
        Err(e) => GatewayError::from(e).into_response(),
    }
}

async fn get_config_schema() -> impl IntoResponse {
    Json(schemars::schema_for!(Config))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_full))
        .route("/api/health/live", get(health_live))
        .route("/api/health/ready", get(health_ready))
        .route("/api/config", get(get_config))
        .route("/api/config/schema", get(get_config_schema))
        .merge(devices::routes())
        .merge(logs::routes())
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve the API until `shutdown` resolves
pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let router = build_router(state);
    let logger = crate::logging::get_logger("web");
    logger.info(&format!(
        "Starting web server; requested host={}, port={}",
        host, port
    ));

    let addr = match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(_) => {
            logger.warn(&format!("Invalid host '{}'; falling back to 127.0.0.1", host));
            ([127, 0, 0, 1], port).into()
        }
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    logger.info(&format!(
        "Web server listening at http://{}:{} (API /api)",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    logger.info("Web server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes_follow_category() {
        assert_eq!(
            status_code(&GatewayError::invalid_request("bad")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_code(&GatewayError::UnknownDevice {
                name: "x".to_string()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_code(&GatewayError::decoding("garbage")),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_code(&GatewayError::RetryExhausted {
                attempts: 3,
                last: Box::new(GatewayError::timeout("slow")),
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_code(&GatewayError::unavailable("busy")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_code(&GatewayError::internal("boom")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
