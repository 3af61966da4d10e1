use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::http::response::ProxyError;
use crate::http::server::AppState;
use crate::proxy::{GatewayHealth, ServiceStats};

#[derive(Serialize)]
pub struct HealthReport {
    pub version: &'static str,
    #[serde(flatten)]
    pub health: GatewayHealth,
}

#[derive(Serialize)]
pub struct StatsReport {
    pub services: Vec<ServiceStats>,
}

/// 503 only when every service is unhealthy.
pub async fn get_health(State(state): State<AppState>) -> Response {
    let health = state.gateway.health_report();
    let status = if health.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let report = HealthReport {
        version: env!("CARGO_PKG_VERSION"),
        health,
    };
    (status, Json(report)).into_response()
}

pub async fn get_stats(State(state): State<AppState>) -> Json<StatsReport> {
    Json(StatsReport {
        services: state.gateway.stats(),
    })
}

pub async fn get_service_stats(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Response {
    match state.gateway.service_stats(&service) {
        Some(stats) => Json(stats).into_response(),
        None => ProxyError::UnknownService(service).into_response(),
    }
}
