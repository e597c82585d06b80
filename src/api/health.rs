use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub gateway_mode: String,
    pub merchant_configured: bool,
    pub store: String,
}

/// Liveness plus a store round trip; 503 when the store is unreachable
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let version = env!("CARGO_PKG_VERSION").to_string();
    let config = &state.config;

    if let Err(e) = state.store.health_check().await {
        warn!(error = %e, "Payment store health check failed");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let merchant_configured = !config.gateway.merchant_key.is_empty()
        && !config.gateway.merchant_salt.expose().is_empty();

    let response = HealthResponse {
        status: "healthy".to_string(),
        version,
        environment: config.server.environment.clone(),
        gateway_mode: config.gateway.mode.to_string(),
        merchant_configured,
        store: "ok".to_string(),
    };

    Ok(Json(response))
}
