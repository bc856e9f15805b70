use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::state::AppState;

/// GET /health
/// Returns a simple status object with service version.
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "credits-api"
    }))
}

/// GET /health/chain
/// Latest block height from the configured REST endpoint.
pub async fn chain_health_handler(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let height = state
        .chain
        .latest_height(state.config.query_timeout)
        .await
        .map_err(|e| AppError::Chain(e.to_string()))?;

    Ok(Json(json!({
        "status": "ok",
        "chain_id": state.config.chain_id,
        "latest_block_height": height
    })))
}
