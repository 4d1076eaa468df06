//! Health and metrics

use crate::{
    rest_error::RESTError,
    types::{HealthResponse, MetricsResponse},
    ApiState,
};
use axum::{extract::State, Json};

/// Handle `/health`
pub async fn handle_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, RESTError> {
    if !state.db.metadata().is_healthy().await {
        return Err(RESTError::InternalServerError(
            "metadata store unavailable".to_string(),
        ));
    }
    Ok(Json(HealthResponse {
        status: "ok",
        cursor: state.db.cursor().get()?,
    }))
}

/// Handle `/metrics`
pub async fn handle_metrics(State(state): State<ApiState>) -> Result<Json<MetricsResponse>, RESTError> {
    let mut txn = state.db.read().await?;
    let metrics = state.db.metadata().metrics(&mut txn, &state.platform_addresses).await?;
    txn.discard().await;
    Ok(Json(MetricsResponse {
        metrics,
        cursor: state.db.cursor().get()?,
    }))
}
