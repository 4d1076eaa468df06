//! REST handlers for the /addresses endpoints

use crate::{
    rest_error::RESTError,
    types::{PageQuery, TrackedAddressRequest},
    ApiState,
};
use andamio_common::model::{TrackedAddress, TransactionOutput, TransactionSummary};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::info;

/// Handle `/addresses/{address}/transactions`
pub async fn handle_address_transactions(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<TransactionSummary>>, RESTError> {
    let page = page.page(&state.config)?;
    let mut txn = state.db.read().await?;
    let txs = state.db.metadata().transactions_by_address(&mut txn, &address, page).await?;
    txn.discard().await;
    Ok(Json(txs))
}

/// Handle `/addresses/{address}/utxos`: outputs not yet spent
pub async fn handle_address_utxos(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<TransactionOutput>>, RESTError> {
    let page = page.page(&state.config)?;
    let mut txn = state.db.read().await?;
    let utxos = state.db.metadata().live_utxos_by_address(&mut txn, &address, page).await?;
    txn.discard().await;
    Ok(Json(utxos))
}

/// Handle `GET /addresses`
pub async fn handle_tracked_addresses(
    State(state): State<ApiState>,
) -> Result<Json<Vec<TrackedAddress>>, RESTError> {
    let mut txn = state.db.read().await?;
    let addresses = state.db.metadata().tracked_addresses(&mut txn).await?;
    txn.discard().await;
    Ok(Json(addresses.into_iter().map(|address| TrackedAddress { address }).collect()))
}

/// Handle `POST /addresses`; the relevance cache is reloaded on success
pub async fn handle_add_tracked_address(
    State(state): State<ApiState>,
    Json(request): Json<TrackedAddressRequest>,
) -> Result<(StatusCode, Json<TrackedAddress>), RESTError> {
    let address = request.address.trim().to_string();
    let added = state.db.metadata().add_tracked_address(None, &address).await?;
    state.cache.reload().await?;

    let status = if added {
        info!(address = %address, "Tracking address");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(TrackedAddress { address })))
}

/// Handle `DELETE /addresses/{address}`
pub async fn handle_remove_tracked_address(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Result<StatusCode, RESTError> {
    if !state.db.metadata().remove_tracked_address(None, &address).await? {
        return Err(RESTError::not_found("tracked address"));
    }
    state.cache.reload().await?;
    info!(address = %address, "Stopped tracking address");
    Ok(StatusCode::NO_CONTENT)
}
