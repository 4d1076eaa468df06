//! REST handlers for datums, witnesses and redeemers

use crate::{rest_error::RESTError, types::parse_hash, ApiState};
use andamio_common::{
    model::{Datum, Redeemer, Witness},
    DatumHash, RedeemerTag, TxHash,
};
use axum::{
    extract::{Path, State},
    Json,
};

/// Handle `/datums/{datum_hash}`
pub async fn handle_datum(
    State(state): State<ApiState>,
    Path(datum_hash): Path<String>,
) -> Result<Json<Datum>, RESTError> {
    let datum_hash: DatumHash = parse_hash("datum_hash", &datum_hash)?;
    let mut txn = state.db.read().await?;
    let datum = state.db.metadata().datum(&mut txn, &datum_hash).await?;
    txn.discard().await;
    datum.map(Json).ok_or_else(|| RESTError::not_found("datum"))
}

/// Handle `/witnesses/{tx_hash}`
pub async fn handle_witness(
    State(state): State<ApiState>,
    Path(tx_hash): Path<String>,
) -> Result<Json<Witness>, RESTError> {
    let tx_hash: TxHash = parse_hash("tx_hash", &tx_hash)?;
    let mut txn = state.db.read().await?;
    let witness = state.db.metadata().witness(&mut txn, &tx_hash).await?;
    txn.discard().await;
    witness.map(Json).ok_or_else(|| RESTError::not_found("witness"))
}

/// Handle `/redeemers/{tx_hash}/{tag}/{index}`
pub async fn handle_redeemer(
    State(state): State<ApiState>,
    Path((tx_hash, tag, index)): Path<(String, String, u32)>,
) -> Result<Json<Redeemer>, RESTError> {
    let tx_hash: TxHash = parse_hash("tx_hash", &tx_hash)?;
    let tag: RedeemerTag = tag.parse().map_err(|e: String| RESTError::invalid_param("tag", e))?;
    let mut txn = state.db.read().await?;
    let redeemer = state.db.metadata().redeemer(&mut txn, &tx_hash, tag, index).await?;
    txn.discard().await;
    redeemer.map(Json).ok_or_else(|| RESTError::not_found("redeemer"))
}
