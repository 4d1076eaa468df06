//! REST handlers for the /transactions, /blocks and /utxos endpoints

use crate::{
    rest_error::RESTError,
    types::{parse_hash, CborResponse, PageQuery, SlotRangeQuery, UtxoResponse},
    ApiState,
};
use andamio_common::{
    model::{Transaction, TransactionSummary},
    TxHash, UtxoRef,
};
use andamio_module_tx_store::{blob_key_tx, blob_key_utxo};
use axum::{
    extract::{Path, Query, State},
    Json,
};

/// Handle `/transactions/{tx_hash}`
pub async fn handle_transaction(
    State(state): State<ApiState>,
    Path(tx_hash): Path<String>,
) -> Result<Json<Transaction>, RESTError> {
    let tx_hash: TxHash = parse_hash("tx_hash", &tx_hash)?;
    let mut txn = state.db.read().await?;
    let tx = state.db.transaction(&mut txn, &tx_hash).await?;
    txn.discard().await;
    tx.map(Json).ok_or_else(|| RESTError::not_found("transaction"))
}

/// Handle `/transactions/{tx_hash}/cbor`
pub async fn handle_transaction_cbor(
    State(state): State<ApiState>,
    Path(tx_hash): Path<String>,
) -> Result<Json<CborResponse>, RESTError> {
    let tx_hash: TxHash = parse_hash("tx_hash", &tx_hash)?;
    let cbor = state
        .db
        .blob()
        .get(&blob_key_tx(&tx_hash))?
        .ok_or_else(|| RESTError::not_found("transaction encoding"))?;
    Ok(Json(CborResponse {
        tx_hash,
        cbor: hex::encode(cbor),
    }))
}

/// Handle `/transactions?from_slot=&to_slot=`
pub async fn handle_transactions_by_slot(
    State(state): State<ApiState>,
    Query(range): Query<SlotRangeQuery>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<TransactionSummary>>, RESTError> {
    let (from, to) = range.bounds()?;
    let page = page.page(&state.config)?;
    let mut txn = state.db.read().await?;
    let txs = state.db.metadata().transactions_by_slot_range(&mut txn, from, to, page).await?;
    txn.discard().await;
    Ok(Json(txs))
}

/// Handle `/blocks/{block_number}/transactions`
pub async fn handle_block_transactions(
    State(state): State<ApiState>,
    Path(block_number): Path<u64>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<TransactionSummary>>, RESTError> {
    let page = page.page(&state.config)?;
    let mut txn = state.db.read().await?;
    let txs = state.db.metadata().transactions_by_block(&mut txn, block_number, page).await?;
    txn.discard().await;
    Ok(Json(txs))
}

/// Handle `/utxos/{tx_hash}/{index}`
pub async fn handle_utxo(
    State(state): State<ApiState>,
    Path((tx_hash, index)): Path<(String, u32)>,
) -> Result<Json<UtxoResponse>, RESTError> {
    let utxo = UtxoRef::new(parse_hash("tx_hash", &tx_hash)?, index);
    let mut txn = state.db.read().await?;
    let entry = state.db.metadata().utxo(&mut txn, &utxo).await?;
    txn.discard().await;

    let entry = entry.ok_or_else(|| RESTError::not_found("utxo"))?;
    let cbor = state.db.blob().get(&blob_key_utxo(&utxo.tx_hash, utxo.index))?;
    Ok(Json(UtxoResponse {
        entry,
        cbor: cbor.map(hex::encode),
    }))
}
