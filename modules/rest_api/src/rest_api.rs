//! Andamio REST module
//! Read-only queries over the transaction store, plus the tracked-address
//! endpoints that feed the relevance cache.

use andamio_common::configuration::ApiConfig;
use andamio_module_tx_indexer::RelevanceCache;
use andamio_module_tx_store::Database;
use anyhow::{Context, Result};
use axum::{
    routing::{delete, get},
    Router,
};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::watch};
use tracing::info;

mod handlers;
pub mod rest_error;
pub mod types;

use handlers::{
    addresses::{
        handle_add_tracked_address, handle_address_transactions, handle_address_utxos,
        handle_remove_tracked_address, handle_tracked_addresses,
    },
    assets::{handle_assets_by_fingerprint, handle_assets_by_name, handle_assets_by_policy},
    chain::{handle_health, handle_metrics},
    scripts::{handle_datum, handle_redeemer, handle_witness},
    transactions::{
        handle_block_transactions, handle_transaction, handle_transaction_cbor,
        handle_transactions_by_slot, handle_utxo,
    },
};

pub use rest_error::RESTError;

/// Shared by every handler
#[derive(Clone)]
pub struct ApiState {
    pub db: Database,
    pub cache: Arc<RelevanceCache>,
    pub config: ApiConfig,
    /// Platform addresses, left out of the distinct-address metric
    pub platform_addresses: Arc<[String]>,
}

impl ApiState {
    pub fn new(
        db: Database,
        cache: Arc<RelevanceCache>,
        config: ApiConfig,
        platform_addresses: Vec<String>,
    ) -> Self {
        Self {
            db,
            cache,
            config,
            platform_addresses: platform_addresses.into(),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/transactions", get(handle_transactions_by_slot))
        .route("/transactions/{tx_hash}", get(handle_transaction))
        .route("/transactions/{tx_hash}/cbor", get(handle_transaction_cbor))
        .route("/blocks/{block_number}/transactions", get(handle_block_transactions))
        .route("/addresses", get(handle_tracked_addresses).post(handle_add_tracked_address))
        .route("/addresses/{address}", delete(handle_remove_tracked_address))
        .route("/addresses/{address}/transactions", get(handle_address_transactions))
        .route("/addresses/{address}/utxos", get(handle_address_utxos))
        .route("/assets/policy/{policy_id}", get(handle_assets_by_policy))
        .route("/assets/fingerprint/{fingerprint}", get(handle_assets_by_fingerprint))
        .route("/assets/name/{name}", get(handle_assets_by_name))
        .route("/utxos/{tx_hash}/{index}", get(handle_utxo))
        .route("/datums/{datum_hash}", get(handle_datum))
        .route("/witnesses/{tx_hash}", get(handle_witness))
        .route("/redeemers/{tx_hash}/{tag}/{index}", get(handle_redeemer))
        .with_state(state)
}

/// Serve until `shutdown` flips to true, letting in-flight requests finish
pub async fn serve(state: ApiState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let address = state.config.address.clone();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Cannot bind REST listener on {address}"))?;
    info!("REST API listening on {address}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            info!("REST API shutting down");
        })
        .await
        .context("REST server failed")
}
