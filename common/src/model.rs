//! The persisted transaction model, as written by the normalizer and read by the API

use crate::{
    events::RedeemerTag,
    hash::{BlockHash, DatumHash, PolicyId, TxHash},
};
use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};
use std::collections::BTreeMap;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_hash: TxHash,
    pub block_hash: BlockHash,
    pub block_number: u64,
    pub slot_number: u64,
    pub fee: u64,
    pub ttl: Option<u64>,
    #[serde_as(as = "Option<Hex>")]
    pub metadata: Option<Vec<u8>>,
    pub withdrawals: BTreeMap<String, u64>,
    #[serde_as(as = "Vec<Hex>")]
    pub certificates: Vec<Vec<u8>>,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub reference_inputs: Vec<SimpleUtxo>,
    pub witness: Witness,
    /// Raw encoding, kept in the blob store rather than the metadata store
    #[serde(skip)]
    pub cbor: Vec<u8>,
}

/// Transaction row without its child collections
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub tx_hash: TxHash,
    pub block_hash: BlockHash,
    pub block_number: u64,
    pub slot_number: u64,
    pub fee: u64,
    pub ttl: Option<u64>,
    #[serde_as(as = "Option<Hex>")]
    pub metadata: Option<Vec<u8>>,
    pub withdrawals: BTreeMap<String, u64>,
    #[serde_as(as = "Vec<Hex>")]
    pub certificates: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub tx_hash: TxHash,
    pub utxo_id: TxHash,
    pub utxo_index: u32,
    pub address: String,
    pub amount: u64,
    pub assets: Vec<Asset>,
    pub datum: Option<Datum>,
    #[serde(skip)]
    pub cbor: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub utxo_id: TxHash,
    pub utxo_index: u32,
    pub address: String,
    pub amount: u64,
    pub assets: Vec<Asset>,
    pub datum: Option<Datum>,
    #[serde(skip)]
    pub cbor: Vec<u8>,
}

/// Reference input: the citing transaction and the output it refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleUtxo {
    pub tx_hash: TxHash,
    pub utxo_id: TxHash,
    pub utxo_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub utxo_id: TxHash,
    pub utxo_index: u32,
    pub name: String,
    pub name_hex: String,
    pub policy_id: PolicyId,
    pub fingerprint: String,
    pub amount: u64,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datum {
    pub utxo_id: TxHash,
    pub utxo_index: u32,
    pub datum_hash: DatumHash,
    #[serde_as(as = "Option<Hex>")]
    pub datum_cbor: Option<Vec<u8>>,
}

#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub tx_hash: TxHash,
    #[serde_as(as = "Vec<Hex>")]
    pub plutus_v1_scripts: Vec<Vec<u8>>,
    #[serde_as(as = "Vec<Hex>")]
    pub plutus_v2_scripts: Vec<Vec<u8>>,
    #[serde_as(as = "Vec<Hex>")]
    pub plutus_v3_scripts: Vec<Vec<u8>>,
    #[serde_as(as = "Vec<Hex>")]
    pub plutus_data: Vec<Vec<u8>>,
    pub redeemers: Vec<Redeemer>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redeemer {
    pub tag: RedeemerTag,
    pub index: u32,
    #[serde_as(as = "Hex")]
    pub cbor: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAddress {
    pub address: String,
}

/// The persisted resume point of the ingest pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    pub slot_number: u64,
    pub block_hash: BlockHash,
}

/// Aggregates served by the metrics endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerMetrics {
    pub distinct_addresses: u64,
    pub total_fees: u64,
    pub transaction_count: u64,
    pub distinct_assets: u64,
}
