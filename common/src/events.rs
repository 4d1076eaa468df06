//! Chain-sync events delivered to the ingest pipeline

use crate::{
    asset::AssetMap,
    hash::{BlockHash, DatumHash, TxHash},
    point::Point,
};
use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Reference to a transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtxoRef {
    pub tx_hash: TxHash,
    pub index: u32,
}

impl UtxoRef {
    pub fn new(tx_hash: TxHash, index: u32) -> Self {
        Self { tx_hash, index }
    }
}

impl fmt::Display for UtxoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_hash, self.index)
    }
}

/// Datum attached to an output, by hash and optionally inline
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatumEvent {
    pub hash: DatumHash,
    #[serde_as(as = "Option<Hex>")]
    pub cbor: Option<Vec<u8>>,
}

/// A transaction output as decoded from the chain, or a resolved input
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutputEvent {
    pub address: String,
    pub amount: u64,
    pub assets: AssetMap,
    pub datum: Option<DatumEvent>,
    #[serde_as(as = "Hex")]
    pub cbor: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RedeemerTag {
    Spend,
    Mint,
    Cert,
    Reward,
}

impl RedeemerTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedeemerTag::Spend => "spend",
            RedeemerTag::Mint => "mint",
            RedeemerTag::Cert => "cert",
            RedeemerTag::Reward => "reward",
        }
    }
}

impl fmt::Display for RedeemerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedeemerTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spend" => Ok(RedeemerTag::Spend),
            "mint" => Ok(RedeemerTag::Mint),
            "cert" => Ok(RedeemerTag::Cert),
            "reward" => Ok(RedeemerTag::Reward),
            other => Err(format!("unknown redeemer tag '{other}'")),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemerEvent {
    pub tag: RedeemerTag,
    pub index: u32,
    #[serde_as(as = "Hex")]
    pub cbor: Vec<u8>,
}

/// Scripts, plutus data and redeemers from the transaction witness set
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessEvent {
    #[serde_as(as = "Vec<Hex>")]
    pub plutus_v1_scripts: Vec<Vec<u8>>,
    #[serde_as(as = "Vec<Hex>")]
    pub plutus_v2_scripts: Vec<Vec<u8>>,
    #[serde_as(as = "Vec<Hex>")]
    pub plutus_v3_scripts: Vec<Vec<u8>>,
    #[serde_as(as = "Vec<Hex>")]
    pub plutus_data: Vec<Vec<u8>>,
    pub redeemers: Vec<RedeemerEvent>,
}

/// A decoded transaction with its inputs resolved to the outputs they spend.
///
/// `resolved_inputs` is positionally aligned with `inputs`; an input that
/// could not be resolved is omitted, so the lengths differ.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub tx_hash: TxHash,
    #[serde_as(as = "Hex")]
    pub cbor: Vec<u8>,
    pub inputs: Vec<UtxoRef>,
    pub resolved_inputs: Vec<TxOutputEvent>,
    pub outputs: Vec<TxOutputEvent>,
    pub reference_inputs: Vec<UtxoRef>,
    #[serde_as(as = "Option<Hex>")]
    pub metadata: Option<Vec<u8>>,
    pub fee: u64,
    pub ttl: Option<u64>,
    /// Reward account to withdrawn amount
    pub withdrawals: BTreeMap<String, u64>,
    pub witnesses: WitnessEvent,
    #[serde_as(as = "Vec<Hex>")]
    pub certificates: Vec<Vec<u8>>,
    pub block_hash: BlockHash,
}

/// Where in the chain a transaction event sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionContext {
    pub block_number: u64,
    pub slot_number: u64,
    pub transaction_hash: TxHash,
}

/// Progress notification, one per block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSyncStatus {
    pub slot: u64,
    pub block_hash: BlockHash,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainSyncEvent {
    Status(ChainSyncStatus),
    Transaction(Box<TransactionEvent>, TransactionContext),
    /// Everything after this point is no longer on the chain
    Rollback(Point),
}
