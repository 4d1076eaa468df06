use crate::{
    utils::{to_cbor, to_hash},
    utxo::map_output,
    witness::map_witnesses,
};
use andamio_common::{BlockHash, IndexerResult, TransactionEvent, TxHash, UtxoRef};
use pallas::ledger::addresses::Address as PallasAddress;
use pallas_primitives::{alonzo, conway};
use pallas_traverse::{MultiEraCert, MultiEraInput, MultiEraTx};
use std::collections::BTreeMap;

fn map_input(input: &MultiEraInput) -> UtxoRef {
    let oref = input.output_ref();
    UtxoRef::new(TxHash::from(**oref.hash()), oref.index() as u32)
}

/// Reward accounts are keyed by their bech32 stake address, or hex if unparseable
fn map_reward_account(key: &[u8]) -> String {
    match PallasAddress::from_bytes(key) {
        Ok(PallasAddress::Stake(stake)) => stake.to_bech32().unwrap_or_else(|_| hex::encode(key)),
        _ => hex::encode(key),
    }
}

pub fn map_withdrawals(tx: &MultiEraTx) -> BTreeMap<String, u64> {
    tx.withdrawals_sorted_set()
        .into_iter()
        .map(|(key, value)| (map_reward_account(key), value))
        .collect()
}

pub fn map_certificates(tx: &MultiEraTx) -> IndexerResult<Vec<Vec<u8>>> {
    let mut certs = Vec::new();
    for (index, cert) in tx.certs().iter().enumerate() {
        let what = format!("certificate {index}");
        match cert {
            MultiEraCert::AlonzoCompatible(c) => {
                let c: &alonzo::Certificate = c;
                certs.push(to_cbor(c, &what)?);
            }
            MultiEraCert::Conway(c) => {
                let c: &conway::Certificate = c;
                certs.push(to_cbor(c, &what)?);
            }
            _ => {}
        }
    }
    Ok(certs)
}

pub fn map_metadata(tx: &MultiEraTx) -> IndexerResult<Option<Vec<u8>>> {
    match tx.metadata().as_alonzo() {
        Some(metadata) if !metadata.is_empty() => Ok(Some(to_cbor(metadata, "metadata")?)),
        _ => Ok(None),
    }
}

/// Map a pallas transaction to a chain-sync event.
///
/// Inputs are left unresolved; the chain-sync client fills `resolved_inputs`.
pub fn map_transaction(tx: &MultiEraTx, block_hash: BlockHash) -> IndexerResult<TransactionEvent> {
    let tx_hash = to_hash(&tx.hash());

    let mut outputs = Vec::new();
    for (index, output) in tx.outputs().iter().enumerate() {
        let output = map_output(output).map_err(|e| {
            tracing::error!(tx = %tx_hash, index, "Cannot map output: {e}");
            e
        })?;
        outputs.push(output);
    }

    Ok(TransactionEvent {
        tx_hash,
        cbor: tx.encode(),
        inputs: tx.consumes().iter().map(map_input).collect(),
        resolved_inputs: Vec::new(),
        outputs,
        reference_inputs: tx.reference_inputs().iter().map(map_input).collect(),
        metadata: map_metadata(tx)?,
        fee: tx.fee().unwrap_or(0),
        ttl: tx.ttl(),
        withdrawals: map_withdrawals(tx),
        witnesses: map_witnesses(tx)?,
        certificates: map_certificates(tx)?,
        block_hash,
    })
}
