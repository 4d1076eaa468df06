//! Turns a decoded transaction event into the persisted aggregate

use andamio_common::{
    asset::{flatten, AssetMap},
    model::{
        Asset, Datum, Redeemer, SimpleUtxo, Transaction, TransactionInput, TransactionOutput,
        Witness,
    },
    DatumEvent, IndexerError, IndexerResult, TransactionContext, TransactionEvent, TxHash,
};

fn assets_of(utxo_id: &TxHash, utxo_index: u32, assets: &AssetMap) -> IndexerResult<Vec<Asset>> {
    Ok(flatten(assets)?
        .into_iter()
        .map(|flat| Asset {
            utxo_id: *utxo_id,
            utxo_index,
            name: flat.name,
            name_hex: flat.name_hex,
            policy_id: flat.policy_id,
            fingerprint: flat.fingerprint,
            amount: flat.amount,
        })
        .collect())
}

fn datum_of(utxo_id: &TxHash, utxo_index: u32, datum: &Option<DatumEvent>) -> Option<Datum> {
    datum.as_ref().map(|datum| Datum {
        utxo_id: *utxo_id,
        utxo_index,
        datum_hash: datum.hash,
        datum_cbor: datum.cbor.clone(),
    })
}

/// Build the aggregate for one admitted transaction.
///
/// Fails with `InputsMismatch` unless every input was resolved.
pub fn normalize(event: &TransactionEvent, context: &TransactionContext) -> IndexerResult<Transaction> {
    let tx_hash = event.tx_hash;
    if event.inputs.len() != event.resolved_inputs.len() {
        return Err(IndexerError::InputsMismatch { tx_hash });
    }

    let inputs = event
        .inputs
        .iter()
        .zip(&event.resolved_inputs)
        .map(|(input, resolved)| {
            Ok(TransactionInput {
                tx_hash,
                utxo_id: input.tx_hash,
                utxo_index: input.index,
                address: resolved.address.clone(),
                amount: resolved.amount,
                assets: assets_of(&input.tx_hash, input.index, &resolved.assets)?,
                datum: datum_of(&input.tx_hash, input.index, &resolved.datum),
                cbor: resolved.cbor.clone(),
            })
        })
        .collect::<IndexerResult<Vec<_>>>()?;

    let outputs = event
        .outputs
        .iter()
        .enumerate()
        .map(|(index, output)| {
            let utxo_index = index as u32;
            Ok(TransactionOutput {
                utxo_id: tx_hash,
                utxo_index,
                address: output.address.clone(),
                amount: output.amount,
                assets: assets_of(&tx_hash, utxo_index, &output.assets)?,
                datum: datum_of(&tx_hash, utxo_index, &output.datum),
                cbor: output.cbor.clone(),
            })
        })
        .collect::<IndexerResult<Vec<_>>>()?;

    let reference_inputs = event
        .reference_inputs
        .iter()
        .map(|utxo| SimpleUtxo {
            tx_hash,
            utxo_id: utxo.tx_hash,
            utxo_index: utxo.index,
        })
        .collect();

    let witnesses = &event.witnesses;
    let witness = Witness {
        tx_hash,
        plutus_v1_scripts: witnesses.plutus_v1_scripts.clone(),
        plutus_v2_scripts: witnesses.plutus_v2_scripts.clone(),
        plutus_v3_scripts: witnesses.plutus_v3_scripts.clone(),
        plutus_data: witnesses.plutus_data.clone(),
        redeemers: witnesses
            .redeemers
            .iter()
            .map(|r| Redeemer {
                tag: r.tag,
                index: r.index,
                cbor: r.cbor.clone(),
            })
            .collect(),
    };

    Ok(Transaction {
        tx_hash,
        block_hash: event.block_hash,
        block_number: context.block_number,
        slot_number: context.slot_number,
        fee: event.fee,
        ttl: event.ttl,
        metadata: event.metadata.clone(),
        withdrawals: event.withdrawals.clone(),
        certificates: event.certificates.clone(),
        inputs,
        outputs,
        reference_inputs,
        witness,
        cbor: event.cbor.clone(),
    })
}
