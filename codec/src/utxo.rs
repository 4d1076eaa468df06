use crate::utils::to_hash;
use andamio_common::{
    asset::{AssetMap, PolicyAssets},
    crypto::blake2b_256,
    DatumEvent, IndexerError, IndexerResult, TxOutputEvent,
};
use pallas_primitives::conway;
use pallas_traverse::{Era, MultiEraOutput, MultiEraPolicyAssets, MultiEraValue};

// Eras whose output encodings we try, newest first
const OUTPUT_ERAS: [Era; 3] = [Era::Conway, Era::Alonzo, Era::Byron];

pub fn map_value(pallas_value: &MultiEraValue) -> AssetMap {
    let mut assets = AssetMap::new();

    for policy_group in pallas_value.assets() {
        match policy_group {
            MultiEraPolicyAssets::AlonzoCompatibleOutput(policy, kvps) => {
                let names = assets.entry(to_hash(policy)).or_insert_with(PolicyAssets::default);
                for (name, amt) in kvps.iter() {
                    names.0.insert(name.to_vec(), *amt);
                }
            }
            MultiEraPolicyAssets::ConwayOutput(policy, kvps) => {
                let names = assets.entry(to_hash(policy)).or_insert_with(PolicyAssets::default);
                for (name, amt) in kvps.iter() {
                    names.0.insert(name.to_vec(), u64::from(*amt));
                }
            }
            _ => {}
        }
    }
    assets
}

pub fn map_datum(datum: &Option<conway::MintedDatumOption>) -> Option<DatumEvent> {
    match datum {
        Some(conway::MintedDatumOption::Hash(h)) => Some(DatumEvent {
            hash: to_hash(h),
            cbor: None,
        }),
        Some(conway::MintedDatumOption::Data(d)) => {
            let cbor = d.raw_cbor().to_vec();
            Some(DatumEvent {
                hash: blake2b_256(&cbor),
                cbor: Some(cbor),
            })
        }
        None => None,
    }
}

/// Map a transaction output, keeping its raw encoding
pub fn map_output(output: &MultiEraOutput) -> IndexerResult<TxOutputEvent> {
    let address = output
        .address()
        .map_err(|e| IndexerError::Serialization(format!("invalid output address: {e}")))?;
    let value = output.value();

    Ok(TxOutputEvent {
        address: address.to_string(),
        amount: value.coin(),
        assets: map_value(&value),
        datum: map_datum(&output.datum()),
        cbor: output.encode(),
    })
}

/// Decode a raw output encoding, as stored under a UTxO blob key
pub fn decode_output(cbor: &[u8]) -> IndexerResult<TxOutputEvent> {
    for era in OUTPUT_ERAS {
        if let Ok(output) = MultiEraOutput::decode(era, cbor) {
            return map_output(&output);
        }
    }
    Err(IndexerError::Serialization(format!(
        "cannot decode output encoding of {} bytes",
        cbor.len()
    )))
}
