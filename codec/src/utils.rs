use andamio_common::hash::Hash;
use andamio_common::{IndexerError, IndexerResult};
use pallas::codec::minicbor;

/// Convert a Pallas Hash reference to an Andamio Hash (owned)
/// Works for any hash size N
pub fn to_hash<const N: usize>(pallas_hash: &pallas_primitives::Hash<N>) -> Hash<N> {
    Hash::new(**pallas_hash)
}

/// CBOR-encode a pallas value
pub fn to_cbor<T>(value: &T, what: &str) -> IndexerResult<Vec<u8>>
where
    T: minicbor::Encode<()>,
{
    minicbor::to_vec(value)
        .map_err(|e| IndexerError::Serialization(format!("cannot encode {what}: {e}")))
}
