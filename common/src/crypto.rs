//! Common cryptography helper functions

use crate::hash::DatumHash;
use blake2::{
    digest::consts::{U20, U32},
    Blake2b, Digest,
};

/// Get a Blake2b-256 hash of some bytes, as used for datum hashes
pub fn blake2b_256(data: &[u8]) -> DatumHash {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    DatumHash::new(out)
}

/// Get a Blake2b-160 hash of some bytes
pub fn blake2b_160(data: &[u8]) -> [u8; 20] {
    let mut hasher = Blake2b::<U20>::new();
    hasher.update(data);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hasher.finalize());
    out
}
