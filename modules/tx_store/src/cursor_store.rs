use crate::{blob_store::BlobStore, txn::StoreTxn};
use andamio_common::{model::CursorState, BlockHash, IndexerError, IndexerResult};
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

/// Well-known blob key of the cursor record
pub const CURSOR_KEY: &[u8] = b"indexer_cursor";

// Persisted layout: {"slot_number": u64, "block_hash": base64}
#[serde_as]
#[derive(Serialize, Deserialize)]
struct CursorRecord {
    slot_number: u64,
    #[serde_as(as = "Base64")]
    block_hash: Vec<u8>,
}

pub fn encode_cursor(cursor: &CursorState) -> IndexerResult<Vec<u8>> {
    Ok(serde_json::to_vec(&CursorRecord {
        slot_number: cursor.slot_number,
        block_hash: cursor.block_hash.to_vec(),
    })?)
}

pub fn decode_cursor(bytes: &[u8]) -> IndexerResult<CursorState> {
    let record: CursorRecord = serde_json::from_slice(bytes)?;
    let block_hash = BlockHash::try_from(record.block_hash).map_err(|hash| {
        IndexerError::Serialization(format!("cursor block hash has {} bytes", hash.len()))
    })?;
    Ok(CursorState {
        slot_number: record.slot_number,
        block_hash,
    })
}

/// Durable resume point, kept in the blob store so that it commits with the batch
#[derive(Clone)]
pub struct CursorStore {
    blob: BlobStore,
}

impl CursorStore {
    pub fn new(blob: BlobStore) -> Self {
        Self { blob }
    }

    pub fn update(
        &self,
        txn: Option<&mut StoreTxn>,
        slot_number: u64,
        block_hash: BlockHash,
    ) -> IndexerResult<()> {
        let value = encode_cursor(&CursorState {
            slot_number,
            block_hash,
        })?;
        self.blob.set(txn, CURSOR_KEY, &value)
    }

    /// The committed cursor, or `None` before the first batch commit
    pub fn get(&self) -> IndexerResult<Option<CursorState>> {
        match self.blob.get(CURSOR_KEY)? {
            Some(bytes) if !bytes.is_empty() => decode_cursor(&bytes).map(Some),
            _ => Ok(None),
        }
    }
}
