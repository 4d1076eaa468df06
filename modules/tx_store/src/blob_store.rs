//! On-disk store using Fjall for raw transaction and UTxO encodings

use crate::{
    blob_error,
    txn::{StoreTxn, TxnScope},
};
use andamio_common::{IndexerError, IndexerResult, TxHash};
use fjall::{Database, Keyspace, KeyspaceCreateOptions, OwnedWriteBatch, PersistMode};
use std::path::Path;
use tracing::info;

const KEYSPACE_NAME: &str = "blobs";

/// Key prefix of raw transaction encodings
pub const TX_KEY_PREFIX: u8 = b't';

/// Key prefix of raw UTxO encodings
pub const UTXO_KEY_PREFIX: u8 = b'u';

/// `0x74 ‖ tx_hash`
pub fn blob_key_tx(tx_hash: &TxHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + tx_hash.len());
    key.push(TX_KEY_PREFIX);
    key.extend_from_slice(tx_hash.as_ref());
    key
}

/// `0x75 ‖ tx_id ‖ big-endian u32 output index`
pub fn blob_key_utxo(tx_id: &TxHash, index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + tx_id.len() + 4);
    key.push(UTXO_KEY_PREFIX);
    key.extend_from_slice(tx_id.as_ref());
    key.extend_from_slice(&index.to_be_bytes());
    key
}

#[derive(Clone)]
pub struct BlobStore {
    database: Database,
    keyspace: Keyspace,
}

impl BlobStore {
    pub fn open(path: &Path) -> IndexerResult<Self> {
        info!("Opening blob store at {}", path.display());
        let database = Database::builder(path)
            .open()
            .map_err(|e| IndexerError::StoreOpen(format!("blob store {}: {e}", path.display())))?;
        let keyspace = database
            .keyspace(KEYSPACE_NAME, KeyspaceCreateOptions::default)
            .map_err(|e| IndexerError::StoreOpen(format!("blob keyspace: {e}")))?;
        Ok(Self { database, keyspace })
    }

    /// Start a blob-only unified transaction
    pub fn begin(&self) -> StoreTxn {
        StoreTxn::new(TxnScope::BlobOnly, true, None, Some(self.batch()))
    }

    pub(crate) fn batch(&self) -> BlobBatch {
        BlobBatch {
            store: self.clone(),
            batch: self.database.batch(),
            len: 0,
        }
    }

    /// Write a value, staged in `txn` if given, otherwise applied at once
    pub fn set(&self, txn: Option<&mut StoreTxn>, key: &[u8], value: &[u8]) -> IndexerResult<()> {
        match txn {
            Some(txn) => {
                txn.blob()?.insert(key, value);
                Ok(())
            }
            None => self.keyspace.insert(key, value).map_err(blob_error),
        }
    }

    /// Read committed state
    pub fn get(&self, key: &[u8]) -> IndexerResult<Option<Vec<u8>>> {
        Ok(self.keyspace.get(key).map_err(blob_error)?.map(|value| value.to_vec()))
    }

    pub fn delete(&self, txn: Option<&mut StoreTxn>, key: &[u8]) -> IndexerResult<()> {
        match txn {
            Some(txn) => {
                txn.blob()?.remove(key);
                Ok(())
            }
            None => self.keyspace.remove(key).map_err(blob_error),
        }
    }

    pub fn contains(&self, key: &[u8]) -> IndexerResult<bool> {
        self.keyspace.contains_key(key).map_err(blob_error)
    }

    /// Flush the journal to disk
    pub fn persist(&self) -> IndexerResult<()> {
        self.database.persist(PersistMode::SyncAll).map_err(blob_error)
    }
}

/// Pending blob writes of one unified transaction
pub struct BlobBatch {
    store: BlobStore,
    batch: OwnedWriteBatch,
    len: usize,
}

impl BlobBatch {
    pub fn insert(&mut self, key: &[u8], value: &[u8]) {
        self.batch.insert(&self.store.keyspace, key, value);
        self.len += 1;
    }

    pub fn remove(&mut self, key: &[u8]) {
        self.batch.remove(&self.store.keyspace, key);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn commit(self) -> IndexerResult<()> {
        if self.len == 0 {
            return Ok(());
        }
        self.batch.commit().map_err(blob_error)?;
        self.store.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hash(byte: u8) -> TxHash {
        TxHash::new([byte; 32])
    }

    #[test]
    fn tx_key_layout() {
        let key = blob_key_tx(&hash(0xaa));
        assert_eq!(key.len(), 33);
        assert_eq!(key[0], 0x74);
        assert_eq!(&key[1..], &[0xaa; 32]);
    }

    #[test]
    fn utxo_key_layout() {
        let key = blob_key_utxo(&hash(0xbb), 0x0102_0304);
        assert_eq!(key.len(), 37);
        assert_eq!(key[0], 0x75);
        assert_eq!(&key[1..33], &[0xbb; 32]);
        assert_eq!(&key[33..], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn utxo_keys_are_distinct_per_index() {
        let id = hash(0x01);
        assert_ne!(blob_key_utxo(&id, 1), blob_key_utxo(&id, 256));
        assert_ne!(blob_key_utxo(&id, 0), blob_key_tx(&id));
    }

    #[test]
    fn should_set_get_and_delete_without_txn() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let key = blob_key_tx(&hash(0x11));

        assert_eq!(store.get(&key).unwrap(), None);
        store.set(None, &key, b"payload").unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(b"payload".to_vec()));
        store.delete(None, &key).unwrap();
        assert_eq!(store.get(&key).unwrap(), None);
    }

    #[tokio::test]
    async fn should_apply_staged_writes_only_on_commit() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let key = blob_key_tx(&hash(0x22));

        let mut txn = store.begin();
        store.set(Some(&mut txn), &key, b"staged").unwrap();
        assert_eq!(store.get(&key).unwrap(), None);
        txn.commit().await.unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(b"staged".to_vec()));

        let mut txn = store.begin();
        store.delete(Some(&mut txn), &key).unwrap();
        txn.rollback().await;
        assert_eq!(store.get(&key).unwrap(), Some(b"staged".to_vec()));
    }
}
