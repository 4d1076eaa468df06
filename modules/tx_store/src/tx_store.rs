//! Andamio transaction store
//! Raw encodings in a Fjall blob store, the normalized model in SQLite, and a
//! unified transaction handle spanning both.

use andamio_common::{model::Transaction, IndexerError, IndexerResult, TxHash};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

pub mod blob_store;
pub mod cursor_store;
pub mod housekeeping;
pub mod metadata_store;
pub mod queries;
pub mod schema;
pub mod txn;

pub use blob_store::{blob_key_tx, blob_key_utxo, BlobStore};
pub use cursor_store::CursorStore;
pub use metadata_store::{MetadataStore, RolledBack};
pub use queries::{Page, UtxoEntry};
pub use txn::{StoreTxn, TxnScope};

const METADATA_FILE: &str = "metadata.sqlite";
const BLOB_DIR: &str = "blob";

pub(crate) fn sql_error(error: sqlx::Error) -> IndexerError {
    if let Some(db_error) = error.as_database_error() {
        if db_error.is_unique_violation()
            || db_error.is_foreign_key_violation()
            || db_error.is_check_violation()
        {
            return IndexerError::Integrity(db_error.message().to_string());
        }
    }
    IndexerError::StoreIo(error.to_string())
}

pub(crate) fn blob_error(error: fjall::Error) -> IndexerError {
    IndexerError::StoreIo(format!("blob store: {error}"))
}

fn create_private_dir(path: &Path) -> IndexerResult<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(path)
        .map_err(|e| IndexerError::StoreOpen(format!("cannot create {}: {e}", path.display())))
}

/// Both stores plus the cursor, opened under one directory
#[derive(Clone)]
pub struct Database {
    dir: PathBuf,
    metadata: MetadataStore,
    blob: BlobStore,
    cursor: CursorStore,
}

impl Database {
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub async fn open(dir: &Path) -> IndexerResult<Self> {
        create_private_dir(dir)?;
        let metadata = MetadataStore::open(&dir.join(METADATA_FILE)).await?;
        let blob = BlobStore::open(&dir.join(BLOB_DIR))?;
        let cursor = CursorStore::new(blob.clone());
        info!("Database open");
        Ok(Self {
            dir: dir.to_path_buf(),
            metadata,
            blob,
            cursor,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn blob(&self) -> &BlobStore {
        &self.blob
    }

    pub fn cursor(&self) -> &CursorStore {
        &self.cursor
    }

    /// Start a unified transaction over the stores named by `scope`
    pub async fn begin(&self, scope: TxnScope, read_write: bool) -> IndexerResult<StoreTxn> {
        let metadata = match scope.has_metadata() {
            true => Some(self.metadata.begin_raw().await?),
            false => None,
        };
        let blob = scope.has_blob().then(|| self.blob.batch());
        Ok(StoreTxn::new(scope, read_write, metadata, blob))
    }

    /// Read-only metadata handle for queries
    pub async fn read(&self) -> IndexerResult<StoreTxn> {
        self.begin(TxnScope::MetadataOnly, false).await
    }

    /// Write the metadata rows and the raw transaction, output and input
    /// encodings. An input's encoding is only written when its output's is
    /// not already stored.
    pub async fn persist_transaction(
        &self,
        txn: Option<&mut StoreTxn>,
        tx: &Transaction,
    ) -> IndexerResult<()> {
        match txn {
            Some(txn) => self.persist_into(txn, tx).await,
            None => {
                let mut txn = self.begin(TxnScope::Full, true).await?;
                self.persist_into(&mut txn, tx).await?;
                txn.commit().await
            }
        }
    }

    async fn persist_into(&self, txn: &mut StoreTxn, tx: &Transaction) -> IndexerResult<()> {
        self.metadata.persist_transaction(Some(txn), tx).await?;
        if !tx.cbor.is_empty() {
            self.blob.set(Some(txn), &blob_key_tx(&tx.tx_hash), &tx.cbor)?;
        }
        for output in tx.outputs.iter().filter(|o| !o.cbor.is_empty()) {
            self.blob.set(
                Some(txn),
                &blob_key_utxo(&output.utxo_id, output.utxo_index),
                &output.cbor,
            )?;
        }
        for input in tx.inputs.iter().filter(|i| !i.cbor.is_empty()) {
            let key = blob_key_utxo(&input.utxo_id, input.utxo_index);
            if !self.blob.contains(&key)? {
                self.blob.set(Some(txn), &key, &input.cbor)?;
            }
        }
        Ok(())
    }

    /// The full transaction aggregate with the raw encodings of the
    /// transaction and of every input and output that still has one
    pub async fn transaction(
        &self,
        txn: &mut StoreTxn,
        tx_hash: &TxHash,
    ) -> IndexerResult<Option<Transaction>> {
        let Some(mut tx) = self.metadata.transaction(txn, tx_hash).await? else {
            return Ok(None);
        };
        tx.cbor = self.blob.get(&blob_key_tx(tx_hash))?.unwrap_or_default();
        for input in &mut tx.inputs {
            input.cbor = self
                .blob
                .get(&blob_key_utxo(&input.utxo_id, input.utxo_index))?
                .unwrap_or_default();
        }
        for output in &mut tx.outputs {
            output.cbor = self
                .blob
                .get(&blob_key_utxo(&output.utxo_id, output.utxo_index))?
                .unwrap_or_default();
        }
        Ok(Some(tx))
    }

    /// Remove everything created after `slot` and revive outputs spent after it.
    /// Blobs of the removed transactions and outputs go in the same handle.
    pub async fn rollback_to(&self, txn: &mut StoreTxn, slot: u64) -> IndexerResult<RolledBack> {
        let removed = self.metadata.utxos_delete_rolledback(Some(txn), slot).await?;
        let revived = self.metadata.utxos_unspend(Some(txn), slot).await?;
        let keys = removed
            .tx_hashes
            .iter()
            .map(blob_key_tx)
            .chain(removed.utxos.iter().map(|u| blob_key_utxo(&u.tx_hash, u.index)));
        for key in keys {
            // Orphaned blobs only cost space; the metadata delete stands
            if let Err(e) = self.blob.delete(Some(txn), &key) {
                warn!(key = %hex::encode(&key), "Blob delete failed: {e}");
            }
        }
        info!(
            slot,
            transactions = removed.tx_hashes.len(),
            utxos = removed.utxos.len(),
            revived,
            "Rolled back store"
        );
        Ok(removed)
    }

    /// Close the metadata pool, then flush the blob journal
    pub async fn close(&self) -> IndexerResult<()> {
        self.metadata.close().await;
        self.blob.persist()
    }
}

#[cfg(test)]
mod tests;
