//! A single logical transaction spanning the metadata and blob stores.
//!
//! Commit order is metadata first, then blob. If the blob commit fails the
//! metadata commit cannot be undone; writes are idempotent upserts and the
//! cursor lives in the blob store, so the window is re-ingested on restart.

use crate::{blob_store::BlobBatch, sql_error};
use andamio_common::{IndexerError, IndexerResult};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnScope {
    Full,
    BlobOnly,
    MetadataOnly,
}

impl TxnScope {
    pub fn has_metadata(&self) -> bool {
        matches!(self, TxnScope::Full | TxnScope::MetadataOnly)
    }

    pub fn has_blob(&self) -> bool {
        matches!(self, TxnScope::Full | TxnScope::BlobOnly)
    }
}

/// Unified transaction handle.
///
/// Dropping the handle without committing rolls both stores back.
pub struct StoreTxn {
    scope: TxnScope,
    read_write: bool,
    metadata: Option<Transaction<'static, Sqlite>>,
    blob: Option<BlobBatch>,
}

impl StoreTxn {
    pub(crate) fn new(
        scope: TxnScope,
        read_write: bool,
        metadata: Option<Transaction<'static, Sqlite>>,
        blob: Option<BlobBatch>,
    ) -> Self {
        Self {
            scope,
            read_write,
            metadata,
            blob,
        }
    }

    pub fn scope(&self) -> TxnScope {
        self.scope
    }

    pub fn is_read_write(&self) -> bool {
        self.read_write
    }

    /// Connection of the metadata transaction, for reads
    pub fn metadata(&mut self) -> IndexerResult<&mut SqliteConnection> {
        match self.metadata.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(IndexerError::StoreIo(format!(
                "{:?} transaction has no metadata store",
                self.scope
            ))),
        }
    }

    /// Connection of the metadata transaction, for writes
    pub fn metadata_writer(&mut self) -> IndexerResult<&mut SqliteConnection> {
        self.check_writable()?;
        self.metadata()
    }

    /// Pending blob writes
    pub fn blob(&mut self) -> IndexerResult<&mut BlobBatch> {
        self.check_writable()?;
        let scope = self.scope;
        self.blob
            .as_mut()
            .ok_or_else(|| IndexerError::StoreIo(format!("{scope:?} transaction has no blob store")))
    }

    fn check_writable(&self) -> IndexerResult<()> {
        if self.read_write {
            Ok(())
        } else {
            Err(IndexerError::StoreIo("write attempted on a read-only transaction".to_string()))
        }
    }

    /// Commit metadata, then blob
    pub async fn commit(mut self) -> IndexerResult<()> {
        if !self.read_write {
            self.discard().await;
            return Ok(());
        }
        if let Some(tx) = self.metadata.take() {
            tx.commit().await.map_err(sql_error)?;
        }
        if let Some(batch) = self.blob.take() {
            batch.commit()?;
        }
        Ok(())
    }

    pub async fn rollback(mut self) {
        self.blob = None;
        if let Some(tx) = self.metadata.take() {
            if let Err(e) = tx.rollback().await {
                warn!("Metadata rollback failed: {e}");
            }
        }
    }

    /// Release a read-only handle
    pub async fn discard(self) {
        self.rollback().await
    }
}
