//! Serialized batch persistence.
//!
//! The flush worker owns every write the pipeline makes: batches and chain
//! rollbacks arrive over one channel and are applied strictly in order.

use crate::{buffer::Entry, normalizer::normalize};
use andamio_common::{IndexerError, IndexerResult, Point};
use andamio_module_tx_store::{cursor_store::CURSOR_KEY, Database, TxnScope};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

pub enum FlushCommand {
    Batch {
        entries: Vec<Entry>,
        done: oneshot::Sender<IndexerResult<usize>>,
    },
    Rollback {
        point: Point,
        done: oneshot::Sender<IndexerResult<()>>,
    },
}

/// Persist one batch under a single unified transaction, moving the cursor
/// to the highest point the batch holds. Every per-transaction failure is
/// logged; the first one aborts the batch.
pub async fn process_batch(db: &Database, entries: Vec<Entry>) -> IndexerResult<usize> {
    let points = entries.iter().map(|(event, context)| (context.slot_number, event.block_hash));
    let Some((cursor_slot, cursor_hash)) = points.clone().max() else {
        return Ok(0);
    };
    let first_slot = points.map(|(slot, _)| slot).min().unwrap_or(cursor_slot);
    let started = Instant::now();

    let mut txn = db.begin(TxnScope::Full, true).await?;
    let mut first_error: Option<IndexerError> = None;
    for (event, context) in &entries {
        let persisted = match normalize(event, context) {
            Ok(tx) => db.persist_transaction(Some(&mut txn), &tx).await,
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            error!(tx = %event.tx_hash, slot = context.slot_number, "Cannot persist transaction: {e}");
            first_error.get_or_insert(e);
        }
    }

    if first_error.is_none() {
        if let Err(e) = db.cursor().update(Some(&mut txn), cursor_slot, cursor_hash) {
            first_error = Some(e);
        }
    }

    if let Some(e) = first_error {
        txn.rollback().await;
        error!(count = entries.len(), first_slot, last_slot = cursor_slot, "Batch rolled back: {e}");
        return Err(e);
    }

    txn.commit().await?;
    info!(
        count = entries.len(),
        first_slot,
        last_slot = cursor_slot,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Batch committed"
    );
    Ok(entries.len())
}

/// Undo everything after `point` and move the cursor back to it
pub async fn apply_rollback(db: &Database, point: &Point) -> IndexerResult<()> {
    let slot = point.slot();
    let mut txn = db.begin(TxnScope::Full, true).await?;
    db.rollback_to(&mut txn, slot).await?;

    let behind = db.cursor().get()?.is_some_and(|cursor| cursor.slot_number > slot);
    if behind {
        match point {
            Point::Specific { slot, hash } => db.cursor().update(Some(&mut txn), *slot, *hash)?,
            Point::Origin => db.blob().delete(Some(&mut txn), CURSOR_KEY)?,
        }
    }
    txn.commit().await?;
    info!("Rolled back to {point}");
    Ok(())
}

pub struct FlushWorker {
    db: Database,
    commands: mpsc::Receiver<FlushCommand>,
}

impl FlushWorker {
    pub fn new(db: Database, commands: mpsc::Receiver<FlushCommand>) -> Self {
        Self { db, commands }
    }

    /// Apply commands until the sending side closes. A failed batch is
    /// reported back with its cursor unmoved; a failed rollback stops the
    /// worker.
    pub async fn run(mut self) -> IndexerResult<()> {
        while let Some(command) = self.commands.recv().await {
            match command {
                FlushCommand::Batch { entries, done } => {
                    let result = process_batch(&self.db, entries).await;
                    let _ = done.send(result);
                }
                FlushCommand::Rollback { point, done } => {
                    let result = apply_rollback(&self.db, &point).await;
                    let failed = result.clone().err();
                    let _ = done.send(result);
                    if let Some(e) = failed {
                        error!("Rollback to {point} failed: {e}");
                        return Err(e);
                    }
                }
            }
        }
        debug!("Flush worker stopped");
        Ok(())
    }
}
