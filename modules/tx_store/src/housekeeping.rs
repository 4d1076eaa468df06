//! Periodic pruning of consumed UTxOs and store compaction

use crate::{blob_key_utxo, txn::TxnScope, Database};
use andamio_common::IndexerResult;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct HousekeepingConfig {
    pub interval: Duration,
    /// Consumed outputs older than this many slots behind the cursor are pruned
    pub prune_after_slots: u64,
}

/// Prune lifecycle rows and raw encodings of outputs consumed before
/// `cursor - prune_after_slots`. Returns the number of pruned outputs.
pub async fn prune_consumed(db: &Database, prune_after_slots: u64) -> IndexerResult<usize> {
    let Some(cursor) = db.cursor().get()? else {
        return Ok(0);
    };
    let before_slot = cursor.slot_number.saturating_sub(prune_after_slots);
    if before_slot == 0 {
        return Ok(0);
    }

    let mut txn = db.begin(TxnScope::Full, true).await?;
    let pruned = db.metadata().utxos_delete_consumed(Some(&mut txn), before_slot).await?;
    for utxo in &pruned {
        db.blob().delete(Some(&mut txn), &blob_key_utxo(&utxo.tx_hash, utxo.index))?;
    }
    txn.commit().await?;
    Ok(pruned.len())
}

/// Run until `shutdown` flips to true
pub async fn run(db: Database, config: HousekeepingConfig, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(config.interval);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match prune_consumed(&db, config.prune_after_slots).await {
                    Ok(0) => debug!("Housekeeping: nothing to prune"),
                    Ok(pruned) => info!(pruned, "Housekeeping pruned consumed UTxOs"),
                    Err(e) => warn!("Housekeeping prune failed: {e}"),
                }
                if let Err(e) = db.metadata().compact().await {
                    warn!("Housekeeping compaction failed: {e}");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Housekeeping stopped");
                    return;
                }
            }
        }
    }
}
