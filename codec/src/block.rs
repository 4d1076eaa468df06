use crate::{tx::map_transaction, utils::to_hash};
use andamio_common::{
    BlockHash, ChainSyncStatus, IndexerError, IndexerResult, TransactionContext, TransactionEvent,
};
use pallas_traverse::MultiEraBlock;

/// A block mapped into its status notification and transaction events
#[derive(Debug, Clone)]
pub struct MappedBlock {
    pub status: ChainSyncStatus,
    pub transactions: Vec<(TransactionEvent, TransactionContext)>,
}

pub fn decode_block(cbor: &[u8]) -> IndexerResult<MappedBlock> {
    let block = MultiEraBlock::decode(cbor)
        .map_err(|e| IndexerError::Serialization(format!("cannot decode block: {e}")))?;
    Ok(map_block(&block))
}

/// Map every transaction of a block, in block order.
///
/// A transaction that cannot be mapped is logged and left out.
pub fn map_block(block: &MultiEraBlock) -> MappedBlock {
    let block_hash: BlockHash = to_hash(&block.hash());
    let status = ChainSyncStatus {
        slot: block.slot(),
        block_hash,
        block_number: block.number(),
    };

    let mut transactions = Vec::new();
    for tx in block.txs() {
        match map_transaction(&tx, block_hash) {
            Ok(event) => {
                let context = TransactionContext {
                    block_number: status.block_number,
                    slot_number: status.slot,
                    transaction_hash: event.tx_hash,
                };
                transactions.push((event, context));
            }
            Err(e) => tracing::error!(
                slot = status.slot,
                block = %block_hash,
                tx = %to_hash(&tx.hash()),
                "Skipping transaction: {e}"
            ),
        }
    }

    MappedBlock {
        status,
        transactions,
    }
}
