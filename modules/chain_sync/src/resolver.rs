//! Resolution of transaction inputs to the outputs they spend.
//!
//! Lookups go through a bounded window of outputs seen earlier in the live
//! stream, then through each configured [`UtxoSource`] in order. A source
//! is only asked for the inputs every earlier one left unresolved.

use andamio_codec::decode_output;
use andamio_common::{
    IndexerResult, TransactionContext, TransactionEvent, TxOutputEvent, UtxoRef,
};
use andamio_module_tx_store::{blob_key_utxo, BlobStore};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Default number of outputs kept in the recent window
pub const DEFAULT_RECENT_OUTPUTS: usize = 50_000;

#[async_trait]
pub trait UtxoSource: Send + Sync {
    /// The outputs this source knows among `utxos`; unknown ones are absent
    async fn lookup(&self, utxos: &[UtxoRef]) -> IndexerResult<HashMap<UtxoRef, TxOutputEvent>>;
}

/// Raw output encodings persisted by the store
pub struct BlobUtxoSource {
    blob: BlobStore,
}

impl BlobUtxoSource {
    pub fn new(blob: BlobStore) -> Self {
        Self { blob }
    }
}

#[async_trait]
impl UtxoSource for BlobUtxoSource {
    async fn lookup(&self, utxos: &[UtxoRef]) -> IndexerResult<HashMap<UtxoRef, TxOutputEvent>> {
        let mut found = HashMap::new();
        for utxo in utxos {
            if let Some(cbor) = self.blob.get(&blob_key_utxo(&utxo.tx_hash, utxo.index))? {
                found.insert(*utxo, decode_output(&cbor)?);
            }
        }
        Ok(found)
    }
}

/// Outputs of recently streamed transactions, oldest evicted first
pub struct RecentOutputs {
    capacity: usize,
    outputs: HashMap<UtxoRef, TxOutputEvent>,
    order: VecDeque<(u64, UtxoRef)>,
}

impl RecentOutputs {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            outputs: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, slot: u64, utxo: UtxoRef, output: TxOutputEvent) {
        if self.outputs.insert(utxo, output).is_none() {
            self.order.push_back((slot, utxo));
        }
        while self.order.len() > self.capacity {
            if let Some((_, oldest)) = self.order.pop_front() {
                self.outputs.remove(&oldest);
            }
        }
    }

    pub fn get(&self, utxo: &UtxoRef) -> Option<&TxOutputEvent> {
        self.outputs.get(utxo)
    }

    /// Forget outputs created after `slot`
    pub fn rollback(&mut self, slot: u64) {
        while let Some((added, utxo)) = self.order.back().copied() {
            if added <= slot {
                break;
            }
            self.order.pop_back();
            self.outputs.remove(&utxo);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

pub struct UtxoResolver {
    recent: RecentOutputs,
    sources: Vec<Box<dyn UtxoSource>>,
}

impl UtxoResolver {
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            recent: RecentOutputs::new(recent_capacity),
            sources: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: impl UtxoSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Resolve `utxos`, asking the sources in order for whatever is still
    /// missing. The result holds only the inputs that were found.
    pub async fn resolve(
        &self,
        utxos: &[UtxoRef],
    ) -> IndexerResult<HashMap<UtxoRef, TxOutputEvent>> {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        for utxo in utxos {
            match self.recent.get(utxo) {
                Some(output) => {
                    found.insert(*utxo, output.clone());
                }
                None => missing.push(*utxo),
            }
        }
        for source in &self.sources {
            if missing.is_empty() {
                break;
            }
            let resolved = source.lookup(&missing).await?;
            missing.retain(|utxo| !resolved.contains_key(utxo));
            found.extend(resolved);
        }
        Ok(found)
    }

    /// Fill `resolved_inputs` of each transaction in block order, then
    /// remember its outputs so later transactions can spend them.
    /// Unresolvable inputs are left out. Returns how many there were.
    pub async fn resolve_block(
        &mut self,
        slot: u64,
        transactions: &mut [(TransactionEvent, TransactionContext)],
    ) -> IndexerResult<usize> {
        let mut unresolved = 0;
        for (tx, _) in transactions.iter_mut() {
            let mut found = self.resolve(&tx.inputs).await?;
            tx.resolved_inputs.clear();
            for input in &tx.inputs {
                match found.remove(input) {
                    Some(output) => tx.resolved_inputs.push(output),
                    None => {
                        debug!(tx = %tx.tx_hash, input = %input, "Input not resolved");
                        unresolved += 1;
                    }
                }
            }
            for (index, output) in tx.outputs.iter().enumerate() {
                self.recent
                    .insert(slot, UtxoRef::new(tx.tx_hash, index as u32), output.clone());
            }
        }
        Ok(unresolved)
    }

    pub fn rollback(&mut self, slot: u64) {
        self.recent.rollback(slot);
    }
}
