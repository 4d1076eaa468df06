//! Input resolution against the node's own ledger state, over the
//! node-to-client LocalStateQuery protocol.

use crate::resolver::UtxoSource;
use andamio_codec::{decode_output, to_cbor, to_hash};
use andamio_common::{IndexerError, IndexerResult, TxOutputEvent, UtxoRef};
use async_trait::async_trait;
use pallas::{
    crypto::hash::Hash,
    network::{
        facades::NodeClient,
        miniprotocols::localstate::{
            queries_v16::{self, TransactionInput, TxIns, UTxOByTxin},
            ClientError,
        },
    },
};
use std::{collections::HashMap, path::PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

fn query_error(context: &'static str) -> impl Fn(ClientError) -> IndexerError {
    move |e| IndexerError::ChainSync(format!("local state query, {context}: {e}"))
}

/// Looks up unspent outputs by reference in the node's current ledger.
///
/// The connection is opened on first use and dropped after any failure, so
/// the next lookup reconnects.
pub struct NodeUtxoSource {
    socket_path: PathBuf,
    magic: u64,
    client: Mutex<Option<NodeClient>>,
}

impl NodeUtxoSource {
    pub fn new(socket_path: impl Into<PathBuf>, magic: u64) -> Self {
        Self {
            socket_path: socket_path.into(),
            magic,
            client: Mutex::new(None),
        }
    }

    async fn connect(&self) -> IndexerResult<NodeClient> {
        info!(socket = %self.socket_path.display(), "Connecting to node for state queries");
        NodeClient::connect(&self.socket_path, self.magic).await.map_err(|e| {
            IndexerError::ChainSync(format!("connect to {}: {e}", self.socket_path.display()))
        })
    }
}

async fn query_utxos(client: &mut NodeClient, txins: TxIns) -> IndexerResult<UTxOByTxin> {
    let statequery = client.statequery();
    statequery.acquire(None).await.map_err(query_error("acquire"))?;
    let era = queries_v16::get_current_era(statequery)
        .await
        .map_err(query_error("current era"))?;
    let utxos = queries_v16::get_utxo_by_txin(statequery, era, txins)
        .await
        .map_err(query_error("utxo by txin"))?;
    statequery.send_release().await.map_err(query_error("release"))?;
    Ok(utxos)
}

fn wire_input(utxo: &UtxoRef) -> TransactionInput {
    TransactionInput {
        transaction_id: Hash::new(utxo.tx_hash.into_inner()),
        index: u64::from(utxo.index),
    }
}

/// Map the node's answer onto output events through their ledger encoding
fn map_utxos(utxos: UTxOByTxin) -> IndexerResult<HashMap<UtxoRef, TxOutputEvent>> {
    let mut found = HashMap::new();
    for (utxo, output) in utxos.utxo.iter() {
        let index = u32::try_from(u64::from(&utxo.index)).map_err(|_| {
            IndexerError::Serialization(format!("output index of {} out of range", utxo.transaction_id))
        })?;
        let cbor = to_cbor(output, "queried output")?;
        found.insert(UtxoRef::new(to_hash(&utxo.transaction_id), index), decode_output(&cbor)?);
    }
    Ok(found)
}

#[async_trait]
impl UtxoSource for NodeUtxoSource {
    async fn lookup(&self, utxos: &[UtxoRef]) -> IndexerResult<HashMap<UtxoRef, TxOutputEvent>> {
        if utxos.is_empty() {
            return Ok(HashMap::new());
        }

        let mut guard = self.client.lock().await;
        let mut client = match guard.take() {
            Some(client) => client,
            None => self.connect().await?,
        };

        let txins: TxIns = utxos.iter().map(wire_input).collect();
        match query_utxos(&mut client, txins).await {
            Ok(answer) => {
                *guard = Some(client);
                let found = map_utxos(answer)?;
                debug!(asked = utxos.len(), found = found.len(), "Queried node for inputs");
                Ok(found)
            }
            Err(e) => {
                client.abort().await;
                Err(e)
            }
        }
    }
}
