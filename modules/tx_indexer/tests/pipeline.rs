//! End-to-end runs of the ingest pipeline against a scripted chain-sync source

use andamio_common::{
    asset::{AssetMap, PolicyAssets},
    configuration::PlatformConfig,
    model::TransactionSummary,
    BlockHash, ChainSyncEvent, ChainSyncStatus, IndexerError, IndexerResult, Point,
    TransactionContext, TransactionEvent, TxHash, TxOutputEvent, UtxoRef,
};
use andamio_module_chain_sync::ChainSyncSource;
use andamio_module_tx_indexer::{process_batch, BatchBuffer, IngestPipeline, RelevanceCache};
use andamio_module_tx_store::{blob_key_tx, blob_key_utxo, Database, Page};
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
};
use tempfile::TempDir;
use tokio::sync::watch;

const A: &str = "addr_test1qplatform";
const B: &str = "addr_test1qsomeoneelse";

/// Plays back fixed events. Every intersection after the first switches to
/// the next replay, or to nothing once they run out.
struct ScriptedSource {
    events: VecDeque<ChainSyncEvent>,
    replays: VecDeque<Vec<ChainSyncEvent>>,
    intersections: Arc<Mutex<Vec<Option<Point>>>>,
}

impl ScriptedSource {
    fn new(events: Vec<ChainSyncEvent>) -> (Self, Arc<Mutex<Vec<Option<Point>>>>) {
        let intersections = Arc::new(Mutex::new(Vec::new()));
        let source = Self {
            events: events.into(),
            replays: VecDeque::new(),
            intersections: intersections.clone(),
        };
        (source, intersections)
    }

    fn replaying(mut self, events: Vec<ChainSyncEvent>) -> Self {
        self.replays.push_back(events);
        self
    }
}

#[async_trait]
impl ChainSyncSource for ScriptedSource {
    async fn intersect(&mut self, start: Option<Point>) -> IndexerResult<()> {
        let mut intersections = self.intersections.lock().unwrap();
        if !intersections.is_empty() {
            self.events = self.replays.pop_front().unwrap_or_default().into();
        }
        intersections.push(start);
        Ok(())
    }

    async fn next_event(&mut self) -> IndexerResult<Option<ChainSyncEvent>> {
        Ok(self.events.pop_front())
    }
}

fn block_hash(slot: u64) -> BlockHash {
    BlockHash::new([slot as u8; 32])
}

fn output(address: &str, amount: u64) -> TxOutputEvent {
    TxOutputEvent {
        address: address.to_string(),
        amount,
        assets: AssetMap::new(),
        datum: None,
        cbor: vec![0x82, 0x58, 0x1d, amount as u8],
    }
}

fn transaction(hash: u8, slot: u64, outputs: Vec<TxOutputEvent>) -> (TransactionEvent, TransactionContext) {
    let tx_hash = TxHash::new([hash; 32]);
    (
        TransactionEvent {
            tx_hash,
            cbor: vec![0x84, hash],
            inputs: Vec::new(),
            resolved_inputs: Vec::new(),
            outputs,
            reference_inputs: Vec::new(),
            metadata: None,
            fee: 180_000,
            ttl: None,
            withdrawals: BTreeMap::new(),
            witnesses: Default::default(),
            certificates: Vec::new(),
            block_hash: block_hash(slot),
        },
        TransactionContext {
            block_number: slot / 20,
            slot_number: slot,
            transaction_hash: tx_hash,
        },
    )
}

fn in_block(slot: u64, txs: Vec<(TransactionEvent, TransactionContext)>) -> Vec<ChainSyncEvent> {
    let mut events = vec![ChainSyncEvent::Status(ChainSyncStatus {
        slot,
        block_hash: block_hash(slot),
        block_number: slot / 20,
    })];
    events.extend(
        txs.into_iter()
            .map(|(tx, context)| ChainSyncEvent::Transaction(Box::new(tx), context)),
    );
    events
}

fn platform() -> PlatformConfig {
    PlatformConfig {
        addresses: vec![A.to_string()],
        ..Default::default()
    }
}

async fn run(db: &Database, limit: usize, events: Vec<ChainSyncEvent>) -> Vec<Option<Point>> {
    let (source, intersections) = ScriptedSource::new(events);
    run_source(db, limit, source).await;
    let seen = intersections.lock().unwrap().clone();
    seen
}

async fn run_source(db: &Database, limit: usize, source: ScriptedSource) {
    let cache = Arc::new(RelevanceCache::load(db.clone(), platform()).await.unwrap());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    IngestPipeline::new(db.clone(), Box::new(source), cache, limit, None)
        .run(shutdown_rx)
        .await
        .unwrap();
}

async fn stored(db: &Database) -> Vec<TransactionSummary> {
    let mut read = db.read().await.unwrap();
    let txs = db
        .metadata()
        .transactions_by_slot_range(&mut read, 0, 1_000_000, Page::new(100, 0))
        .await
        .unwrap();
    read.discard().await;
    txs
}

async fn open() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).await.unwrap();
    (dir, db)
}

#[tokio::test]
async fn single_transaction_batch() {
    let (_dir, db) = open().await;
    let (tx, context) = transaction(0x01, 500, vec![output(A, 1_500_000)]);
    let tx_hash = tx.tx_hash;
    let output_cbor = tx.outputs[0].cbor.clone();
    let tx_cbor = tx.cbor.clone();

    let intersections = run(&db, 1, in_block(500, vec![(tx, context)])).await;
    assert_eq!(intersections, vec![None]);

    let mut read = db.read().await.unwrap();
    let persisted = db.metadata().transaction(&mut read, &tx_hash).await.unwrap().unwrap();
    read.discard().await;
    assert_eq!(persisted.outputs.len(), 1);
    let out = &persisted.outputs[0];
    assert_eq!((out.utxo_id, out.utxo_index), (tx_hash, 0));
    assert_eq!(out.address, A);
    assert_eq!(out.amount, 1_500_000);
    assert!(out.assets.is_empty());

    let mut utxo_key = vec![0x75];
    utxo_key.extend_from_slice(tx_hash.as_ref());
    utxo_key.extend_from_slice(&[0, 0, 0, 0]);
    assert_eq!(utxo_key, blob_key_utxo(&tx_hash, 0));
    assert_eq!(db.blob().get(&utxo_key).unwrap(), Some(output_cbor));
    assert_eq!(db.blob().get(&blob_key_tx(&tx_hash)).unwrap(), Some(tx_cbor));

    let cursor = db.cursor().get().unwrap().unwrap();
    assert_eq!((cursor.slot_number, cursor.block_hash), (500, block_hash(500)));
}

#[tokio::test]
async fn buffer_evicts_least_recent() {
    let buffer = BatchBuffer::new(3);
    for hash in 1..=4 {
        let (tx, context) = transaction(hash, hash as u64, Vec::new());
        buffer.add(tx, context);
    }
    assert_eq!(buffer.len(), 3);
    let order: Vec<u8> = buffer.drain().iter().map(|(tx, _)| tx.tx_hash[0]).collect();
    assert_eq!(order, vec![2, 3, 4]);
}

#[tokio::test]
async fn buffer_coalesces_by_hash() {
    let buffer = BatchBuffer::new(3);
    let (h1, c1) = transaction(1, 1, Vec::new());
    let (h2, c2) = transaction(2, 2, Vec::new());
    let (mut h1_updated, c1_updated) = transaction(1, 3, Vec::new());
    h1_updated.fee = 999;
    buffer.add(h1, c1);
    buffer.add(h2, c2);
    buffer.add(h1_updated, c1_updated);

    assert_eq!(buffer.len(), 2);
    let drained = buffer.drain();
    assert_eq!(drained[0].0.tx_hash[0], 2);
    assert_eq!((drained[1].0.tx_hash[0], drained[1].0.fee), (1, 999));
}

#[tokio::test]
async fn irrelevant_transaction_is_ignored() {
    let (_dir, db) = open().await;
    let (mut tx, context) = transaction(0x02, 600, vec![output(B, 3_000_000)]);
    tx.resolved_inputs.push(output(B, 3_200_000));
    tx.inputs.push(UtxoRef::new(TxHash::new([0x55; 32]), 0));
    let mut unrelated = AssetMap::new();
    unrelated.insert(
        "34250edd1e9836f5378702fbf9416b709bc140e04f668cc355208518".parse().unwrap(),
        PolicyAssets(BTreeMap::from([(b"ATADAcoin".to_vec(), 1)])),
    );
    tx.outputs[0].assets = unrelated;

    run(&db, 1, in_block(600, vec![(tx, context)])).await;

    assert!(stored(&db).await.is_empty());
    assert_eq!(db.cursor().get().unwrap(), None);
}

#[tokio::test]
async fn inputs_mismatch_rolls_back_batch() {
    let (_dir, db) = open().await;
    let good = transaction(0x03, 700, vec![output(A, 2_000_000)]);
    let (mut bad, bad_context) = transaction(0x04, 701, vec![output(A, 1_000_000)]);
    bad.inputs = vec![
        UtxoRef::new(TxHash::new([0x66; 32]), 0),
        UtxoRef::new(TxHash::new([0x66; 32]), 1),
    ];
    bad.resolved_inputs = vec![output(A, 3_000_000)];
    let bad_hash = bad.tx_hash;

    let result = process_batch(&db, vec![good, (bad, bad_context)]).await;

    assert_eq!(result, Err(IndexerError::InputsMismatch { tx_hash: bad_hash }));
    assert!(stored(&db).await.is_empty());
    assert_eq!(db.cursor().get().unwrap(), None);
}

#[tokio::test]
async fn restart_resumes_from_cursor() {
    let (_dir, db) = open().await;
    let first = transaction(0x05, 800, vec![output(A, 1_500_000)]);
    run(&db, 1, in_block(800, vec![first.clone()])).await;

    let second = transaction(0x06, 820, vec![output(A, 700_000)]);
    let intersections = run(&db, 1, in_block(820, vec![second])).await;

    assert_eq!(
        intersections,
        vec![Some(Point::Specific {
            slot: 800,
            hash: block_hash(800)
        })]
    );
    let slots: Vec<u64> = stored(&db).await.iter().map(|t| t.slot_number).collect();
    assert_eq!(slots, vec![800, 820]);
    assert_eq!(db.cursor().get().unwrap().unwrap().slot_number, 820);
}

#[tokio::test]
async fn rollback_removes_later_transactions() {
    let (_dir, db) = open().await;
    let mut events = in_block(900, vec![transaction(0x07, 900, vec![output(A, 1_000_000)])]);
    events.extend(in_block(940, vec![transaction(0x08, 940, vec![output(A, 2_000_000)])]));
    events.push(ChainSyncEvent::Rollback(Point::Specific {
        slot: 900,
        hash: block_hash(900),
    }));

    run(&db, 1, events).await;

    let slots: Vec<u64> = stored(&db).await.iter().map(|t| t.slot_number).collect();
    assert_eq!(slots, vec![900]);
    assert!(!db.blob().contains(&blob_key_tx(&TxHash::new([0x08; 32]))).unwrap());
    assert_eq!(db.cursor().get().unwrap().unwrap().slot_number, 900);
}

#[tokio::test]
async fn buffered_transactions_flush_on_exit() {
    let (_dir, db) = open().await;
    let events = in_block(
        1000,
        vec![
            transaction(0x09, 1000, vec![output(A, 1)]),
            transaction(0x0a, 1000, vec![output(A, 2)]),
        ],
    );
    run(&db, 10, events).await;
    assert_eq!(stored(&db).await.len(), 2);
}

#[tokio::test]
async fn failed_batch_is_fetched_again() {
    let (_dir, db) = open().await;
    let (mut unresolved, context) = transaction(0x11, 100, vec![output(A, 1_000_000)]);
    unresolved.inputs = vec![UtxoRef::new(TxHash::new([0x77; 32]), 0)];
    let mut resolved = unresolved.clone();
    resolved.resolved_inputs = vec![output(B, 1_200_000)];
    let later = transaction(0x12, 200, vec![output(A, 500_000)]);

    let mut events = in_block(50, vec![transaction(0x10, 50, vec![output(A, 2_000_000)])]);
    events.extend(in_block(100, vec![(unresolved, context.clone())]));
    events.extend(in_block(200, vec![later.clone()]));
    let mut replay = in_block(100, vec![(resolved, context)]);
    replay.extend(in_block(200, vec![later]));

    let (source, intersections) = ScriptedSource::new(events);
    run_source(&db, 1, source.replaying(replay)).await;

    assert_eq!(
        *intersections.lock().unwrap(),
        vec![
            None,
            Some(Point::Specific {
                slot: 50,
                hash: block_hash(50)
            })
        ]
    );
    let slots: Vec<u64> = stored(&db).await.iter().map(|t| t.slot_number).collect();
    assert_eq!(slots, vec![50, 100, 200]);
    assert_eq!(db.cursor().get().unwrap().unwrap().slot_number, 200);
}

#[tokio::test]
async fn failed_batch_never_lets_cursor_pass_it() {
    let (_dir, db) = open().await;
    let (mut unresolved, context) = transaction(0x13, 300, vec![output(A, 1_000_000)]);
    unresolved.inputs = vec![UtxoRef::new(TxHash::new([0x78; 32]), 1)];

    let mut events = in_block(300, vec![(unresolved, context)]);
    events.extend(in_block(400, vec![transaction(0x14, 400, vec![output(A, 700_000)])]));

    // No replay: the refetch from the tip delivers nothing new
    let intersections = run(&db, 1, events).await;

    assert_eq!(intersections, vec![None, None]);
    assert!(stored(&db).await.is_empty());
    assert_eq!(db.cursor().get().unwrap(), None);
}

#[tokio::test]
async fn batch_cursor_takes_highest_point() {
    let (_dir, db) = open().await;
    let later = transaction(0x15, 520, vec![output(A, 1)]);
    let replayed = transaction(0x16, 510, vec![output(A, 2)]);

    process_batch(&db, vec![later, replayed]).await.unwrap();

    let cursor = db.cursor().get().unwrap().unwrap();
    assert_eq!((cursor.slot_number, cursor.block_hash), (520, block_hash(520)));
}
