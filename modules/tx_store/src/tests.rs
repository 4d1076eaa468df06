use super::*;
use andamio_common::{
    model::{Asset, Datum, Redeemer, SimpleUtxo, TransactionInput, TransactionOutput, Witness},
    BlockHash, DatumHash, IndexerError, PolicyId, RedeemerTag, TxHash, UtxoRef,
};
use std::collections::BTreeMap;
use tempfile::TempDir;

const ALICE: &str = "addr_test1alice";
const BOB: &str = "addr_test1bob";

fn hash(byte: u8) -> TxHash {
    TxHash::new([byte; 32])
}

fn asset(utxo_id: TxHash, utxo_index: u32, amount: u64) -> Asset {
    Asset {
        utxo_id,
        utxo_index,
        name: "ATADAcoin".to_string(),
        name_hex: hex::encode("ATADAcoin"),
        policy_id: PolicyId::new([0x34; 28]),
        fingerprint: "asset1test".to_string(),
        amount,
    }
}

fn output(tx_hash: TxHash, index: u32, address: &str, amount: u64) -> TransactionOutput {
    TransactionOutput {
        utxo_id: tx_hash,
        utxo_index: index,
        address: address.to_string(),
        amount,
        assets: Vec::new(),
        datum: None,
        cbor: vec![0x82, index as u8],
    }
}

fn transaction(tx_hash: TxHash, slot: u64, outputs: Vec<TransactionOutput>) -> Transaction {
    Transaction {
        tx_hash,
        block_hash: BlockHash::new([slot as u8; 32]),
        block_number: slot / 20,
        slot_number: slot,
        fee: 170_000,
        ttl: Some(slot + 7200),
        metadata: None,
        withdrawals: BTreeMap::new(),
        certificates: Vec::new(),
        inputs: Vec::new(),
        outputs,
        reference_inputs: Vec::new(),
        witness: Witness {
            tx_hash,
            ..Default::default()
        },
        cbor: vec![0x84, 0xa0],
    }
}

fn spend(tx_hash: TxHash, slot: u64, source: &TransactionOutput) -> Transaction {
    let mut tx = transaction(tx_hash, slot, vec![output(tx_hash, 0, BOB, source.amount - 170_000)]);
    tx.inputs.push(TransactionInput {
        tx_hash,
        utxo_id: source.utxo_id,
        utxo_index: source.utxo_index,
        address: source.address.clone(),
        amount: source.amount,
        assets: source.assets.clone(),
        datum: source.datum.clone(),
        cbor: source.cbor.clone(),
    });
    tx
}

async fn open() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("db")).await.unwrap();
    (dir, db)
}

async fn count(db: &Database, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(db.metadata().pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn should_persist_and_read_full_aggregate() {
    let (_dir, db) = open().await;
    let tx_hash = hash(0x01);
    let datum_hash = DatumHash::new([0xdd; 32]);

    let mut out = output(tx_hash, 0, ALICE, 5_000_000);
    out.assets.push(asset(tx_hash, 0, 21414));
    out.datum = Some(Datum {
        utxo_id: tx_hash,
        utxo_index: 0,
        datum_hash,
        datum_cbor: Some(vec![0xd8, 0x79, 0x80]),
    });
    let mut tx = transaction(tx_hash, 100, vec![out, output(tx_hash, 1, BOB, 2_000_000)]);
    tx.metadata = Some(vec![0xa1, 0x01, 0x02]);
    tx.withdrawals.insert("stake_test1xyz".to_string(), 42);
    tx.certificates.push(vec![0x82, 0x00]);
    tx.reference_inputs.push(SimpleUtxo {
        tx_hash,
        utxo_id: hash(0x99),
        utxo_index: 3,
    });
    tx.witness.plutus_v2_scripts.push(vec![0x4e, 0x01]);
    tx.witness.redeemers.push(Redeemer {
        tag: RedeemerTag::Spend,
        index: 0,
        cbor: vec![0x80],
    });

    db.persist_transaction(None, &tx).await.unwrap();

    let mut read = db.read().await.unwrap();
    let stored = db.metadata().transaction(&mut read, &tx_hash).await.unwrap().unwrap();
    let redeemer = db
        .metadata()
        .redeemer(&mut read, &tx_hash, RedeemerTag::Spend, 0)
        .await
        .unwrap();
    let datum = db.metadata().datum(&mut read, &datum_hash).await.unwrap().unwrap();
    read.discard().await;

    let expected = Transaction {
        cbor: Vec::new(),
        outputs: tx
            .outputs
            .iter()
            .cloned()
            .map(|o| TransactionOutput { cbor: Vec::new(), ..o })
            .collect(),
        ..tx.clone()
    };
    assert_eq!(stored, expected);
    assert_eq!(redeemer.unwrap().cbor, vec![0x80]);
    assert_eq!(datum.datum_cbor, Some(vec![0xd8, 0x79, 0x80]));

    assert_eq!(db.blob().get(&blob_key_tx(&tx_hash)).unwrap(), Some(tx.cbor.clone()));
    assert_eq!(db.blob().get(&blob_key_utxo(&tx_hash, 1)).unwrap(), Some(vec![0x82, 1]));
}

#[tokio::test]
async fn should_keep_input_encodings() {
    let (_dir, db) = open().await;
    // Spends an output the store never saw
    let mut unseen = output(hash(0x70), 2, ALICE, 4_000_000);
    unseen.cbor = vec![0x82, 0x58, 0x1d, 0x70];
    let spending = spend(hash(0x71), 40, &unseen);
    db.persist_transaction(None, &spending).await.unwrap();

    assert_eq!(db.blob().get(&blob_key_utxo(&hash(0x70), 2)).unwrap(), Some(unseen.cbor.clone()));

    let mut read = db.read().await.unwrap();
    let stored = db.transaction(&mut read, &hash(0x71)).await.unwrap().unwrap();
    read.discard().await;
    assert_eq!(stored.inputs.len(), 1);
    assert_eq!(stored.inputs[0].cbor, unseen.cbor);
    assert_eq!(stored.outputs[0].cbor, spending.outputs[0].cbor);
    assert_eq!(stored.cbor, spending.cbor);
}

#[tokio::test]
async fn should_not_overwrite_stored_output_encoding() {
    let (_dir, db) = open().await;
    let funding = transaction(hash(0x72), 10, vec![output(hash(0x72), 0, ALICE, 3_000_000)]);
    db.persist_transaction(None, &funding).await.unwrap();

    let mut spending = spend(hash(0x73), 20, &funding.outputs[0]);
    spending.inputs[0].cbor = vec![0xff];
    db.persist_transaction(None, &spending).await.unwrap();

    assert_eq!(
        db.blob().get(&blob_key_utxo(&hash(0x72), 0)).unwrap(),
        Some(funding.outputs[0].cbor.clone())
    );
}

#[tokio::test]
async fn should_be_idempotent_on_repersist() {
    let (_dir, db) = open().await;
    let tx_hash = hash(0x02);
    let mut out = output(tx_hash, 0, ALICE, 1_000_000);
    out.assets.push(asset(tx_hash, 0, 5));
    let tx = transaction(tx_hash, 10, vec![out]);

    db.persist_transaction(None, &tx).await.unwrap();
    db.persist_transaction(None, &tx).await.unwrap();

    assert_eq!(count(&db, "transactions").await, 1);
    assert_eq!(count(&db, "transaction_outputs").await, 1);
    assert_eq!(count(&db, "assets").await, 1);
    assert_eq!(count(&db, "witnesses").await, 1);
    assert_eq!(count(&db, "utxo_lifecycle").await, 1);
}

#[tokio::test]
async fn should_track_spent_outputs() {
    let (_dir, db) = open().await;
    let funding = transaction(hash(0x03), 10, vec![output(hash(0x03), 0, ALICE, 3_000_000)]);
    db.persist_transaction(None, &funding).await.unwrap();

    let mut read = db.read().await.unwrap();
    let live = db.metadata().live_utxos_by_address(&mut read, ALICE, Page::new(10, 0)).await.unwrap();
    read.discard().await;
    assert_eq!(live.len(), 1);

    let spending = spend(hash(0x04), 20, &funding.outputs[0]);
    db.persist_transaction(None, &spending).await.unwrap();

    let mut read = db.read().await.unwrap();
    let live = db.metadata().live_utxos_by_address(&mut read, ALICE, Page::new(10, 0)).await.unwrap();
    let entry = db
        .metadata()
        .utxo(&mut read, &UtxoRef::new(hash(0x03), 0))
        .await
        .unwrap()
        .unwrap();
    let history = db
        .metadata()
        .transactions_by_address(&mut read, ALICE, Page::new(10, 0))
        .await
        .unwrap();
    read.discard().await;

    assert!(live.is_empty());
    assert_eq!(entry.added_slot, Some(10));
    assert_eq!(entry.spent_slot, Some(20));
    let hashes: Vec<TxHash> = history.iter().map(|t| t.tx_hash).collect();
    assert_eq!(hashes, vec![hash(0x03), hash(0x04)]);
}

#[tokio::test]
async fn should_roll_back_both_stores() {
    let (_dir, db) = open().await;
    let funding = transaction(hash(0x05), 10, vec![output(hash(0x05), 0, ALICE, 3_000_000)]);
    let spending = spend(hash(0x06), 30, &funding.outputs[0]);
    db.persist_transaction(None, &funding).await.unwrap();
    db.persist_transaction(None, &spending).await.unwrap();

    let mut txn = db.begin(TxnScope::Full, true).await.unwrap();
    let removed = db.rollback_to(&mut txn, 20).await.unwrap();
    txn.commit().await.unwrap();

    assert_eq!(removed.tx_hashes, vec![hash(0x06)]);
    assert_eq!(removed.utxos, vec![UtxoRef::new(hash(0x06), 0)]);
    assert_eq!(count(&db, "transactions").await, 1);
    assert_eq!(count(&db, "transaction_inputs").await, 0);
    assert_eq!(db.blob().get(&blob_key_tx(&hash(0x06))).unwrap(), None);
    assert_eq!(db.blob().get(&blob_key_utxo(&hash(0x06), 0)).unwrap(), None);
    assert!(db.blob().contains(&blob_key_utxo(&hash(0x05), 0)).unwrap());

    let mut read = db.read().await.unwrap();
    let live = db.metadata().live_utxos_by_address(&mut read, ALICE, Page::new(10, 0)).await.unwrap();
    read.discard().await;
    assert_eq!(live.len(), 1);
}

#[tokio::test]
async fn should_discard_uncommitted_handle() {
    let (_dir, db) = open().await;
    let tx = transaction(hash(0x07), 10, vec![output(hash(0x07), 0, ALICE, 1_000_000)]);
    {
        let mut txn = db.begin(TxnScope::Full, true).await.unwrap();
        db.persist_transaction(Some(&mut txn), &tx).await.unwrap();
        db.cursor().update(Some(&mut txn), 10, tx.block_hash).unwrap();
    }

    assert_eq!(count(&db, "transactions").await, 0);
    assert_eq!(db.blob().get(&blob_key_tx(&hash(0x07))).unwrap(), None);
    assert_eq!(db.cursor().get().unwrap(), None);
}

#[tokio::test]
async fn should_refuse_writes_on_read_only_handle() {
    let (_dir, db) = open().await;
    let tx = transaction(hash(0x08), 10, Vec::new());
    let mut read = db.read().await.unwrap();
    let result = db.metadata().persist_transaction(Some(&mut read), &tx).await;
    assert!(matches!(result, Err(IndexerError::StoreIo(_))));
}

#[tokio::test]
async fn should_reject_input_without_address() {
    let (_dir, db) = open().await;
    let source = output(hash(0x09), 0, "", 1_000_000);
    let tx = spend(hash(0x0a), 10, &source);
    let result = db.persist_transaction(None, &tx).await;
    assert!(matches!(result, Err(IndexerError::Integrity(_))));
    assert_eq!(count(&db, "transactions").await, 0);
}

#[tokio::test]
async fn should_manage_tracked_addresses() {
    let (_dir, db) = open().await;
    let store = db.metadata();
    assert!(store.add_tracked_address(None, ALICE).await.unwrap());
    assert!(!store.add_tracked_address(None, ALICE).await.unwrap());
    assert!(matches!(
        store.add_tracked_address(None, "").await,
        Err(IndexerError::Integrity(_))
    ));

    let mut read = db.read().await.unwrap();
    assert_eq!(store.tracked_addresses(&mut read).await.unwrap(), vec![ALICE.to_string()]);
    read.discard().await;

    assert!(store.remove_tracked_address(None, ALICE).await.unwrap());
    assert!(!store.remove_tracked_address(None, ALICE).await.unwrap());
}

#[tokio::test]
async fn should_compute_metrics_with_exclusions() {
    let (_dir, db) = open().await;
    let mut out = output(hash(0x0b), 0, ALICE, 1_000_000);
    out.assets.push(asset(hash(0x0b), 0, 1));
    let tx1 = transaction(hash(0x0b), 10, vec![out, output(hash(0x0b), 1, BOB, 1)]);
    let tx2 = transaction(hash(0x0c), 11, vec![output(hash(0x0c), 0, BOB, 2)]);
    db.persist_transaction(None, &tx1).await.unwrap();
    db.persist_transaction(None, &tx2).await.unwrap();

    let mut read = db.read().await.unwrap();
    let all = db.metadata().metrics(&mut read, &[]).await.unwrap();
    let excluded = db.metadata().metrics(&mut read, &[BOB.to_string()]).await.unwrap();
    read.discard().await;

    assert_eq!(all.distinct_addresses, 2);
    assert_eq!(all.transaction_count, 2);
    assert_eq!(all.total_fees, 340_000);
    assert_eq!(all.distinct_assets, 1);
    assert_eq!(excluded.distinct_addresses, 1);
}

#[tokio::test]
async fn should_page_slot_range() {
    let (_dir, db) = open().await;
    for (i, slot) in [10u64, 20, 30, 40].into_iter().enumerate() {
        let tx_hash = hash(0x20 + i as u8);
        db.persist_transaction(None, &transaction(tx_hash, slot, Vec::new())).await.unwrap();
    }

    let mut read = db.read().await.unwrap();
    let page = db
        .metadata()
        .transactions_by_slot_range(&mut read, 15, 40, Page::new(2, 1))
        .await
        .unwrap();
    read.discard().await;

    let slots: Vec<u64> = page.iter().map(|t| t.slot_number).collect();
    assert_eq!(slots, vec![30, 40]);
}

#[tokio::test]
async fn should_prune_consumed_outputs() {
    let (_dir, db) = open().await;
    let funding = transaction(hash(0x0d), 100, vec![output(hash(0x0d), 0, ALICE, 3_000_000)]);
    let spending = spend(hash(0x0e), 200, &funding.outputs[0]);
    db.persist_transaction(None, &funding).await.unwrap();
    db.persist_transaction(None, &spending).await.unwrap();

    db.cursor().update(None, 250, spending.block_hash).unwrap();
    assert_eq!(housekeeping::prune_consumed(&db, 100).await.unwrap(), 0);

    db.cursor().update(None, 1000, spending.block_hash).unwrap();
    assert_eq!(housekeeping::prune_consumed(&db, 100).await.unwrap(), 1);
    assert!(!db.blob().contains(&blob_key_utxo(&hash(0x0d), 0)).unwrap());
    assert!(db.blob().contains(&blob_key_utxo(&hash(0x0e), 0)).unwrap());
    assert_eq!(count(&db, "utxo_lifecycle").await, 1);
}

#[tokio::test]
async fn should_not_reapply_migrations() {
    let (_dir, db) = open().await;
    assert_eq!(schema::migrate(db.metadata().pool()).await.unwrap(), 0);
    assert_eq!(count(&db, "schema_migrations").await, schema::MIGRATIONS.len() as i64);
}
