//! SQLite metadata store: the normalized transaction model plus UTxO lifecycle

use crate::{
    schema, sql_error,
    txn::{StoreTxn, TxnScope},
};
use andamio_common::{
    model::{Asset, Datum, Transaction},
    Hash, IndexerError, IndexerResult, TxHash, UtxoRef,
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqliteConnection, SqlitePool,
};
use std::{path::Path, time::Duration};
use tracing::{debug, info, instrument};

const MAX_CONNECTIONS: u32 = 8;

/// Rows removed by a rollback, whose blobs must be removed as well
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolledBack {
    pub tx_hashes: Vec<TxHash>,
    pub utxos: Vec<UtxoRef>,
}

#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

pub(crate) fn to_i64(value: u64, field: &str) -> IndexerResult<i64> {
    i64::try_from(value)
        .map_err(|_| IndexerError::Integrity(format!("{field} {value} exceeds storable range")))
}

pub(crate) fn to_u64(value: i64, field: &str) -> IndexerResult<u64> {
    u64::try_from(value)
        .map_err(|_| IndexerError::Serialization(format!("{field} is negative: {value}")))
}

pub(crate) fn to_hash<const N: usize>(bytes: Vec<u8>, field: &str) -> IndexerResult<Hash<N>> {
    Hash::try_from(bytes).map_err(|v: Vec<u8>| {
        IndexerError::Serialization(format!(
            "{field} has invalid length: expected {N}, got {}",
            v.len()
        ))
    })
}

fn hex_list(items: &[Vec<u8>]) -> IndexerResult<String> {
    Ok(serde_json::to_string(&items.iter().map(hex::encode).collect::<Vec<_>>())?)
}

impl MetadataStore {
    #[instrument(skip_all)]
    pub async fn open(path: &Path) -> IndexerResult<Self> {
        info!("Opening metadata store at {}", path.display());
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| IndexerError::StoreOpen(format!("metadata store {}: {e}", path.display())))?;

        let applied = schema::migrate(&pool).await?;
        debug!(applied, "Metadata schema up to date");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a metadata-only unified transaction
    pub async fn begin(&self, read_write: bool) -> IndexerResult<StoreTxn> {
        let tx = self.pool.begin().await.map_err(sql_error)?;
        Ok(StoreTxn::new(TxnScope::MetadataOnly, read_write, Some(tx), None))
    }

    pub(crate) async fn begin_raw(&self) -> IndexerResult<sqlx::Transaction<'static, sqlx::Sqlite>> {
        self.pool.begin().await.map_err(sql_error)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Write the transaction aggregate; every statement is an upsert
    pub async fn persist_transaction(
        &self,
        txn: Option<&mut StoreTxn>,
        tx: &Transaction,
    ) -> IndexerResult<()> {
        match txn {
            Some(txn) => insert_transaction(txn.metadata_writer()?, tx).await,
            None => {
                let mut txn = self.begin(true).await?;
                insert_transaction(txn.metadata_writer()?, tx).await?;
                txn.commit().await
            }
        }
    }

    /// Delete everything created after `slot`.
    ///
    /// Transactions cascade to their children; lifecycle rows of outputs added
    /// after `slot` go with their outputs.
    pub async fn utxos_delete_rolledback(
        &self,
        txn: Option<&mut StoreTxn>,
        slot: u64,
    ) -> IndexerResult<RolledBack> {
        match txn {
            Some(txn) => delete_rolledback(txn.metadata_writer()?, slot).await,
            None => {
                let mut txn = self.begin(true).await?;
                let removed = delete_rolledback(txn.metadata_writer()?, slot).await?;
                txn.commit().await?;
                Ok(removed)
            }
        }
    }

    /// Mark outputs consumed after `slot` as live again
    pub async fn utxos_unspend(&self, txn: Option<&mut StoreTxn>, slot: u64) -> IndexerResult<u64> {
        match txn {
            Some(txn) => unspend(txn.metadata_writer()?, slot).await,
            None => {
                let mut txn = self.begin(true).await?;
                let count = unspend(txn.metadata_writer()?, slot).await?;
                txn.commit().await?;
                Ok(count)
            }
        }
    }

    /// Drop lifecycle rows of outputs consumed before `before_slot`
    pub async fn utxos_delete_consumed(
        &self,
        txn: Option<&mut StoreTxn>,
        before_slot: u64,
    ) -> IndexerResult<Vec<UtxoRef>> {
        match txn {
            Some(txn) => delete_consumed(txn.metadata_writer()?, before_slot).await,
            None => {
                let mut txn = self.begin(true).await?;
                let removed = delete_consumed(txn.metadata_writer()?, before_slot).await?;
                txn.commit().await?;
                Ok(removed)
            }
        }
    }

    /// Returns false if the address was already tracked
    pub async fn add_tracked_address(
        &self,
        txn: Option<&mut StoreTxn>,
        address: &str,
    ) -> IndexerResult<bool> {
        if address.is_empty() {
            return Err(IndexerError::Integrity("tracked address must not be empty".to_string()));
        }
        let query = sqlx::query("INSERT INTO tracked_addresses (address) VALUES (?) ON CONFLICT DO NOTHING")
            .bind(address);
        let result = match txn {
            Some(txn) => query.execute(txn.metadata_writer()?).await,
            None => query.execute(&self.pool).await,
        }
        .map_err(sql_error)?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns false if the address was not tracked
    pub async fn remove_tracked_address(
        &self,
        txn: Option<&mut StoreTxn>,
        address: &str,
    ) -> IndexerResult<bool> {
        let query = sqlx::query("DELETE FROM tracked_addresses WHERE address = ?").bind(address);
        let result = match txn {
            Some(txn) => query.execute(txn.metadata_writer()?).await,
            None => query.execute(&self.pool).await,
        }
        .map_err(sql_error)?;
        Ok(result.rows_affected() > 0)
    }

    /// Reclaim space and refresh planner statistics
    pub async fn compact(&self) -> IndexerResult<()> {
        sqlx::query("VACUUM").execute(&self.pool).await.map_err(sql_error)?;
        sqlx::query("PRAGMA optimize").execute(&self.pool).await.map_err(sql_error)?;
        Ok(())
    }
}

async fn insert_transaction(conn: &mut SqliteConnection, tx: &Transaction) -> IndexerResult<()> {
    let slot = to_i64(tx.slot_number, "slot_number")?;

    sqlx::query(
        r#"
        INSERT INTO transactions (
            tx_hash, block_hash, block_number, slot_number, fee, ttl,
            metadata, withdrawals, certificates
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (tx_hash) DO UPDATE SET
            block_hash = excluded.block_hash,
            block_number = excluded.block_number,
            slot_number = excluded.slot_number,
            fee = excluded.fee,
            ttl = excluded.ttl,
            metadata = excluded.metadata,
            withdrawals = excluded.withdrawals,
            certificates = excluded.certificates
        "#,
    )
    .bind(tx.tx_hash.as_ref())
    .bind(tx.block_hash.as_ref())
    .bind(to_i64(tx.block_number, "block_number")?)
    .bind(slot)
    .bind(to_i64(tx.fee, "fee")?)
    .bind(tx.ttl.map(|ttl| to_i64(ttl, "ttl")).transpose()?)
    .bind(tx.metadata.as_deref())
    .bind(serde_json::to_string(&tx.withdrawals)?)
    .bind(hex_list(&tx.certificates)?)
    .execute(&mut *conn)
    .await
    .map_err(sql_error)?;

    for input in &tx.inputs {
        sqlx::query(
            r#"
            INSERT INTO transaction_inputs (tx_hash, utxo_id, utxo_index, address, amount, datum_hash)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (tx_hash, utxo_id, utxo_index) DO UPDATE SET
                address = excluded.address,
                amount = excluded.amount,
                datum_hash = excluded.datum_hash
            "#,
        )
        .bind(tx.tx_hash.as_ref())
        .bind(input.utxo_id.as_ref())
        .bind(input.utxo_index as i64)
        .bind(&input.address)
        .bind(to_i64(input.amount, "input amount")?)
        .bind(input.datum.as_ref().map(|d| d.datum_hash.to_vec()))
        .execute(&mut *conn)
        .await
        .map_err(sql_error)?;

        insert_assets(conn, &tx.tx_hash, &input.assets).await?;
        if let Some(datum) = &input.datum {
            insert_datum(conn, &tx.tx_hash, datum).await?;
        }

        sqlx::query("UPDATE utxo_lifecycle SET deleted_slot = ? WHERE utxo_id = ? AND utxo_index = ?")
            .bind(slot)
            .bind(input.utxo_id.as_ref())
            .bind(input.utxo_index as i64)
            .execute(&mut *conn)
            .await
            .map_err(sql_error)?;
    }

    for output in &tx.outputs {
        sqlx::query(
            r#"
            INSERT INTO transaction_outputs (utxo_id, utxo_index, address, amount, datum_hash)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (utxo_id, utxo_index) DO UPDATE SET
                address = excluded.address,
                amount = excluded.amount,
                datum_hash = excluded.datum_hash
            "#,
        )
        .bind(output.utxo_id.as_ref())
        .bind(output.utxo_index as i64)
        .bind(&output.address)
        .bind(to_i64(output.amount, "output amount")?)
        .bind(output.datum.as_ref().map(|d| d.datum_hash.to_vec()))
        .execute(&mut *conn)
        .await
        .map_err(sql_error)?;

        sqlx::query(
            r#"
            INSERT INTO utxo_lifecycle (utxo_id, utxo_index, added_slot, deleted_slot)
            VALUES (?, ?, ?, 0)
            ON CONFLICT (utxo_id, utxo_index) DO UPDATE SET added_slot = excluded.added_slot
            "#,
        )
        .bind(output.utxo_id.as_ref())
        .bind(output.utxo_index as i64)
        .bind(slot)
        .execute(&mut *conn)
        .await
        .map_err(sql_error)?;

        insert_assets(conn, &tx.tx_hash, &output.assets).await?;
        if let Some(datum) = &output.datum {
            insert_datum(conn, &tx.tx_hash, datum).await?;
        }
    }

    for reference in &tx.reference_inputs {
        sqlx::query(
            r#"
            INSERT INTO reference_inputs (tx_hash, utxo_id, utxo_index)
            VALUES (?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(tx.tx_hash.as_ref())
        .bind(reference.utxo_id.as_ref())
        .bind(reference.utxo_index as i64)
        .execute(&mut *conn)
        .await
        .map_err(sql_error)?;
    }

    let witness = &tx.witness;
    let witness_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO witnesses (tx_hash, plutus_v1_scripts, plutus_v2_scripts, plutus_v3_scripts, plutus_data)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (tx_hash) DO UPDATE SET
            plutus_v1_scripts = excluded.plutus_v1_scripts,
            plutus_v2_scripts = excluded.plutus_v2_scripts,
            plutus_v3_scripts = excluded.plutus_v3_scripts,
            plutus_data = excluded.plutus_data
        RETURNING id
        "#,
    )
    .bind(tx.tx_hash.as_ref())
    .bind(hex_list(&witness.plutus_v1_scripts)?)
    .bind(hex_list(&witness.plutus_v2_scripts)?)
    .bind(hex_list(&witness.plutus_v3_scripts)?)
    .bind(hex_list(&witness.plutus_data)?)
    .fetch_one(&mut *conn)
    .await
    .map_err(sql_error)?;

    for redeemer in &witness.redeemers {
        sqlx::query(
            r#"
            INSERT INTO redeemers (witness_id, tag, idx, cbor)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (witness_id, tag, idx) DO UPDATE SET cbor = excluded.cbor
            "#,
        )
        .bind(witness_id)
        .bind(redeemer.tag.as_str())
        .bind(redeemer.index as i64)
        .bind(&redeemer.cbor)
        .execute(&mut *conn)
        .await
        .map_err(sql_error)?;
    }

    Ok(())
}

// An asset or datum row belongs to the first transaction that wrote it
async fn insert_assets(
    conn: &mut SqliteConnection,
    owner: &TxHash,
    assets: &[Asset],
) -> IndexerResult<()> {
    for asset in assets {
        sqlx::query(
            r#"
            INSERT INTO assets (
                utxo_id, utxo_index, policy_id, name, name_hex, fingerprint, amount, tx_hash
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(asset.utxo_id.as_ref())
        .bind(asset.utxo_index as i64)
        .bind(asset.policy_id.as_ref())
        .bind(&asset.name)
        .bind(&asset.name_hex)
        .bind(&asset.fingerprint)
        .bind(asset.amount.to_string())
        .bind(owner.as_ref())
        .execute(&mut *conn)
        .await
        .map_err(sql_error)?;
    }
    Ok(())
}

async fn insert_datum(conn: &mut SqliteConnection, owner: &TxHash, datum: &Datum) -> IndexerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO datums (datum_hash, utxo_id, utxo_index, datum_cbor, tx_hash)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (datum_hash) DO UPDATE SET
            datum_cbor = COALESCE(datums.datum_cbor, excluded.datum_cbor)
        "#,
    )
    .bind(datum.datum_hash.as_ref())
    .bind(datum.utxo_id.as_ref())
    .bind(datum.utxo_index as i64)
    .bind(datum.datum_cbor.as_deref())
    .bind(owner.as_ref())
    .execute(&mut *conn)
    .await
    .map_err(sql_error)?;
    Ok(())
}

async fn utxo_refs(
    conn: &mut SqliteConnection,
    sql: &str,
    slot: i64,
) -> IndexerResult<Vec<UtxoRef>> {
    let rows: Vec<(Vec<u8>, i64)> = sqlx::query_as(sql)
        .bind(slot)
        .fetch_all(&mut *conn)
        .await
        .map_err(sql_error)?;
    rows.into_iter()
        .map(|(id, index)| {
            Ok(UtxoRef::new(
                to_hash(id, "utxo_id")?,
                u32::try_from(index)
                    .map_err(|_| IndexerError::Serialization(format!("utxo_index {index}")))?,
            ))
        })
        .collect()
}

async fn delete_rolledback(conn: &mut SqliteConnection, slot: u64) -> IndexerResult<RolledBack> {
    let slot = to_i64(slot, "rollback slot")?;

    let utxos = utxo_refs(
        conn,
        "SELECT utxo_id, utxo_index FROM utxo_lifecycle WHERE added_slot > ?",
        slot,
    )
    .await?;

    let hashes: Vec<Vec<u8>> =
        sqlx::query_scalar("SELECT tx_hash FROM transactions WHERE slot_number > ?")
            .bind(slot)
            .fetch_all(&mut *conn)
            .await
            .map_err(sql_error)?;
    let tx_hashes = hashes
        .into_iter()
        .map(|h| to_hash(h, "tx_hash"))
        .collect::<IndexerResult<Vec<_>>>()?;

    sqlx::query("DELETE FROM utxo_lifecycle WHERE added_slot > ?")
        .bind(slot)
        .execute(&mut *conn)
        .await
        .map_err(sql_error)?;
    sqlx::query("DELETE FROM transactions WHERE slot_number > ?")
        .bind(slot)
        .execute(&mut *conn)
        .await
        .map_err(sql_error)?;

    Ok(RolledBack { tx_hashes, utxos })
}

async fn unspend(conn: &mut SqliteConnection, slot: u64) -> IndexerResult<u64> {
    let result = sqlx::query("UPDATE utxo_lifecycle SET deleted_slot = 0 WHERE deleted_slot > ?")
        .bind(to_i64(slot, "rollback slot")?)
        .execute(&mut *conn)
        .await
        .map_err(sql_error)?;
    Ok(result.rows_affected())
}

async fn delete_consumed(conn: &mut SqliteConnection, before_slot: u64) -> IndexerResult<Vec<UtxoRef>> {
    let before_slot = to_i64(before_slot, "prune slot")?;
    let utxos = utxo_refs(
        conn,
        "SELECT utxo_id, utxo_index FROM utxo_lifecycle WHERE deleted_slot > 0 AND deleted_slot < ?",
        before_slot,
    )
    .await?;
    sqlx::query("DELETE FROM utxo_lifecycle WHERE deleted_slot > 0 AND deleted_slot < ?")
        .bind(before_slot)
        .execute(&mut *conn)
        .await
        .map_err(sql_error)?;
    Ok(utxos)
}
