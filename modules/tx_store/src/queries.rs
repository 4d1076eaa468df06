//! Read queries over the metadata store.
//!
//! All queries run inside a read-only [`StoreTxn`] so that a multi-statement
//! read never observes a partially committed batch.

use crate::{
    metadata_store::{to_hash, to_i64, to_u64, MetadataStore},
    sql_error,
    txn::StoreTxn,
};
use andamio_common::{
    model::{
        Asset, Datum, IndexerMetrics, Redeemer, SimpleUtxo, Transaction, TransactionInput,
        TransactionOutput, TransactionSummary, Witness,
    },
    DatumHash, IndexerError, IndexerResult, PolicyId, RedeemerTag, TxHash, UtxoRef,
};
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};
use std::collections::BTreeMap;

/// `limit`/`offset` pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }
}

/// An output together with its lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UtxoEntry {
    #[serde(flatten)]
    pub output: TransactionOutput,
    pub added_slot: Option<u64>,
    /// Slot of the consuming transaction, if spent
    pub spent_slot: Option<u64>,
}

const TRANSACTION_COLUMNS: &str = "t.tx_hash, t.block_hash, t.block_number, t.slot_number, \
     t.fee, t.ttl, t.metadata, t.withdrawals, t.certificates";

#[derive(FromRow)]
struct TransactionRow {
    tx_hash: Vec<u8>,
    block_hash: Vec<u8>,
    block_number: i64,
    slot_number: i64,
    fee: i64,
    ttl: Option<i64>,
    metadata: Option<Vec<u8>>,
    withdrawals: String,
    certificates: String,
}

impl TransactionRow {
    fn into_summary(self) -> IndexerResult<TransactionSummary> {
        Ok(TransactionSummary {
            tx_hash: to_hash(self.tx_hash, "tx_hash")?,
            block_hash: to_hash(self.block_hash, "block_hash")?,
            block_number: to_u64(self.block_number, "block_number")?,
            slot_number: to_u64(self.slot_number, "slot_number")?,
            fee: to_u64(self.fee, "fee")?,
            ttl: self.ttl.map(|ttl| to_u64(ttl, "ttl")).transpose()?,
            metadata: self.metadata,
            withdrawals: serde_json::from_str::<BTreeMap<String, u64>>(&self.withdrawals)?,
            certificates: from_hex_list(&self.certificates)?,
        })
    }
}

#[derive(FromRow)]
struct OutputRow {
    utxo_id: Vec<u8>,
    utxo_index: i64,
    address: String,
    amount: i64,
    datum_hash: Option<Vec<u8>>,
    datum_cbor: Option<Vec<u8>>,
}

#[derive(FromRow)]
struct InputRow {
    utxo_id: Vec<u8>,
    utxo_index: i64,
    address: String,
    amount: i64,
    datum_hash: Option<Vec<u8>>,
    datum_cbor: Option<Vec<u8>>,
}

#[derive(FromRow)]
struct AssetRow {
    utxo_id: Vec<u8>,
    utxo_index: i64,
    policy_id: Vec<u8>,
    name: String,
    name_hex: String,
    fingerprint: String,
    amount: String,
}

impl AssetRow {
    fn into_asset(self) -> IndexerResult<Asset> {
        Ok(Asset {
            utxo_id: to_hash(self.utxo_id, "utxo_id")?,
            utxo_index: to_index(self.utxo_index)?,
            policy_id: to_hash(self.policy_id, "policy_id")?,
            name: self.name,
            name_hex: self.name_hex,
            fingerprint: self.fingerprint,
            amount: self.amount.parse().map_err(|_| {
                IndexerError::Serialization(format!("asset amount '{}'", self.amount))
            })?,
        })
    }
}

#[derive(FromRow)]
struct WitnessRow {
    id: i64,
    tx_hash: Vec<u8>,
    plutus_v1_scripts: String,
    plutus_v2_scripts: String,
    plutus_v3_scripts: String,
    plutus_data: String,
}

#[derive(FromRow)]
struct RedeemerRow {
    tag: String,
    idx: i64,
    cbor: Vec<u8>,
}

impl RedeemerRow {
    fn into_redeemer(self) -> IndexerResult<Redeemer> {
        Ok(Redeemer {
            tag: self.tag.parse::<RedeemerTag>().map_err(IndexerError::Serialization)?,
            index: to_index(self.idx)?,
            cbor: self.cbor,
        })
    }
}

fn to_index(value: i64) -> IndexerResult<u32> {
    u32::try_from(value).map_err(|_| IndexerError::Serialization(format!("index {value}")))
}

fn from_hex_list(text: &str) -> IndexerResult<Vec<Vec<u8>>> {
    let items: Vec<String> = serde_json::from_str(text)?;
    Ok(items.iter().map(hex::decode).collect::<Result<Vec<_>, _>>()?)
}

fn datum_of(
    utxo_id: &TxHash,
    utxo_index: u32,
    hash: Option<Vec<u8>>,
    cbor: Option<Vec<u8>>,
) -> IndexerResult<Option<Datum>> {
    hash.map(|hash| {
        Ok(Datum {
            utxo_id: *utxo_id,
            utxo_index,
            datum_hash: to_hash(hash, "datum_hash")?,
            datum_cbor: cbor,
        })
    })
    .transpose()
}

async fn assets_of(
    conn: &mut SqliteConnection,
    utxo_id: &TxHash,
    utxo_index: u32,
) -> IndexerResult<Vec<Asset>> {
    let rows: Vec<AssetRow> = sqlx::query_as(
        r#"
        SELECT utxo_id, utxo_index, policy_id, name, name_hex, fingerprint, amount
        FROM assets
        WHERE utxo_id = ? AND utxo_index = ?
        ORDER BY policy_id, name_hex
        "#,
    )
    .bind(utxo_id.as_ref())
    .bind(utxo_index as i64)
    .fetch_all(&mut *conn)
    .await
    .map_err(sql_error)?;
    rows.into_iter().map(AssetRow::into_asset).collect()
}

async fn output_from_row(conn: &mut SqliteConnection, row: OutputRow) -> IndexerResult<TransactionOutput> {
    let utxo_id: TxHash = to_hash(row.utxo_id, "utxo_id")?;
    let utxo_index = to_index(row.utxo_index)?;
    Ok(TransactionOutput {
        utxo_id,
        utxo_index,
        address: row.address,
        amount: to_u64(row.amount, "amount")?,
        assets: assets_of(conn, &utxo_id, utxo_index).await?,
        datum: datum_of(&utxo_id, utxo_index, row.datum_hash, row.datum_cbor)?,
        cbor: Vec::new(),
    })
}

async fn witness_from_row(conn: &mut SqliteConnection, row: WitnessRow) -> IndexerResult<Witness> {
    let redeemers: Vec<RedeemerRow> =
        sqlx::query_as("SELECT tag, idx, cbor FROM redeemers WHERE witness_id = ? ORDER BY tag, idx")
            .bind(row.id)
            .fetch_all(&mut *conn)
            .await
            .map_err(sql_error)?;
    Ok(Witness {
        tx_hash: to_hash(row.tx_hash, "tx_hash")?,
        plutus_v1_scripts: from_hex_list(&row.plutus_v1_scripts)?,
        plutus_v2_scripts: from_hex_list(&row.plutus_v2_scripts)?,
        plutus_v3_scripts: from_hex_list(&row.plutus_v3_scripts)?,
        plutus_data: from_hex_list(&row.plutus_data)?,
        redeemers: redeemers.into_iter().map(RedeemerRow::into_redeemer).collect::<IndexerResult<_>>()?,
    })
}

async fn summaries(
    conn: &mut SqliteConnection,
    mut builder: QueryBuilder<'_, Sqlite>,
    page: Page,
) -> IndexerResult<Vec<TransactionSummary>> {
    builder.push(" ORDER BY t.slot_number, t.block_number, t.rowid LIMIT ");
    builder.push_bind(page.limit as i64);
    builder.push(" OFFSET ");
    builder.push_bind(page.offset as i64);
    let rows: Vec<TransactionRow> =
        builder.build_query_as().fetch_all(&mut *conn).await.map_err(sql_error)?;
    rows.into_iter().map(TransactionRow::into_summary).collect()
}

impl MetadataStore {
    pub async fn transaction_summary(
        &self,
        txn: &mut StoreTxn,
        tx_hash: &TxHash,
    ) -> IndexerResult<Option<TransactionSummary>> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t WHERE t.tx_hash = ?"
        ))
        .bind(tx_hash.as_ref())
        .fetch_optional(txn.metadata()?)
        .await
        .map_err(sql_error)?;
        row.map(TransactionRow::into_summary).transpose()
    }

    /// The full transaction aggregate, without its raw encoding
    pub async fn transaction(
        &self,
        txn: &mut StoreTxn,
        tx_hash: &TxHash,
    ) -> IndexerResult<Option<Transaction>> {
        let Some(summary) = self.transaction_summary(txn, tx_hash).await? else {
            return Ok(None);
        };
        let conn = txn.metadata()?;

        let input_rows: Vec<InputRow> = sqlx::query_as(
            r#"
            SELECT i.utxo_id, i.utxo_index, i.address, i.amount, i.datum_hash, d.datum_cbor
            FROM transaction_inputs i
            LEFT JOIN datums d ON d.datum_hash = i.datum_hash
            WHERE i.tx_hash = ?
            ORDER BY i.rowid
            "#,
        )
        .bind(tx_hash.as_ref())
        .fetch_all(&mut *conn)
        .await
        .map_err(sql_error)?;

        let mut inputs = Vec::with_capacity(input_rows.len());
        for row in input_rows {
            let utxo_id: TxHash = to_hash(row.utxo_id, "utxo_id")?;
            let utxo_index = to_index(row.utxo_index)?;
            inputs.push(TransactionInput {
                tx_hash: *tx_hash,
                utxo_id,
                utxo_index,
                address: row.address,
                amount: to_u64(row.amount, "amount")?,
                assets: assets_of(conn, &utxo_id, utxo_index).await?,
                datum: datum_of(&utxo_id, utxo_index, row.datum_hash, row.datum_cbor)?,
                cbor: Vec::new(),
            });
        }

        let output_rows: Vec<OutputRow> = sqlx::query_as(
            r#"
            SELECT o.utxo_id, o.utxo_index, o.address, o.amount, o.datum_hash, d.datum_cbor
            FROM transaction_outputs o
            LEFT JOIN datums d ON d.datum_hash = o.datum_hash
            WHERE o.utxo_id = ?
            ORDER BY o.utxo_index
            "#,
        )
        .bind(tx_hash.as_ref())
        .fetch_all(&mut *conn)
        .await
        .map_err(sql_error)?;

        let mut outputs = Vec::with_capacity(output_rows.len());
        for row in output_rows {
            outputs.push(output_from_row(conn, row).await?);
        }

        let reference_rows: Vec<(Vec<u8>, i64)> = sqlx::query_as(
            "SELECT utxo_id, utxo_index FROM reference_inputs WHERE tx_hash = ? ORDER BY rowid",
        )
        .bind(tx_hash.as_ref())
        .fetch_all(&mut *conn)
        .await
        .map_err(sql_error)?;
        let reference_inputs = reference_rows
            .into_iter()
            .map(|(utxo_id, utxo_index)| {
                Ok(SimpleUtxo {
                    tx_hash: *tx_hash,
                    utxo_id: to_hash(utxo_id, "utxo_id")?,
                    utxo_index: to_index(utxo_index)?,
                })
            })
            .collect::<IndexerResult<Vec<_>>>()?;

        let witness = match self.witness(txn, tx_hash).await? {
            Some(witness) => witness,
            None => Witness {
                tx_hash: *tx_hash,
                ..Default::default()
            },
        };

        Ok(Some(Transaction {
            tx_hash: summary.tx_hash,
            block_hash: summary.block_hash,
            block_number: summary.block_number,
            slot_number: summary.slot_number,
            fee: summary.fee,
            ttl: summary.ttl,
            metadata: summary.metadata,
            withdrawals: summary.withdrawals,
            certificates: summary.certificates,
            inputs,
            outputs,
            reference_inputs,
            witness,
            cbor: Vec::new(),
        }))
    }

    pub async fn transactions_by_block(
        &self,
        txn: &mut StoreTxn,
        block_number: u64,
        page: Page,
    ) -> IndexerResult<Vec<TransactionSummary>> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t WHERE t.block_number = "
        ));
        builder.push_bind(to_i64(block_number, "block_number")?);
        summaries(txn.metadata()?, builder, page).await
    }

    /// Transactions with `from_slot <= slot_number <= to_slot`
    pub async fn transactions_by_slot_range(
        &self,
        txn: &mut StoreTxn,
        from_slot: u64,
        to_slot: u64,
        page: Page,
    ) -> IndexerResult<Vec<TransactionSummary>> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t WHERE t.slot_number >= "
        ));
        builder.push_bind(to_i64(from_slot, "from_slot")?);
        builder.push(" AND t.slot_number <= ");
        builder.push_bind(to_i64(to_slot, "to_slot")?);
        summaries(txn.metadata()?, builder, page).await
    }

    /// Transactions that spend from or pay to `address`
    pub async fn transactions_by_address(
        &self,
        txn: &mut StoreTxn,
        address: &str,
        page: Page,
    ) -> IndexerResult<Vec<TransactionSummary>> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t WHERE t.tx_hash IN \
             (SELECT o.utxo_id FROM transaction_outputs o WHERE o.address = "
        ));
        builder.push_bind(address.to_string());
        builder.push(" UNION SELECT i.tx_hash FROM transaction_inputs i WHERE i.address = ");
        builder.push_bind(address.to_string());
        builder.push(")");
        summaries(txn.metadata()?, builder, page).await
    }

    /// Outputs paying to `address` that are not yet spent
    pub async fn live_utxos_by_address(
        &self,
        txn: &mut StoreTxn,
        address: &str,
        page: Page,
    ) -> IndexerResult<Vec<TransactionOutput>> {
        let conn = txn.metadata()?;
        let rows: Vec<OutputRow> = sqlx::query_as(
            r#"
            SELECT o.utxo_id, o.utxo_index, o.address, o.amount, o.datum_hash, d.datum_cbor
            FROM transaction_outputs o
            JOIN utxo_lifecycle l ON l.utxo_id = o.utxo_id AND l.utxo_index = o.utxo_index
            LEFT JOIN datums d ON d.datum_hash = o.datum_hash
            WHERE o.address = ? AND l.deleted_slot = 0
            ORDER BY l.added_slot, o.utxo_id, o.utxo_index
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(address)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&mut *conn)
        .await
        .map_err(sql_error)?;

        let mut outputs = Vec::with_capacity(rows.len());
        for row in rows {
            outputs.push(output_from_row(conn, row).await?);
        }
        Ok(outputs)
    }

    pub async fn utxo(&self, txn: &mut StoreTxn, utxo: &UtxoRef) -> IndexerResult<Option<UtxoEntry>> {
        let conn = txn.metadata()?;
        let row: Option<(OutputRow, Option<i64>, Option<i64>)> = sqlx::query_as::<_, OutputLifecycleRow>(
            r#"
            SELECT o.utxo_id, o.utxo_index, o.address, o.amount, o.datum_hash, d.datum_cbor,
                   l.added_slot, l.deleted_slot
            FROM transaction_outputs o
            LEFT JOIN utxo_lifecycle l ON l.utxo_id = o.utxo_id AND l.utxo_index = o.utxo_index
            LEFT JOIN datums d ON d.datum_hash = o.datum_hash
            WHERE o.utxo_id = ? AND o.utxo_index = ?
            "#,
        )
        .bind(utxo.tx_hash.as_ref())
        .bind(utxo.index as i64)
        .fetch_optional(&mut *conn)
        .await
        .map_err(sql_error)?
        .map(OutputLifecycleRow::split);

        let Some((row, added_slot, deleted_slot)) = row else {
            return Ok(None);
        };
        Ok(Some(UtxoEntry {
            output: output_from_row(conn, row).await?,
            added_slot: added_slot.map(|slot| to_u64(slot, "added_slot")).transpose()?,
            spent_slot: deleted_slot
                .filter(|slot| *slot > 0)
                .map(|slot| to_u64(slot, "deleted_slot"))
                .transpose()?,
        }))
    }

    pub async fn assets_by_policy(
        &self,
        txn: &mut StoreTxn,
        policy_id: &PolicyId,
        page: Page,
    ) -> IndexerResult<Vec<Asset>> {
        let mut builder = QueryBuilder::new(
            "SELECT utxo_id, utxo_index, policy_id, name, name_hex, fingerprint, amount \
             FROM assets WHERE policy_id = ",
        );
        builder.push_bind(policy_id.to_vec());
        assets(txn.metadata()?, builder, page).await
    }

    pub async fn assets_by_fingerprint(
        &self,
        txn: &mut StoreTxn,
        fingerprint: &str,
        page: Page,
    ) -> IndexerResult<Vec<Asset>> {
        let mut builder = QueryBuilder::new(
            "SELECT utxo_id, utxo_index, policy_id, name, name_hex, fingerprint, amount \
             FROM assets WHERE fingerprint = ",
        );
        builder.push_bind(fingerprint.to_string());
        assets(txn.metadata()?, builder, page).await
    }

    pub async fn assets_by_name(
        &self,
        txn: &mut StoreTxn,
        name: &str,
        page: Page,
    ) -> IndexerResult<Vec<Asset>> {
        let mut builder = QueryBuilder::new(
            "SELECT utxo_id, utxo_index, policy_id, name, name_hex, fingerprint, amount \
             FROM assets WHERE name = ",
        );
        builder.push_bind(name.to_string());
        assets(txn.metadata()?, builder, page).await
    }

    pub async fn datum(&self, txn: &mut StoreTxn, datum_hash: &DatumHash) -> IndexerResult<Option<Datum>> {
        let row: Option<(Vec<u8>, Vec<u8>, i64, Option<Vec<u8>>)> = sqlx::query_as(
            "SELECT datum_hash, utxo_id, utxo_index, datum_cbor FROM datums WHERE datum_hash = ?",
        )
        .bind(datum_hash.as_ref())
        .fetch_optional(txn.metadata()?)
        .await
        .map_err(sql_error)?;

        row.map(|(hash, utxo_id, utxo_index, cbor)| {
            Ok(Datum {
                utxo_id: to_hash(utxo_id, "utxo_id")?,
                utxo_index: to_index(utxo_index)?,
                datum_hash: to_hash(hash, "datum_hash")?,
                datum_cbor: cbor,
            })
        })
        .transpose()
    }

    pub async fn witness(&self, txn: &mut StoreTxn, tx_hash: &TxHash) -> IndexerResult<Option<Witness>> {
        let conn = txn.metadata()?;
        let row: Option<WitnessRow> = sqlx::query_as(
            r#"
            SELECT id, tx_hash, plutus_v1_scripts, plutus_v2_scripts, plutus_v3_scripts, plutus_data
            FROM witnesses
            WHERE tx_hash = ?
            "#,
        )
        .bind(tx_hash.as_ref())
        .fetch_optional(&mut *conn)
        .await
        .map_err(sql_error)?;

        match row {
            Some(row) => Ok(Some(witness_from_row(conn, row).await?)),
            None => Ok(None),
        }
    }

    pub async fn redeemer(
        &self,
        txn: &mut StoreTxn,
        tx_hash: &TxHash,
        tag: RedeemerTag,
        index: u32,
    ) -> IndexerResult<Option<Redeemer>> {
        let row: Option<RedeemerRow> = sqlx::query_as(
            r#"
            SELECT r.tag, r.idx, r.cbor
            FROM redeemers r
            JOIN witnesses w ON w.id = r.witness_id
            WHERE w.tx_hash = ? AND r.tag = ? AND r.idx = ?
            "#,
        )
        .bind(tx_hash.as_ref())
        .bind(tag.as_str())
        .bind(index as i64)
        .fetch_optional(txn.metadata()?)
        .await
        .map_err(sql_error)?;
        row.map(RedeemerRow::into_redeemer).transpose()
    }

    pub async fn tracked_addresses(&self, txn: &mut StoreTxn) -> IndexerResult<Vec<String>> {
        sqlx::query_scalar("SELECT address FROM tracked_addresses ORDER BY address")
            .fetch_all(txn.metadata()?)
            .await
            .map_err(sql_error)
    }

    /// Aggregates for the metrics endpoint; `excluded` addresses are not counted
    pub async fn metrics(&self, txn: &mut StoreTxn, excluded: &[String]) -> IndexerResult<IndexerMetrics> {
        let conn = txn.metadata()?;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(DISTINCT address) FROM \
             (SELECT address FROM transaction_outputs UNION SELECT address FROM transaction_inputs)",
        );
        if !excluded.is_empty() {
            builder.push(" WHERE address NOT IN (");
            let mut separated = builder.separated(", ");
            for address in excluded {
                separated.push_bind(address.clone());
            }
            separated.push_unseparated(")");
        }
        let distinct_addresses: i64 =
            builder.build_query_scalar().fetch_one(&mut *conn).await.map_err(sql_error)?;

        let (total_fees, transaction_count): (i64, i64) =
            sqlx::query_as("SELECT COALESCE(SUM(fee), 0), COUNT(*) FROM transactions")
                .fetch_one(&mut *conn)
                .await
                .map_err(sql_error)?;

        let distinct_assets: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM (SELECT DISTINCT policy_id, name_hex FROM assets)")
                .fetch_one(&mut *conn)
                .await
                .map_err(sql_error)?;

        Ok(IndexerMetrics {
            distinct_addresses: to_u64(distinct_addresses, "address count")?,
            total_fees: to_u64(total_fees, "fee sum")?,
            transaction_count: to_u64(transaction_count, "transaction count")?,
            distinct_assets: to_u64(distinct_assets, "asset count")?,
        })
    }
}

#[derive(FromRow)]
struct OutputLifecycleRow {
    #[sqlx(flatten)]
    output: OutputRow,
    added_slot: Option<i64>,
    deleted_slot: Option<i64>,
}

impl OutputLifecycleRow {
    fn split(self) -> (OutputRow, Option<i64>, Option<i64>) {
        (self.output, self.added_slot, self.deleted_slot)
    }
}

async fn assets(
    conn: &mut SqliteConnection,
    mut builder: QueryBuilder<'_, Sqlite>,
    page: Page,
) -> IndexerResult<Vec<Asset>> {
    builder.push(" ORDER BY utxo_id, utxo_index, policy_id, name_hex LIMIT ");
    builder.push_bind(page.limit as i64);
    builder.push(" OFFSET ");
    builder.push_bind(page.offset as i64);
    let rows: Vec<AssetRow> = builder.build_query_as().fetch_all(&mut *conn).await.map_err(sql_error)?;
    rows.into_iter().map(AssetRow::into_asset).collect()
}
