//! Metadata store schema, applied as an ordered list of migrations

use crate::sql_error;
use andamio_common::{IndexerError, IndexerResult};
use sqlx::SqlitePool;
use tracing::info;

pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "transactions and their children",
        statements: &[
            r#"CREATE TABLE transactions (
                tx_hash      BLOB PRIMARY KEY,
                block_hash   BLOB NOT NULL,
                block_number INTEGER NOT NULL,
                slot_number  INTEGER NOT NULL,
                fee          INTEGER NOT NULL,
                ttl          INTEGER,
                metadata     BLOB,
                withdrawals  TEXT NOT NULL DEFAULT '{}',
                certificates TEXT NOT NULL DEFAULT '[]'
            )"#,
            "CREATE INDEX transactions_block_number ON transactions (block_number)",
            "CREATE INDEX transactions_slot_number ON transactions (slot_number)",
            r#"CREATE TABLE transaction_inputs (
                tx_hash    BLOB NOT NULL REFERENCES transactions (tx_hash) ON DELETE CASCADE,
                utxo_id    BLOB NOT NULL,
                utxo_index INTEGER NOT NULL,
                address    TEXT NOT NULL CHECK (address <> ''),
                amount     INTEGER NOT NULL,
                datum_hash BLOB,
                PRIMARY KEY (tx_hash, utxo_id, utxo_index)
            )"#,
            "CREATE INDEX transaction_inputs_address ON transaction_inputs (address)",
            r#"CREATE TABLE transaction_outputs (
                utxo_id    BLOB NOT NULL REFERENCES transactions (tx_hash) ON DELETE CASCADE,
                utxo_index INTEGER NOT NULL,
                address    TEXT NOT NULL,
                amount     INTEGER NOT NULL,
                datum_hash BLOB,
                PRIMARY KEY (utxo_id, utxo_index)
            )"#,
            "CREATE INDEX transaction_outputs_address ON transaction_outputs (address)",
            r#"CREATE TABLE reference_inputs (
                tx_hash    BLOB NOT NULL REFERENCES transactions (tx_hash) ON DELETE CASCADE,
                utxo_id    BLOB NOT NULL,
                utxo_index INTEGER NOT NULL,
                PRIMARY KEY (tx_hash, utxo_id, utxo_index)
            )"#,
            r#"CREATE TABLE assets (
                utxo_id     BLOB NOT NULL,
                utxo_index  INTEGER NOT NULL,
                policy_id   BLOB NOT NULL,
                name        TEXT NOT NULL,
                name_hex    TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                amount      TEXT NOT NULL,
                tx_hash     BLOB NOT NULL REFERENCES transactions (tx_hash) ON DELETE CASCADE,
                PRIMARY KEY (utxo_id, utxo_index, policy_id, name_hex)
            )"#,
            "CREATE INDEX assets_policy_id ON assets (policy_id)",
            "CREATE INDEX assets_fingerprint ON assets (fingerprint)",
            "CREATE INDEX assets_name ON assets (name)",
            "CREATE INDEX assets_tx_hash ON assets (tx_hash)",
            r#"CREATE TABLE datums (
                datum_hash BLOB PRIMARY KEY,
                utxo_id    BLOB NOT NULL,
                utxo_index INTEGER NOT NULL,
                datum_cbor BLOB,
                tx_hash    BLOB NOT NULL REFERENCES transactions (tx_hash) ON DELETE CASCADE
            )"#,
            "CREATE INDEX datums_tx_hash ON datums (tx_hash)",
            r#"CREATE TABLE witnesses (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                tx_hash           BLOB NOT NULL UNIQUE REFERENCES transactions (tx_hash) ON DELETE CASCADE,
                plutus_v1_scripts TEXT NOT NULL DEFAULT '[]',
                plutus_v2_scripts TEXT NOT NULL DEFAULT '[]',
                plutus_v3_scripts TEXT NOT NULL DEFAULT '[]',
                plutus_data       TEXT NOT NULL DEFAULT '[]'
            )"#,
            r#"CREATE TABLE redeemers (
                witness_id INTEGER NOT NULL REFERENCES witnesses (id) ON DELETE CASCADE,
                tag        TEXT NOT NULL CHECK (tag IN ('spend', 'mint', 'cert', 'reward')),
                idx        INTEGER NOT NULL,
                cbor       BLOB NOT NULL,
                PRIMARY KEY (witness_id, tag, idx)
            )"#,
        ],
    },
    Migration {
        version: 2,
        description: "tracked addresses",
        statements: &[r#"CREATE TABLE tracked_addresses (
                address TEXT PRIMARY KEY CHECK (address <> '')
            )"#],
    },
    Migration {
        version: 3,
        description: "utxo lifecycle",
        statements: &[
            r#"CREATE TABLE utxo_lifecycle (
                utxo_id      BLOB NOT NULL,
                utxo_index   INTEGER NOT NULL,
                added_slot   INTEGER NOT NULL,
                deleted_slot INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (utxo_id, utxo_index),
                FOREIGN KEY (utxo_id, utxo_index)
                    REFERENCES transaction_outputs (utxo_id, utxo_index) ON DELETE CASCADE
            )"#,
            "CREATE INDEX utxo_lifecycle_added_slot ON utxo_lifecycle (added_slot)",
            "CREATE INDEX utxo_lifecycle_deleted_slot ON utxo_lifecycle (deleted_slot)",
        ],
    },
];

/// Apply every migration not yet recorded, each in its own transaction
pub async fn migrate(pool: &SqlitePool) -> IndexerResult<usize> {
    let open_error = |e: sqlx::Error| IndexerError::StoreOpen(format!("migration failed: {e}"));

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (unixepoch())
        )"#,
    )
    .execute(pool)
    .await
    .map_err(open_error)?;

    let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await
        .map_err(open_error)?;
    let current = current.unwrap_or(0);

    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await.map_err(sql_error)?;
        for statement in migration.statements {
            sqlx::query(statement).execute(&mut *tx).await.map_err(open_error)?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(&mut *tx)
            .await
            .map_err(open_error)?;
        tx.commit().await.map_err(open_error)?;

        info!(version = migration.version, "Applied migration: {}", migration.description);
        applied += 1;
    }
    Ok(applied)
}
