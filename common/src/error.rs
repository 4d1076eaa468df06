use crate::hash::TxHash;
use thiserror::Error;

/// Errors raised by the indexer's stores, pipeline and chain-sync client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexerError {
    /// Missing or malformed configuration; fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// A store could not be opened or migrated; fatal at startup
    #[error("cannot open store: {0}")]
    StoreOpen(String),

    /// I/O failure while reading or writing a store
    #[error("store I/O error: {0}")]
    StoreIo(String),

    /// A uniqueness or ownership constraint was violated at write time
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// The number of resolved inputs differs from the number of inputs
    #[error("inputs mismatch for transaction {tx_hash}")]
    InputsMismatch { tx_hash: TxHash },

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Upstream chain-sync failure; the client reconnects
    #[error("chain-sync error: {0}")]
    ChainSync(String),

    #[error("{0} not found")]
    NotFound(String),
}

pub type IndexerResult<T> = Result<T, IndexerError>;

impl IndexerError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Errors that abort the current batch but leave the pipeline running
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreIo(_) | Self::ChainSync(_))
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<config::ConfigError> for IndexerError {
    fn from(error: config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

impl From<bech32::EncodeError> for IndexerError {
    fn from(error: bech32::EncodeError) -> Self {
        Self::Serialization(format!("bech32 encoding failed: {error}"))
    }
}

impl From<hex::FromHexError> for IndexerError {
    fn from(error: hex::FromHexError) -> Self {
        Self::Serialization(format!("invalid hex: {error}"))
    }
}
