//! Indexer configuration, layered over the built-in defaults

use crate::{
    error::{IndexerError, IndexerResult},
    hash::BlockHash,
    point::Point,
};
use config::Config;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_TRANSACTION_CACHE_LIMIT: usize = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    pub network: NetworkConfig,
    pub indexer: SyncConfig,
    pub database: DatabaseConfig,
    pub andamio: PlatformConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub magic: u64,
    #[serde(alias = "localcardanonodeendpoint")]
    pub local_cardano_node_endpoint: String,
    #[serde(alias = "reconnectmindelaysecs")]
    pub reconnect_min_delay_secs: u64,
    #[serde(alias = "reconnectmaxdelaysecs")]
    pub reconnect_max_delay_secs: u64,
    /// Node-to-client socket used to resolve inputs the indexer never stored
    #[serde(default, alias = "nodesocketpath")]
    pub node_socket_path: Option<PathBuf>,
}

impl NetworkConfig {
    pub fn reconnect_delays(&self) -> (Duration, Duration) {
        let min = Duration::from_secs(self.reconnect_min_delay_secs.max(1));
        let max = Duration::from_secs(self.reconnect_max_delay_secs).max(min);
        (min, max)
    }
}

// Historical key spellings are the primary names
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    #[serde(
        default,
        rename = "intercerptHash",
        alias = "interceptHash",
        alias = "intercerpthash",
        alias = "intercepthash"
    )]
    pub intercept_hash: Option<String>,
    #[serde(default, rename = "interceptSlot", alias = "interceptslot")]
    pub intercept_slot: Option<u64>,
    #[serde(
        default = "default_cache_limit",
        rename = "trancactionCacheLimit",
        alias = "transactionCacheLimit",
        alias = "trancactioncachelimit",
        alias = "transactioncachelimit"
    )]
    pub transaction_cache_limit: usize,
}

fn default_cache_limit() -> usize {
    DEFAULT_TRANSACTION_CACHE_LIMIT
}

impl SyncConfig {
    /// Configured fallback start point, used only when no cursor is stored
    pub fn intercept_point(&self) -> IndexerResult<Option<Point>> {
        let hash = self.intercept_hash.as_deref().filter(|h| !h.is_empty());
        match (self.intercept_slot, hash) {
            (None, None) => Ok(None),
            (Some(slot), Some(hash)) => {
                let hash: BlockHash = hash.parse().map_err(|e| {
                    IndexerError::Config(format!("indexer.intercerptHash: {e}"))
                })?;
                Ok(Some(Point::Specific { slot, hash }))
            }
            (Some(_), None) => Err(IndexerError::Config(
                "indexer.interceptSlot is set but indexer.intercerptHash is not".to_string(),
            )),
            (None, Some(_)) => Err(IndexerError::Config(
                "indexer.intercerptHash is set but indexer.interceptSlot is not".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    #[serde(alias = "databasedir")]
    pub database_dir: PathBuf,
    #[serde(alias = "housekeepingintervalsecs")]
    pub housekeeping_interval_secs: u64,
    #[serde(alias = "pruneafterslots")]
    pub prune_after_slots: u64,
}

/// The platform's own relevance set
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default, alias = "policyids")]
    pub policy_ids: Vec<String>,
    #[serde(default, alias = "adminassetfingerprints")]
    pub admin_asset_fingerprints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub address: String,
    #[serde(alias = "defaultlimit")]
    pub default_limit: u32,
    #[serde(alias = "maxlimit")]
    pub max_limit: u32,
}

impl IndexerConfig {
    pub fn try_load(config: &Config) -> IndexerResult<Self> {
        let full_config = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config.clone())
            .build()?;
        let loaded: Self = full_config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> IndexerResult<()> {
        if self.network.local_cardano_node_endpoint.is_empty() {
            return Err(IndexerError::Config(
                "network.localCardanoNodeEndpoint must be set".to_string(),
            ));
        }
        if self.database.database_dir.as_os_str().is_empty() {
            return Err(IndexerError::Config("database.databaseDir must be set".to_string()));
        }
        if self.api.default_limit == 0 || self.api.default_limit > self.api.max_limit {
            return Err(IndexerError::Config(
                "api.defaultLimit must be between 1 and api.maxLimit".to_string(),
            ));
        }
        if self.indexer.transaction_cache_limit == 0 {
            return Err(IndexerError::Config(
                "indexer.trancactionCacheLimit must be a positive integer".to_string(),
            ));
        }
        self.indexer.intercept_point()?;
        Ok(())
    }
}
