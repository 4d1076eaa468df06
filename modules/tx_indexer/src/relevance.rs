//! The set of addresses, policies and asset fingerprints the platform cares
//! about, and the filter deciding whether a transaction touches it.

use andamio_common::{
    asset::{fingerprint, AssetMap},
    configuration::PlatformConfig,
    IndexerError, IndexerResult, PolicyId, TransactionEvent, TxOutputEvent,
};
use andamio_module_tx_store::Database;
use std::{
    collections::HashSet,
    sync::{Arc, PoisonError, RwLock},
};
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelevanceSet {
    pub addresses: HashSet<String>,
    pub policies: HashSet<PolicyId>,
    pub fingerprints: HashSet<String>,
}

impl RelevanceSet {
    /// Combine the static platform set with the tracked addresses
    pub fn from_sources(platform: &PlatformConfig, tracked: Vec<String>) -> IndexerResult<Self> {
        let policies = platform
            .policy_ids
            .iter()
            .map(|id| {
                id.parse::<PolicyId>()
                    .map_err(|e| IndexerError::Config(format!("invalid policy id '{id}': {e}")))
            })
            .collect::<IndexerResult<HashSet<_>>>()?;

        let mut addresses: HashSet<String> = platform.addresses.iter().cloned().collect();
        addresses.extend(tracked);

        Ok(Self {
            addresses,
            policies,
            fingerprints: platform.admin_asset_fingerprints.iter().cloned().collect(),
        })
    }

    fn carries(&self, assets: &AssetMap) -> bool {
        assets.iter().any(|(policy_id, names)| {
            self.policies.contains(policy_id)
                || (!self.fingerprints.is_empty()
                    && names.0.keys().any(|name| {
                        fingerprint(policy_id, name)
                            .map(|f| self.fingerprints.contains(&f))
                            .unwrap_or(false)
                    }))
        })
    }

    fn touches(&self, output: &TxOutputEvent) -> bool {
        self.addresses.contains(&output.address) || self.carries(&output.assets)
    }
}

/// Admit a transaction if any resolved input or output pays to a known
/// address or carries a known policy or fingerprint
pub fn is_relevant(set: &RelevanceSet, event: &TransactionEvent) -> bool {
    event.resolved_inputs.iter().any(|input| set.touches(input))
        || event.outputs.iter().any(|output| set.touches(output))
}

/// Shared relevance set, swapped whole on reload
pub struct RelevanceCache {
    db: Database,
    platform: PlatformConfig,
    current: RwLock<Arc<RelevanceSet>>,
    reloading: Mutex<()>,
}

impl RelevanceCache {
    pub async fn load(db: Database, platform: PlatformConfig) -> IndexerResult<Self> {
        let set = Self::read_sources(&db, &platform).await?;
        info!(
            addresses = set.addresses.len(),
            policies = set.policies.len(),
            fingerprints = set.fingerprints.len(),
            "Loaded relevance set"
        );
        Ok(Self {
            db,
            platform,
            current: RwLock::new(Arc::new(set)),
            reloading: Mutex::new(()),
        })
    }

    async fn read_sources(db: &Database, platform: &PlatformConfig) -> IndexerResult<RelevanceSet> {
        let mut txn = db.read().await?;
        let tracked = db.metadata().tracked_addresses(&mut txn).await;
        txn.discard().await;
        RelevanceSet::from_sources(platform, tracked?)
    }

    /// Re-read the tracked addresses and the platform set
    pub async fn reload(&self) -> IndexerResult<()> {
        let _guard = self.reloading.lock().await;
        let set = Arc::new(Self::read_sources(&self.db, &self.platform).await?);
        let addresses = set.addresses.len();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = set;
        info!(addresses, "Reloaded relevance set");
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<RelevanceSet> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use andamio_common::{asset::PolicyAssets, BlockHash, TxHash};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    const POLICY: &str = "1e349c9bdea19fd6c147626a5260bc44b71635f398b67c59881df209";

    fn output(address: &str, assets: AssetMap) -> TxOutputEvent {
        TxOutputEvent {
            address: address.to_string(),
            amount: 2_000_000,
            assets,
            datum: None,
            cbor: Vec::new(),
        }
    }

    fn event(resolved_inputs: Vec<TxOutputEvent>, outputs: Vec<TxOutputEvent>) -> TransactionEvent {
        TransactionEvent {
            tx_hash: TxHash::new([1; 32]),
            cbor: Vec::new(),
            inputs: Vec::new(),
            resolved_inputs,
            outputs,
            reference_inputs: Vec::new(),
            metadata: None,
            fee: 0,
            ttl: None,
            withdrawals: BTreeMap::new(),
            witnesses: Default::default(),
            certificates: Vec::new(),
            block_hash: BlockHash::new([0; 32]),
        }
    }

    fn token(name: &[u8]) -> AssetMap {
        let mut assets = AssetMap::new();
        assets.insert(
            POLICY.parse().unwrap(),
            PolicyAssets(BTreeMap::from([(name.to_vec(), 1)])),
        );
        assets
    }

    fn platform(addresses: &[&str], policies: &[&str], fingerprints: &[&str]) -> PlatformConfig {
        PlatformConfig {
            addresses: addresses.iter().map(|s| s.to_string()).collect(),
            policy_ids: policies.iter().map(|s| s.to_string()).collect(),
            admin_asset_fingerprints: fingerprints.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn admits_by_output_or_input_address() {
        let set = RelevanceSet::from_sources(&platform(&["addr_a"], &[], &[]), Vec::new()).unwrap();
        assert!(is_relevant(&set, &event(Vec::new(), vec![output("addr_a", AssetMap::new())])));
        assert!(is_relevant(&set, &event(vec![output("addr_a", AssetMap::new())], Vec::new())));
        assert!(!is_relevant(&set, &event(vec![output("addr_b", AssetMap::new())], vec![output("addr_b", AssetMap::new())])));
    }

    #[test]
    fn admits_by_policy_and_fingerprint() {
        let by_policy = RelevanceSet::from_sources(&platform(&[], &[POLICY], &[]), Vec::new()).unwrap();
        assert!(is_relevant(&by_policy, &event(Vec::new(), vec![output("addr_b", token(b"PATATE"))])));

        let by_fingerprint = RelevanceSet::from_sources(
            &platform(&[], &[], &["asset1hv4p5tv2a837mzqrst04d0dcptdjmluqvdx9k3"]),
            Vec::new(),
        )
        .unwrap();
        assert!(is_relevant(&by_fingerprint, &event(vec![output("addr_b", token(b"PATATE"))], Vec::new())));
        assert!(!is_relevant(&by_fingerprint, &event(Vec::new(), vec![output("addr_b", token(b"OTHER"))])));
    }

    #[test]
    fn keeps_fingerprints_apart_from_addresses() {
        let set = RelevanceSet::from_sources(&platform(&[], &[], &["asset1xyz"]), Vec::new()).unwrap();
        assert!(!is_relevant(&set, &event(Vec::new(), vec![output("asset1xyz", AssetMap::new())])));
    }

    #[test]
    fn rejects_bad_policy_id() {
        let result = RelevanceSet::from_sources(&platform(&[], &["zz"], &[]), Vec::new());
        assert!(matches!(result, Err(IndexerError::Config(_))));
    }

    #[tokio::test]
    async fn reload_picks_up_tracked_addresses() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path()).await.unwrap();
        let cache = RelevanceCache::load(db.clone(), platform(&["addr_a"], &[], &[])).await.unwrap();
        let before = cache.snapshot();
        assert!(!before.addresses.contains("addr_t"));

        db.metadata().add_tracked_address(None, "addr_t").await.unwrap();
        cache.reload().await.unwrap();

        assert!(cache.snapshot().addresses.contains("addr_t"));
        assert!(cache.snapshot().addresses.contains("addr_a"));
        // Earlier snapshots are unaffected
        assert!(!before.addresses.contains("addr_t"));
    }
}
