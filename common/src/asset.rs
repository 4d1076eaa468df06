//! Native asset helpers: the per-output asset map and CIP-14 fingerprints

use crate::{crypto::blake2b_160, error::IndexerResult, hash::PolicyId};
use bech32::{Bech32, Hrp};
use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};
use std::collections::BTreeMap;

const ASSET_HRP: Hrp = Hrp::parse_unchecked("asset");

/// Token name to quantity, within one policy
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyAssets(#[serde_as(as = "BTreeMap<Hex, _>")] pub BTreeMap<Vec<u8>, u64>);

/// Assets carried by one output, keyed by policy then token name
pub type AssetMap = BTreeMap<PolicyId, PolicyAssets>;

/// One flattened entry of an [`AssetMap`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatAsset {
    pub policy_id: PolicyId,
    pub name: String,
    pub name_hex: String,
    pub fingerprint: String,
    pub amount: u64,
}

/// CIP-14 asset fingerprint: bech32("asset", blake2b-160(policy ‖ name))
pub fn fingerprint(policy_id: &PolicyId, name: &[u8]) -> IndexerResult<String> {
    let mut data = Vec::with_capacity(policy_id.len() + name.len());
    data.extend_from_slice(policy_id.as_ref());
    data.extend_from_slice(name);
    Ok(bech32::encode::<Bech32>(ASSET_HRP, &blake2b_160(&data))?)
}

/// Flatten an asset map into one row per (policy, name), in map order
pub fn flatten(assets: &AssetMap) -> IndexerResult<Vec<FlatAsset>> {
    let mut flat = Vec::new();
    for (policy_id, names) in assets {
        for (name, amount) in &names.0 {
            flat.push(FlatAsset {
                policy_id: *policy_id,
                name: String::from_utf8_lossy(name).into_owned(),
                name_hex: hex::encode(name),
                fingerprint: fingerprint(policy_id, name)?,
                amount: *amount,
            });
        }
    }
    Ok(flat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(text: &str) -> PolicyId {
        text.parse().unwrap()
    }

    // Test vectors from CIP-14
    #[test]
    fn fingerprint_of_empty_name() {
        let fp = fingerprint(
            &policy("7eae28af2208be856f7a119668ae52a49b73725e326dc16579dcc373"),
            &[],
        )
        .unwrap();
        assert_eq!(fp, "asset1rjklcrnsdzqp65wjgrg55sy9723kw09mlgvlc3");
    }

    #[test]
    fn fingerprint_of_named_asset() {
        let fp = fingerprint(
            &policy("1e349c9bdea19fd6c147626a5260bc44b71635f398b67c59881df209"),
            &hex::decode("504154415445").unwrap(),
        )
        .unwrap();
        assert_eq!(fp, "asset1hv4p5tv2a837mzqrst04d0dcptdjmluqvdx9k3");
    }

    #[test]
    fn flattens_in_policy_then_name_order() {
        let p = policy("1e349c9bdea19fd6c147626a5260bc44b71635f398b67c59881df209");
        let mut names = BTreeMap::new();
        names.insert(b"TOKEN".to_vec(), 5);
        names.insert(b"ABC".to_vec(), 7);
        let mut assets = AssetMap::new();
        assets.insert(p, PolicyAssets(names));

        let flat = flatten(&assets).unwrap();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].name, "ABC");
        assert_eq!(flat[0].name_hex, "414243");
        assert_eq!(flat[0].amount, 7);
        assert_eq!(flat[1].name, "TOKEN");
        assert!(flat[1].fingerprint.starts_with("asset1"));
    }

    #[test]
    fn asset_map_serialises_names_as_hex() {
        let p = policy("1e349c9bdea19fd6c147626a5260bc44b71635f398b67c59881df209");
        let mut names = BTreeMap::new();
        names.insert(b"AB".to_vec(), 1);
        let mut assets = AssetMap::new();
        assets.insert(p, PolicyAssets(names));

        let json = serde_json::to_value(&assets).unwrap();
        assert_eq!(json[p.to_string()]["4142"], 1);
    }
}
