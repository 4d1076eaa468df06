use crate::utils::to_cbor;
use andamio_common::{IndexerResult, RedeemerEvent, RedeemerTag, WitnessEvent};
use pallas_primitives::conway;
use pallas_traverse::{MultiEraRedeemer, MultiEraTx};

/// Only the four tags the indexer stores; governance tags are skipped
fn map_redeemer_tag(tag: &conway::RedeemerTag) -> Option<RedeemerTag> {
    match tag {
        conway::RedeemerTag::Spend => Some(RedeemerTag::Spend),
        conway::RedeemerTag::Mint => Some(RedeemerTag::Mint),
        conway::RedeemerTag::Cert => Some(RedeemerTag::Cert),
        conway::RedeemerTag::Reward => Some(RedeemerTag::Reward),
        conway::RedeemerTag::Vote | conway::RedeemerTag::Propose => None,
    }
}

pub fn map_redeemer(redeemer: &MultiEraRedeemer) -> IndexerResult<Option<RedeemerEvent>> {
    let Some(tag) = map_redeemer_tag(&redeemer.tag()) else {
        return Ok(None);
    };
    let index = redeemer.index();
    let cbor = to_cbor(redeemer.data(), &format!("redeemer {tag}/{index}"))?;
    Ok(Some(RedeemerEvent { tag, index, cbor }))
}

pub fn map_witnesses(tx: &MultiEraTx) -> IndexerResult<WitnessEvent> {
    let mut redeemers = Vec::new();
    for redeemer in tx.redeemers() {
        if let Some(r) = map_redeemer(&redeemer)? {
            redeemers.push(r);
        }
    }

    Ok(WitnessEvent {
        plutus_v1_scripts: tx.plutus_v1_scripts().iter().map(|s| s.as_ref().to_vec()).collect(),
        plutus_v2_scripts: tx.plutus_v2_scripts().iter().map(|s| s.as_ref().to_vec()).collect(),
        plutus_v3_scripts: tx.plutus_v3_scripts().iter().map(|s| s.as_ref().to_vec()).collect(),
        plutus_data: tx.plutus_data().iter().map(|d| d.raw_cbor().to_vec()).collect(),
        redeemers,
    })
}
