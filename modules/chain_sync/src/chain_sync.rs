//! Andamio chain sync module
//! Streams decoded chain events from an upstream Cardano node.

use andamio_common::{BlockHash, ChainSyncEvent, IndexerError, IndexerResult, Point};
use async_trait::async_trait;
use pallas::network::miniprotocols::Point as WirePoint;

pub mod backoff;
#[cfg(unix)]
pub mod local_state;
pub mod peer;
pub mod resolver;

pub use backoff::Backoff;
#[cfg(unix)]
pub use local_state::NodeUtxoSource;
pub use peer::{PeerChainSync, PeerConfig};
pub use resolver::{BlobUtxoSource, RecentOutputs, UtxoResolver, UtxoSource};

/// A stream of chain-sync events.
///
/// Implementations reconnect on their own; an error from `next_event` is
/// reported to the caller, which may simply ask again.
#[async_trait]
pub trait ChainSyncSource: Send {
    /// Set the starting point. `None` starts at the current tip.
    async fn intersect(&mut self, start: Option<Point>) -> IndexerResult<()>;

    /// Next event, or `None` once the source is exhausted
    async fn next_event(&mut self) -> IndexerResult<Option<ChainSyncEvent>>;
}

pub fn to_wire_point(point: &Point) -> WirePoint {
    match point {
        Point::Origin => WirePoint::Origin,
        Point::Specific { slot, hash } => WirePoint::Specific(*slot, hash.to_vec()),
    }
}

pub fn from_wire_point(point: &WirePoint) -> IndexerResult<Point> {
    match point {
        WirePoint::Origin => Ok(Point::Origin),
        WirePoint::Specific(slot, hash) => {
            let hash = BlockHash::try_from(hash.as_slice()).map_err(|_| {
                IndexerError::ChainSync(format!("point hash has {} bytes", hash.len()))
            })?;
            Ok(Point::Specific { slot: *slot, hash })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_points_convert_both_ways() {
        let point = Point::Specific {
            slot: 99,
            hash: BlockHash::new([3; 32]),
        };
        assert_eq!(from_wire_point(&to_wire_point(&point)).unwrap(), point);
        assert_eq!(from_wire_point(&WirePoint::Origin).unwrap(), Point::Origin);
    }

    #[test]
    fn rejects_short_wire_hash() {
        let result = from_wire_point(&WirePoint::Specific(1, vec![0; 4]));
        assert!(matches!(result, Err(IndexerError::ChainSync(_))));
    }
}
