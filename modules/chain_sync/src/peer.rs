//! Node-to-node chain-sync client: headers over chainsync, bodies over
//! blockfetch, reconnecting with backoff from the last delivered point.

use crate::{
    backoff::Backoff, from_wire_point, resolver::UtxoResolver, to_wire_point, ChainSyncSource,
};
use andamio_codec::{decode_block, MappedBlock};
use andamio_common::{
    configuration::NetworkConfig, BlockHash, ChainSyncEvent, IndexerError, IndexerResult, Point,
};
use async_trait::async_trait;
use pallas::{
    ledger::traverse::MultiEraHeader,
    network::{
        facades::PeerClient,
        miniprotocols::{
            chainsync::{ClientError, HeaderContent, NextResponse},
            Point as WirePoint,
        },
    },
};
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub endpoint: String,
    pub magic: u64,
    pub reconnect_min_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl From<&NetworkConfig> for PeerConfig {
    fn from(network: &NetworkConfig) -> Self {
        let (reconnect_min_delay, reconnect_max_delay) = network.reconnect_delays();
        Self {
            endpoint: network.local_cardano_node_endpoint.clone(),
            magic: network.magic,
            reconnect_min_delay,
            reconnect_max_delay,
        }
    }
}

fn sync_error(context: &'static str) -> impl Fn(ClientError) -> IndexerError {
    move |e| IndexerError::ChainSync(format!("{context}: {e}"))
}

pub struct PeerChainSync {
    config: PeerConfig,
    resolver: UtxoResolver,
    backoff: Backoff,
    client: Option<PeerClient>,
    start: Option<Point>,
    last_delivered: Option<Point>,
    pending: VecDeque<ChainSyncEvent>,
    // The node answers every intersection with a rollback to it
    suppress_rollback: bool,
}

impl PeerChainSync {
    pub fn new(config: PeerConfig, resolver: UtxoResolver) -> Self {
        let backoff = Backoff::new(config.reconnect_min_delay, config.reconnect_max_delay);
        Self {
            config,
            resolver,
            backoff,
            client: None,
            start: None,
            last_delivered: None,
            pending: VecDeque::new(),
            suppress_rollback: false,
        }
    }

    async fn connect(&mut self) -> IndexerResult<()> {
        info!(endpoint = %self.config.endpoint, magic = self.config.magic, "Connecting to node");
        let mut client = PeerClient::connect(self.config.endpoint.clone(), self.config.magic)
            .await
            .map_err(|e| IndexerError::ChainSync(format!("connect to {}: {e}", self.config.endpoint)))?;

        let resume = self.last_delivered.or(self.start);
        let intersection = match resume {
            Some(point) => {
                let found = client
                    .chainsync()
                    .find_intersect(vec![to_wire_point(&point)])
                    .await
                    .map_err(sync_error("find intersect"));
                match found {
                    Ok((Some(found), _)) => found,
                    Ok((None, tip)) => {
                        client.abort().await;
                        return Err(IndexerError::ChainSync(format!(
                            "intersection {point} not found, node tip at slot {}",
                            tip.0.slot_or_default()
                        )));
                    }
                    Err(e) => {
                        client.abort().await;
                        return Err(e);
                    }
                }
            }
            None => match client.chainsync().intersect_tip().await {
                Ok(tip) => tip,
                Err(e) => {
                    client.abort().await;
                    return Err(IndexerError::ChainSync(format!("intersect tip: {e}")));
                }
            },
        };

        info!(slot = intersection.slot_or_default(), "Intersected with node");
        self.suppress_rollback = true;
        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            client.abort().await;
        }
    }

    async fn poll(&mut self) -> IndexerResult<()> {
        let Some(client) = self.client.as_mut() else {
            return Err(IndexerError::ChainSync("not connected".to_string()));
        };

        let next = client
            .chainsync()
            .request_or_await_next()
            .await
            .map_err(sync_error("request next"))?;

        match next {
            NextResponse::RollForward(header, _tip) => {
                let Some((slot, hash)) = header_point(&header)? else {
                    return Ok(());
                };
                let body = client
                    .blockfetch()
                    .fetch_single(WirePoint::Specific(slot, hash.to_vec()))
                    .await
                    .map_err(|e| IndexerError::ChainSync(format!("fetch block {slot}: {e}")))?;

                self.accept(slot, hash, decode_block(&body)).await
            }
            NextResponse::RollBackward(point, _tip) => {
                let point = from_wire_point(&point)?;
                if std::mem::take(&mut self.suppress_rollback) {
                    debug!("Ignoring rollback to intersection {point}");
                    return Ok(());
                }
                info!("Rollback to {point}");
                self.resolver.rollback(point.slot());
                self.last_delivered = Some(point);
                self.pending.push_back(ChainSyncEvent::Rollback(point));
                Ok(())
            }
            NextResponse::Await => {
                debug!("At tip, awaiting next block");
                Ok(())
            }
        }
    }

    /// Queue the events of a fetched block. The resume point only moves
    /// once the block is queued, so a failed resolution refetches it.
    async fn accept(
        &mut self,
        slot: u64,
        hash: BlockHash,
        decoded: IndexerResult<MappedBlock>,
    ) -> IndexerResult<()> {
        match decoded {
            Ok(block) => self.deliver(block).await?,
            Err(e) => error!(slot, block = %hash, "Skipping undecodable block: {e}"),
        }
        self.suppress_rollback = false;
        self.backoff.reset();
        self.last_delivered = Some(Point::Specific { slot, hash });
        Ok(())
    }

    async fn deliver(&mut self, block: MappedBlock) -> IndexerResult<()> {
        let MappedBlock {
            status,
            mut transactions,
        } = block;
        let unresolved = self.resolver.resolve_block(status.slot, &mut transactions).await?;
        if unresolved > 0 {
            debug!(slot = status.slot, unresolved, "Block has unresolved inputs");
        }
        if status.block_number % 1000 == 0 {
            info!(slot = status.slot, number = status.block_number, "Syncing");
        }

        self.pending.push_back(ChainSyncEvent::Status(status));
        self.pending.extend(
            transactions
                .into_iter()
                .map(|(tx, context)| ChainSyncEvent::Transaction(Box::new(tx), context)),
        );
        Ok(())
    }
}

/// Slot and hash of a header, or `None` for epoch boundary blocks
fn header_point(header: &HeaderContent) -> IndexerResult<Option<(u64, BlockHash)>> {
    let tag = header.byron_prefix.map(|p| p.0);
    let decoded = MultiEraHeader::decode(header.variant, tag, &header.cbor)
        .map_err(|e| IndexerError::ChainSync(format!("undecodable header: {e}")))?;
    if decoded.as_eb().is_some() {
        return Ok(None);
    }
    Ok(Some((decoded.slot(), BlockHash::new(*decoded.hash()))))
}

#[async_trait]
impl ChainSyncSource for PeerChainSync {
    async fn intersect(&mut self, start: Option<Point>) -> IndexerResult<()> {
        self.disconnect().await;
        self.start = start;
        self.last_delivered = None;
        self.pending.clear();
        Ok(())
    }

    async fn next_event(&mut self) -> IndexerResult<Option<ChainSyncEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            let result = match self.client {
                Some(_) => self.poll().await,
                None => self.connect().await,
            };

            if let Err(e) = result {
                let delay = self.backoff.next_delay();
                warn!(endpoint = %self.config.endpoint, "Chain sync failed: {e}; retrying in {delay:?}");
                self.disconnect().await;
                tokio::time::sleep(delay).await;
            }
        }
    }
}
