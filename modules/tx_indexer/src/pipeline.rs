//! The ingest pipeline: chain-sync events through the relevance filter into
//! the batch buffer, with full batches handed to the flush worker.
//!
//! At most one batch is in flight. When it fails, nothing after it is
//! written: the buffer is dropped and the source is re-intersected at the
//! stored cursor, so the failed window is fetched again.

use crate::{
    buffer::{BatchBuffer, Entry},
    flush::{FlushCommand, FlushWorker},
    relevance::{is_relevant, RelevanceCache},
};
use andamio_common::{ChainSyncEvent, ChainSyncStatus, IndexerError, IndexerResult, Point};
use andamio_module_chain_sync::ChainSyncSource;
use andamio_module_tx_store::Database;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

type BatchAck = oneshot::Receiver<IndexerResult<usize>>;

pub struct IngestPipeline {
    db: Database,
    source: Box<dyn ChainSyncSource>,
    cache: Arc<RelevanceCache>,
    buffer: BatchBuffer,
    intercept: Option<Point>,
    latest: Option<ChainSyncStatus>,
    // Block before `latest`; where the stream must restart to see `latest` again
    previous: Option<Point>,
    // Restart point for the earliest admitted transaction while nothing is committed
    first_anchor: Option<Option<Point>>,
    start: Option<Point>,
    commands: Option<mpsc::Sender<FlushCommand>>,
    in_flight: Option<BatchAck>,
}

impl IngestPipeline {
    pub fn new(
        db: Database,
        source: Box<dyn ChainSyncSource>,
        cache: Arc<RelevanceCache>,
        limit: usize,
        intercept: Option<Point>,
    ) -> Self {
        Self {
            db,
            source,
            cache,
            buffer: BatchBuffer::new(limit),
            intercept,
            latest: None,
            previous: None,
            first_anchor: None,
            start: None,
            commands: None,
            in_flight: None,
        }
    }

    pub fn buffer(&self) -> &BatchBuffer {
        &self.buffer
    }

    /// The stored cursor, else the configured intercept point, else `None`
    /// for the node's tip
    pub fn start_point(&self) -> IndexerResult<Option<Point>> {
        Ok(match self.stored_cursor()? {
            Some(point) => Some(point),
            None => self.intercept,
        })
    }

    fn stored_cursor(&self) -> IndexerResult<Option<Point>> {
        Ok(self.db.cursor().get()?.map(|cursor| Point::Specific {
            slot: cursor.slot_number,
            hash: cursor.block_hash,
        }))
    }

    /// Ingest until the source is exhausted or `shutdown` flips to true.
    /// Buffered transactions are flushed before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> IndexerResult<()> {
        let start = self.start_point()?;
        match &start {
            Some(point) => info!("Intersecting at {point}"),
            None => info!("Intersecting at node tip"),
        }
        self.source.intersect(start).await?;
        self.start = start;

        let (sender, receiver) = mpsc::channel(1);
        let worker = tokio::spawn(FlushWorker::new(self.db.clone(), receiver).run());
        self.commands = Some(sender);

        let ingested = self.ingest(&mut shutdown).await;
        let flushed = match ingested {
            Ok(()) => self.finish().await,
            Err(_) => Ok(()),
        };

        // Closing the channel lets the worker finish what it holds
        self.commands = None;
        let worker_result = worker
            .await
            .map_err(|e| IndexerError::StoreIo(format!("flush worker panicked: {e}")))?;

        if let Some(status) = &self.latest {
            info!(slot = status.slot, block = status.block_number, "Ingest stopped");
        }
        ingested?;
        flushed?;
        worker_result
    }

    async fn ingest(&mut self, shutdown: &mut watch::Receiver<bool>) -> IndexerResult<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                ack = wait_for(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.settled(ack).await?;
                }
                event = self.source.next_event() => match event {
                    Ok(Some(event)) => self.handle_event(event).await?,
                    Ok(None) => {
                        info!("Chain-sync source exhausted");
                        return Ok(());
                    }
                    Err(e) => warn!("Chain-sync error: {e}"),
                }
            }
        }
    }

    pub async fn handle_event(&mut self, event: ChainSyncEvent) -> IndexerResult<()> {
        match event {
            ChainSyncEvent::Status(status) => {
                if let Some(latest) = self.latest {
                    self.previous = Some(Point::Specific {
                        slot: latest.slot,
                        hash: latest.block_hash,
                    });
                }
                self.latest = Some(status);
            }
            ChainSyncEvent::Transaction(tx, context) => {
                if !is_relevant(&self.cache.snapshot(), &tx) {
                    return Ok(());
                }
                debug!(tx = %tx.tx_hash, slot = context.slot_number, "Admitted transaction");
                if self.first_anchor.is_none() {
                    self.first_anchor = Some(self.previous.or(self.start));
                }
                if let Some(evicted) = self.buffer.add(*tx, context) {
                    warn!(tx = %evicted, "Evicted transaction from batch buffer");
                }
                if self.buffer.len() >= self.buffer.limit() {
                    self.flush().await?;
                }
            }
            ChainSyncEvent::Rollback(point) => self.rollback(point).await?,
        }
        Ok(())
    }

    /// Wait for the batch in flight. `false` means it failed and the stream
    /// was restarted, so whatever the caller holds is stale.
    async fn settle(&mut self) -> IndexerResult<bool> {
        match self.in_flight.take() {
            Some(ack) => self.settled(ack.await).await,
            None => Ok(true),
        }
    }

    async fn settled(
        &mut self,
        ack: Result<IndexerResult<usize>, oneshot::error::RecvError>,
    ) -> IndexerResult<bool> {
        match ack {
            Ok(Ok(count)) => {
                debug!(count, "Batch acknowledged");
                Ok(true)
            }
            Ok(Err(e)) => {
                self.restart_after(e).await?;
                Ok(false)
            }
            Err(_) => Err(IndexerError::StoreIo("flush worker stopped".to_string())),
        }
    }

    /// Drop everything not yet committed and fetch it again from the last
    /// committed point
    async fn restart_after(&mut self, failure: IndexerError) -> IndexerResult<()> {
        let dropped = self.buffer.drain().len();
        let resume = match self.stored_cursor()? {
            Some(point) => Some(point),
            None => self.first_anchor.flatten().or(self.start),
        };
        match &resume {
            Some(point) => error!(dropped, "Batch failed ({failure}); refetching from {point}"),
            None => error!(dropped, "Batch failed ({failure}); refetching from node tip"),
        }
        self.latest = None;
        self.previous = resume;
        self.first_anchor = None;
        self.source.intersect(resume).await
    }

    async fn flush(&mut self) -> IndexerResult<()> {
        if !self.settle().await? || self.buffer.is_empty() {
            return Ok(());
        }
        let entries = self.buffer.drain();
        let (done, ack) = oneshot::channel();
        send(&self.commands, FlushCommand::Batch { entries, done }).await?;
        self.in_flight = Some(ack);
        Ok(())
    }

    /// Flush what is left and wait for it. A failure here leaves the cursor
    /// where it was, so the window is fetched again on the next start.
    async fn finish(&mut self) -> IndexerResult<()> {
        let previous_ok = match self.in_flight.take() {
            Some(ack) => report(ack.await)?,
            None => true,
        };
        if !previous_ok || self.buffer.is_empty() {
            return Ok(());
        }
        let entries = self.buffer.drain();
        let (done, ack) = oneshot::channel();
        send(&self.commands, FlushCommand::Batch { entries, done }).await?;
        report(ack.await)?;
        Ok(())
    }

    // Buffered entries past the rollback point are dropped; the rest are
    // committed ahead of the rollback so the worker sees them in chain order
    async fn rollback(&mut self, point: Point) -> IndexerResult<()> {
        if !self.settle().await? {
            return Ok(());
        }
        let slot = point.slot();
        let kept: Vec<Entry> = self
            .buffer
            .drain()
            .into_iter()
            .filter(|(_, context)| context.slot_number <= slot)
            .collect();
        if !kept.is_empty() {
            let (done, ack) = oneshot::channel();
            send(&self.commands, FlushCommand::Batch {
                entries: kept,
                done,
            })
            .await?;
            if !self.settled(ack.await).await? {
                return Ok(());
            }
        }

        let (done, applied) = oneshot::channel();
        send(&self.commands, FlushCommand::Rollback { point, done }).await?;
        applied
            .await
            .map_err(|_| IndexerError::StoreIo("flush worker stopped".to_string()))??;
        self.latest = None;
        self.previous = Some(point);
        Ok(())
    }
}

/// Resolves with the acknowledgement of the batch in flight, if any
async fn wait_for(
    in_flight: &mut Option<BatchAck>,
) -> Result<IndexerResult<usize>, oneshot::error::RecvError> {
    match in_flight {
        Some(ack) => ack.await,
        None => std::future::pending().await,
    }
}

fn report(ack: Result<IndexerResult<usize>, oneshot::error::RecvError>) -> IndexerResult<bool> {
    match ack {
        Ok(Ok(_)) => Ok(true),
        Ok(Err(e)) => {
            error!("Final batch failed, its window is fetched again on restart: {e}");
            Ok(false)
        }
        Err(_) => Err(IndexerError::StoreIo("flush worker stopped".to_string())),
    }
}

async fn send(
    commands: &Option<mpsc::Sender<FlushCommand>>,
    command: FlushCommand,
) -> IndexerResult<()> {
    let Some(commands) = commands else {
        return Err(IndexerError::StoreIo("flush worker is not running".to_string()));
    };
    commands
        .send(command)
        .await
        .map_err(|_| IndexerError::StoreIo("flush worker stopped".to_string()))
}
