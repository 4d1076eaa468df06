//! Andamio transaction indexer module
//! Filters the chain-sync stream down to platform-relevant transactions,
//! coalesces them into batches and persists each batch atomically.

pub mod buffer;
pub mod flush;
pub mod normalizer;
pub mod pipeline;
pub mod relevance;

pub use buffer::BatchBuffer;
pub use flush::{apply_rollback, process_batch, FlushCommand, FlushWorker};
pub use normalizer::normalize;
pub use pipeline::IngestPipeline;
pub use relevance::{is_relevant, RelevanceCache, RelevanceSet};
