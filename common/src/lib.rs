// Andamio common library - main library exports

pub mod asset;
pub mod configuration;
pub mod crypto;
pub mod error;
pub mod events;
pub mod hash;
pub mod model;
pub mod point;

// Flattened re-exports
pub use self::error::{IndexerError, IndexerResult};
pub use self::events::*;
pub use self::hash::{BlockHash, DatumHash, Hash, PolicyId, TxHash};
pub use self::point::Point;
