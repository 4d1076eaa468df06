mod block;
mod tx;
mod utils;
mod utxo;
mod witness;

pub use block::*;
pub use tx::*;
pub use utils::*;
pub use utxo::*;
pub use witness::*;
