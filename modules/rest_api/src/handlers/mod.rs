pub mod addresses;
pub mod assets;
pub mod chain;
pub mod scripts;
pub mod transactions;
