pub mod account_tree;
pub mod db;
pub mod rollup_state;

pub use account_tree::{AccumulatorError, MerkleAccumulator};
pub use db::{BatchHeader, DbBatch, RocksDbStore, StoredAccount};
pub use rollup_state::{LeafWrite, RollupState};
