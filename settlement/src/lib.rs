//! Kestrel settlement layer
//!
//! An in-process stand-in for the settlement chain. It holds a single
//! Merkle root, accepts deposits into an ordered event log, and advances the
//! root only through [`SettlementContract::forge`], a check-and-set guarded
//! by `prev_root == root` and proof verification.

pub mod contract;
pub mod error;

pub use contract::{ForgeReceipt, SettlementContract, SettlementEvent, SharedSettlement};
pub use error::SettlementError;
