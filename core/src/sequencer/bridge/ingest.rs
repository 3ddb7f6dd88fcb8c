//! Deposit Ingestor
//!
//! Reads the settlement contract's event log from a persisted cursor and
//! turns deposit events into pending rollup transactions.
//!
//! - Events are consumed in log order, so deposits keep their `l1_seq` order
//! - The cursor is written together with the pending entries; a restart
//!   neither drops nor repeats a deposit

use anyhow::Result;
use tracing::{debug, info};

use kestrel_settlement::{SettlementEvent, SharedSettlement};

use crate::sequencer::execution::BatchManager;
use crate::sequencer::storage::RocksDbStore;

pub struct DepositIngestor {
    contract: SharedSettlement,
    cursor: u64,
}

impl DepositIngestor {
    /// Resume from the cursor stored in `db`.
    pub fn new(contract: SharedSettlement, db: &RocksDbStore) -> Result<Self> {
        let cursor = db.event_cursor()?;
        debug!(cursor, "deposit ingestor resuming");
        Ok(Self { contract, cursor })
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Pull new events into the batch manager. Returns the number of
    /// deposits queued.
    pub fn poll(&mut self, manager: &mut BatchManager) -> Result<usize> {
        let events = self.contract.events_since(self.cursor);
        if events.is_empty() {
            return Ok(0);
        }

        let next_cursor = self.cursor + events.len() as u64;
        let deposits: Vec<_> = events
            .into_iter()
            .filter_map(|event| match event {
                SettlementEvent::Deposit(deposit) => Some(deposit),
                SettlementEvent::Forged { .. } => None,
            })
            .collect();
        let count = deposits.len();

        manager.enqueue_deposits(deposits, next_cursor)?;
        self.cursor = next_cursor;

        if count > 0 {
            info!(count, cursor = next_cursor, "deposits ingested");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ark_std::test_rng;
    use kestrel_account::Address;
    use kestrel_crypto::{RollupSecretKey, empty_root};
    use kestrel_prover::{MockProver, ProvingBackend};
    use kestrel_settlement::SettlementContract;
    use tempfile::TempDir;

    use crate::sequencer::execution::BatchConfig;

    #[test]
    fn test_poll_advances_persisted_cursor() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(RocksDbStore::open(dir.path()).unwrap());
        let backend: Arc<dyn ProvingBackend> = Arc::new(MockProver::new());
        let contract =
            SharedSettlement::new(SettlementContract::new(empty_root(8), backend.clone()));
        let config = BatchConfig {
            tree_depth: 8,
            ..Default::default()
        };
        let mut manager = BatchManager::new(db.clone(), config, backend).unwrap();

        let address =
            Address::from_public_key(&RollupSecretKey::random(&mut test_rng()).public_key());
        let (x, y) = address.coordinates().unwrap();
        contract.deposit(x, y, 10).unwrap();
        contract.deposit(x, y, 20).unwrap();

        let mut ingestor = DepositIngestor::new(contract.clone(), &db).unwrap();
        assert_eq!(ingestor.poll(&mut manager).unwrap(), 2);
        assert_eq!(ingestor.poll(&mut manager).unwrap(), 0);
        assert_eq!(manager.pending_len(), 2);
        assert_eq!(db.event_cursor().unwrap(), 2);

        contract.deposit(x, y, 30).unwrap();
        let mut resumed = DepositIngestor::new(contract, &db).unwrap();
        assert_eq!(resumed.cursor(), 2);
        assert_eq!(resumed.poll(&mut manager).unwrap(), 1);
        assert_eq!(manager.pending_len(), 3);
    }
}
