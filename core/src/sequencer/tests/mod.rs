//! Operator scenarios spanning storage, execution, proving and settlement.

mod scenarios;

use std::sync::Arc;

use tempfile::TempDir;

use kestrel_account::{Account, Address};
use kestrel_crypto::empty_root;
use kestrel_keypair::Keypair;
use kestrel_prover::{ProvingBackend, ReferenceBackend};
use kestrel_settlement::{SettlementContract, SharedSettlement};
use kestrel_transaction::Transaction;

use crate::sequencer::execution::{BatchConfig, SubmitError};
use crate::sequencer::pipeline::{PipelineConfig, PipelineOrchestrator, ProverMode};
use crate::sequencer::settlement::SettlerConfig;
use crate::sequencer::storage::RocksDbStore;

pub(super) const DEPTH: usize = 8;

/// One operator over a temp database, settling into its own contract.
pub(super) struct Harness {
    dir: TempDir,
    pub backend: Arc<dyn ProvingBackend>,
    pub contract: SharedSettlement,
    pub orchestrator: PipelineOrchestrator,
}

pub(super) fn test_config() -> PipelineConfig {
    PipelineConfig {
        prover_mode: ProverMode::Reference,
        poll_interval_ms: 10,
        batch_config: BatchConfig {
            tree_depth: DEPTH,
            max_batch_age_secs: 3600,
            ..Default::default()
        },
        settler_config: SettlerConfig {
            max_retries: 3,
            retry_base_ms: 0,
        },
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_backend(Arc::new(ReferenceBackend::default()))
    }

    pub fn with_backend(backend: Arc<dyn ProvingBackend>) -> Self {
        let dir = TempDir::new().unwrap();
        let contract =
            SharedSettlement::new(SettlementContract::new(empty_root(DEPTH), backend.clone()));
        let orchestrator = open(&dir, &contract, &backend);
        Self {
            dir,
            backend,
            contract,
            orchestrator,
        }
    }

    /// Drop the operator and start a fresh one on the same database.
    pub fn restart(self) -> Self {
        let Self {
            dir,
            backend,
            contract,
            orchestrator,
        } = self;
        drop(orchestrator);
        let orchestrator = open(&dir, &contract, &backend);
        Self {
            dir,
            backend,
            contract,
            orchestrator,
        }
    }

    pub fn deposit(&self, wallet: &Keypair, amount: u64) {
        let (x, y) = wallet.address().coordinates().unwrap();
        self.contract.deposit(x, y, amount).unwrap();
    }

    pub fn deposit_confidential(&self, wallet: &Keypair, amount: u64) {
        let (x, y) = wallet.address().coordinates().unwrap();
        self.contract.deposit_confidential(x, y, amount).unwrap();
    }

    /// Run one forced cycle.
    pub async fn settle(&mut self) -> Option<u64> {
        self.orchestrator.tick(true).await.unwrap()
    }

    pub async fn submit(&self, tx: Transaction) -> Result<[u8; 32], SubmitError> {
        self.orchestrator
            .batch_manager()
            .lock()
            .await
            .submit_transaction(tx)
    }

    pub async fn account(&self, address: Address) -> Option<Account> {
        self.orchestrator.batch_manager().lock().await.get_account(&address)
    }

    pub async fn root(&self) -> [u8; 32] {
        self.orchestrator.batch_manager().lock().await.root()
    }
}

fn open(
    dir: &TempDir,
    contract: &SharedSettlement,
    backend: &Arc<dyn ProvingBackend>,
) -> PipelineOrchestrator {
    let db = Arc::new(RocksDbStore::open(dir.path()).unwrap());
    PipelineOrchestrator::new(db, test_config(), contract.clone(), backend.clone()).unwrap()
}
