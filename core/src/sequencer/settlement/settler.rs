//! Settler
//!
//! Submits proved batches to the settlement contract.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Settlement Flow                              │
//! │                                                                  │
//! │  ┌────────────┐    ┌────────────┐    ┌────────────────────────┐ │
//! │  │   Batch    │───▶│   forge    │───▶│  ForgeReceipt          │ │
//! │  │   Proved   │    │ (blocking) │    │  or SettlementError    │ │
//! │  └────────────┘    └────────────┘    └────────────────────────┘ │
//! │                          │                                       │
//! │                          ▼                                       │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Settlement Contract                         │   │
//! │  │  • prev_root must equal the held root                    │   │
//! │  │  • proof must verify against the public inputs           │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use kestrel_prover::{BatchPublicInputs, Proof};
use kestrel_settlement::{ForgeReceipt, SettlementError, SharedSettlement};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct SettlerConfig {
    /// Resubmissions of a rejected proof before the pipeline pauses
    pub max_retries: u32,
    /// Base backoff between resubmissions (ms), doubled per attempt
    pub retry_base_ms: u64,
}

impl Default for SettlerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_ms: 1000,
        }
    }
}

// ============================================================================
// Settler
// ============================================================================

#[derive(Clone)]
pub struct Settler {
    contract: SharedSettlement,
    config: SettlerConfig,
}

impl Settler {
    pub fn new(contract: SharedSettlement, config: SettlerConfig) -> Self {
        Self { contract, config }
    }

    pub fn config(&self) -> &SettlerConfig {
        &self.config
    }

    pub fn contract(&self) -> &SharedSettlement {
        &self.contract
    }

    pub fn contract_root(&self) -> [u8; 32] {
        self.contract.root()
    }

    /// Submit a proof. Verification runs on the blocking pool.
    ///
    /// The outer error means the submission itself could not run.
    pub async fn forge(
        &self,
        proof: Proof,
        public_inputs: BatchPublicInputs,
    ) -> Result<Result<ForgeReceipt, SettlementError>> {
        let contract = self.contract.clone();
        let prev_root = public_inputs.prev_root;

        let result = tokio::task::spawn_blocking(move || contract.forge(&proof, &public_inputs))
            .await
            .context("forge task panicked")?;

        debug!(
            prev_root = %hex::encode(prev_root),
            ok = result.is_ok(),
            "forge submitted"
        );
        Ok(result)
    }

    /// Delay before resubmission `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.config.retry_base_ms.saturating_mul(1 << shift))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use kestrel_crypto::empty_root;
    use kestrel_prover::{
        BatchWitness, CircuitId, MockProver, PrivateWitness, ProvingBackend, PublicInputs,
    };
    use kestrel_settlement::SettlementContract;

    fn settler() -> (Arc<dyn ProvingBackend>, Settler) {
        let backend: Arc<dyn ProvingBackend> = Arc::new(MockProver::new());
        let contract =
            SharedSettlement::new(SettlementContract::new(empty_root(4), backend.clone()));
        (backend, Settler::new(contract, SettlerConfig::default()))
    }

    fn empty_batch(prev_root: [u8; 32]) -> BatchPublicInputs {
        BatchPublicInputs {
            prev_root,
            new_root: prev_root,
            transactions: vec![],
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let (_, settler) = settler();
        assert_eq!(settler.backoff(1), Duration::from_millis(1000));
        assert_eq!(settler.backoff(2), Duration::from_millis(2000));
        assert_eq!(settler.backoff(3), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_forge_advances_contract() {
        let (backend, settler) = settler();
        let inputs = empty_batch(empty_root(4));
        let proof = backend
            .prove(
                CircuitId::Batch,
                &PublicInputs::Batch(inputs.clone()),
                &PrivateWitness::Batch(BatchWitness::default()),
            )
            .unwrap();

        let receipt = settler.forge(proof.clone(), inputs.clone()).await.unwrap().unwrap();
        assert_eq!(receipt.batch_index, 1);
        assert_eq!(settler.contract().batch_index(), 1);

        let stale = settler.forge(proof, empty_batch([9u8; 32])).await.unwrap();
        assert!(matches!(stale, Err(SettlementError::StaleRoot { .. })));
    }
}
