//! Batch proving
//!
//! Splits applied transitions into the public inputs the settlement contract
//! sees and the private witness only the prover holds, and runs the proving
//! backend off the async runtime.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use kestrel_prover::{
    BatchPublicInputs, BatchWitness, CircuitId, Proof, ProofError, ProvingBackend, PrivateWitness,
    PublicInputs, PublicTransaction, StepWitness,
};

use crate::sequencer::execution::tx_router::AppliedTransition;

// ============================================================================
// Helper Functions
// ============================================================================

pub fn build_public_inputs(
    prev_root: [u8; 32],
    new_root: [u8; 32],
    transitions: &[AppliedTransition],
) -> BatchPublicInputs {
    BatchPublicInputs {
        prev_root,
        new_root,
        transactions: transitions
            .iter()
            .map(|t| PublicTransaction::from_transaction(&t.tx))
            .collect(),
    }
}

pub fn build_witness(transitions: &[AppliedTransition]) -> BatchWitness {
    BatchWitness {
        steps: transitions
            .iter()
            .map(|t| StepWitness {
                authorization: t.authorization.clone(),
                changes: t.changes.clone(),
            })
            .collect(),
    }
}

// ============================================================================
// Async Prover Service
// ============================================================================

/// Request to prove a batch
pub struct ProveRequest {
    pub batch_id: u64,
    pub inputs: BatchPublicInputs,
    pub witness: BatchWitness,
    pub reply: oneshot::Sender<Result<Proof, ProofError>>,
}

/// Background prover on a dedicated thread. Clones share the thread.
#[derive(Clone)]
pub struct ProverService {
    request_tx: mpsc::Sender<ProveRequest>,
    verification_key_hash: [u8; 32],
}

impl ProverService {
    pub fn start(backend: Arc<dyn ProvingBackend>) -> Self {
        let (request_tx, mut request_rx) = mpsc::channel::<ProveRequest>(32);
        let verification_key_hash = backend.verification_key_hash();

        // Proving is CPU bound; keep it off the tokio workers
        std::thread::spawn(move || {
            while let Some(request) = request_rx.blocking_recv() {
                let started = std::time::Instant::now();
                let public_inputs = PublicInputs::Batch(request.inputs);
                let witness = PrivateWitness::Batch(request.witness);
                let result = backend.prove(CircuitId::Batch, &public_inputs, &witness);
                debug!(
                    batch_id = request.batch_id,
                    ok = result.is_ok(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "prove request finished"
                );
                let _ = request.reply.send(result);
            }
            info!("prover thread exiting");
        });

        Self {
            request_tx,
            verification_key_hash,
        }
    }

    pub fn verification_key_hash(&self) -> [u8; 32] {
        self.verification_key_hash
    }

    /// Submit a batch for proving.
    ///
    /// The outer error means the service is gone; the inner one is the
    /// backend's verdict on the witness.
    pub async fn prove(
        &self,
        batch_id: u64,
        inputs: BatchPublicInputs,
        witness: BatchWitness,
    ) -> Result<Result<Proof, ProofError>> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.request_tx
            .send(ProveRequest {
                batch_id,
                inputs,
                witness,
                reply: reply_tx,
            })
            .await
            .context("prover service unavailable")?;

        reply_rx.await.context("prover crashed")
    }
}
