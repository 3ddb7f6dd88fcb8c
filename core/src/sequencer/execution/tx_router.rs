//! Transaction Router
//!
//! Routes every transaction kind through the shared transition rules and
//! records, per transaction, the leaf changes the batch witness needs.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Transaction Router                          │
//! │                                                                  │
//! │  ┌──────────┐  ┌──────────────┐  ┌──────────────────────────┐   │
//! │  │ Deposit  │  │   Transfer   │  │  ConfidentialTransfer    │   │
//! │  │ (L1→L2)  │  │ (Schnorr sig)│  │  (well-formedness proof) │   │
//! │  └────┬─────┘  └──────┬───────┘  └────────────┬─────────────┘   │
//! │       │   precheck (parallel, stateless)      │                 │
//! │       ▼               ▼                       ▼                 │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │          apply (sequential, working copy)                │   │
//! │  │  • pure transition on touched accounts                   │   │
//! │  │  • add / update on the working accumulator, sender first │   │
//! │  │  • LeafChange {index, before, after, path} per account   │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;

use kestrel_account::Address;
use kestrel_crypto::EncryptedBalance;
use kestrel_prover::circuit::batch::InnerVerifier;
use kestrel_prover::{Authorization, ConfidentialStatement, LeafChange, ProvingBackend};
use kestrel_transaction::{
    ConfidentialTransfer, Transaction, ValidationError, apply, touched_addresses,
    verify_authorization,
};

use crate::sequencer::storage::{AccumulatorError, RollupState, StoredAccount};

// ============================================================================
// Execution Results
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Accumulator(#[from] AccumulatorError),
}

/// A transaction that made it into the working state.
#[derive(Debug, Clone)]
pub struct AppliedTransition {
    pub tx: Transaction,
    pub tx_hash: [u8; 32],
    pub authorization: Authorization,
    /// In `touched_addresses` order
    pub changes: Vec<LeafChange>,
}

#[derive(Debug, Clone)]
pub struct RejectedTx {
    /// Position in the input slice
    pub position: usize,
    pub tx_hash: [u8; 32],
    pub error: ValidationError,
}

/// Working copy of the rollup state a batch is built on.
#[derive(Debug, Clone)]
pub struct WorkingState {
    state: RollupState,
    touched: BTreeSet<Address>,
}

impl WorkingState {
    pub fn new(base: &RollupState) -> Self {
        Self {
            state: base.clone(),
            touched: BTreeSet::new(),
        }
    }

    pub fn root(&self) -> [u8; 32] {
        self.state.root()
    }

    pub fn state(&self) -> &RollupState {
        &self.state
    }

    /// Accounts written since the copy was taken.
    pub fn touched_accounts(&self) -> Vec<StoredAccount> {
        self.touched
            .iter()
            .filter_map(|address| self.state.stored(address))
            .collect()
    }

    pub fn into_state(self) -> RollupState {
        self.state
    }
}

#[derive(Debug)]
pub struct BatchExecution {
    pub prev_root: [u8; 32],
    pub working: WorkingState,
    pub applied: Vec<AppliedTransition>,
    pub rejected: Vec<RejectedTx>,
    /// Transactions that need a new leaf while the tree is full. They were
    /// left untouched and execution carried on past them.
    pub parked: Vec<(usize, AccumulatorError)>,
    /// Input position where execution stopped on any other accumulator
    /// refusal. That transaction and everything after it were left untouched.
    pub halted: Option<(usize, AccumulatorError)>,
}

impl BatchExecution {
    /// Number of input transactions this execution consumed.
    pub fn consumed(&self, input_len: usize) -> usize {
        self.halted.as_ref().map_or(input_len, |(position, _)| *position)
    }
}

// ============================================================================
// Transition Validator
// ============================================================================

pub struct TransitionValidator {
    backend: Arc<dyn ProvingBackend>,
    parallel: bool,
}

impl TransitionValidator {
    pub fn new(backend: Arc<dyn ProvingBackend>) -> Self {
        Self {
            backend,
            parallel: true,
        }
    }

    pub fn with_parallel_validation(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Stateless checks: address decodability and transfer signatures.
    pub fn precheck(&self, tx: &Transaction) -> Result<(), ValidationError> {
        verify_authorization(tx)
    }

    /// The proof of well-formedness is the authorization of a confidential
    /// transfer; it is checked against the sender's current ciphertext.
    pub fn authorize_confidential(
        &self,
        transfer: &ConfidentialTransfer,
        sender_before: EncryptedBalance,
    ) -> Result<(), ValidationError> {
        let statement = ConfidentialStatement::for_transfer(transfer, sender_before);
        if self
            .backend
            .verify_inner(&statement, &transfer.proof_of_well_formedness)
        {
            Ok(())
        } else {
            Err(ValidationError::BadSignature)
        }
    }

    /// Apply one prechecked transaction to the working copy.
    ///
    /// On error the working copy is left exactly as it was.
    pub fn apply_transaction(
        &self,
        tx: &Transaction,
        working: &mut WorkingState,
    ) -> Result<AppliedTransition, ApplyError> {
        let touched = touched_addresses(tx);
        let before: Vec<_> = touched
            .iter()
            .map(|address| working.state.get_account(address).copied())
            .collect();

        let after = apply(tx, &before)?;

        let authorization = match tx {
            Transaction::Deposit(_) => Authorization::L1Deposit,
            Transaction::Transfer(t) => Authorization::Signature(t.signature.clone()),
            Transaction::ConfidentialTransfer(c) => {
                let sender_before = before[0]
                    .as_ref()
                    .and_then(|a| a.encrypted_balance().copied())
                    .ok_or_else(|| ValidationError::malformed("sender has no encrypted balance"))?;
                self.authorize_confidential(c, sender_before)?;
                Authorization::WellFormedness(c.proof_of_well_formedness.clone())
            }
        };

        let leaves = after
            .iter()
            .map(|account| {
                account
                    .leaf_hash()
                    .map_err(|e| ValidationError::malformed(format!("leaf hash: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let created = before.iter().filter(|b| b.is_none()).count() as u64;
        if working.state.len() + created > working.state.capacity() {
            return Err(AccumulatorError::CapacityExceeded {
                capacity: working.state.capacity(),
            }
            .into());
        }

        let mut changes = Vec::with_capacity(after.len());
        for (account, leaf) in after.into_iter().zip(leaves) {
            let write = working.state.write_account(account, leaf)?;
            working.touched.insert(account.address);
            changes.push(LeafChange {
                index: write.index,
                before: write.before,
                after: account,
                path: write.path,
            });
        }

        Ok(AppliedTransition {
            tx: tx.clone(),
            tx_hash: tx.hash(),
            authorization,
            changes,
        })
    }

    /// Run a batch against a copy of `state`.
    ///
    /// Prechecks run in parallel; application is sequential in input order.
    /// `state` itself is never modified.
    pub fn execute_batch(&self, txs: &[Transaction], state: &RollupState) -> BatchExecution {
        let prechecks: Vec<Result<(), ValidationError>> = if self.parallel {
            txs.par_iter().map(|tx| self.precheck(tx)).collect()
        } else {
            txs.iter().map(|tx| self.precheck(tx)).collect()
        };

        let mut execution = BatchExecution {
            prev_root: state.root(),
            working: WorkingState::new(state),
            applied: Vec::new(),
            rejected: Vec::new(),
            parked: Vec::new(),
            halted: None,
        };

        for (position, (tx, precheck)) in txs.iter().zip(prechecks).enumerate() {
            let result = precheck
                .map_err(ApplyError::from)
                .and_then(|()| self.apply_transaction(tx, &mut execution.working));

            match result {
                Ok(applied) => execution.applied.push(applied),
                Err(ApplyError::Validation(error)) => {
                    tracing::debug!(position, %error, "transaction rejected");
                    execution.rejected.push(RejectedTx {
                        position,
                        tx_hash: tx.hash(),
                        error,
                    });
                }
                Err(ApplyError::Accumulator(error @ AccumulatorError::CapacityExceeded { .. })) => {
                    tracing::warn!(position, %error, "no free leaf, transaction parked");
                    execution.parked.push((position, error));
                }
                Err(ApplyError::Accumulator(error)) => {
                    tracing::error!(position, %error, "accumulator refused write, halting batch");
                    execution.halted = Some((position, error));
                    break;
                }
            }
        }

        execution
    }
}
