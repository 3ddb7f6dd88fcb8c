//! Batch Manager
//!
//! Single writer over the authoritative rollup state and the pending queue.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Batch Lifecycle                           │
//! │                                                                  │
//! │  submit / deposit        build_batch            commit           │
//! │  ┌────────────┐     ┌──────────────────┐    ┌────────────────┐  │
//! │  │  Pending   │────▶│   SealedBatch    │───▶│ Authoritative  │  │
//! │  │  (queue)   │     │ (frozen working  │    │ state + RocksDB│  │
//! │  └────────────┘     │  copy, witness)  │    └────────────────┘  │
//! │        ▲            └────────┬─────────┘                        │
//! │        │   discard           │                                  │
//! │        └─────────────────────┘  (offending tx dropped)          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing reaches the authoritative state or disk before the settlement
//! contract has accepted the batch.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use thiserror::Error;
use tracing::{info, warn};

use kestrel_account::{Account, Address, Balance};
use kestrel_crypto::MerkleProof;
use kestrel_prover::{BatchPublicInputs, BatchWitness, ProvingBackend};
use kestrel_transaction::{DepositEvent, Transaction, ValidationError, touched_addresses};

use super::tx_router::{RejectedTx, TransitionValidator, WorkingState};
use crate::sequencer::settlement::prover::{build_public_inputs, build_witness};
use crate::sequencer::storage::{AccumulatorError, BatchHeader, DbBatch, RocksDbStore, RollupState};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum transactions per batch
    pub max_transactions: usize,
    /// Maximum age of the oldest pending entry before a forced seal (seconds)
    pub max_batch_age_secs: u64,
    /// Minimum transactions before an age-triggered seal
    pub min_transactions: usize,
    /// Run stateless prechecks on the rayon pool
    pub parallel_validation: bool,
    /// Merkle accumulator depth
    pub tree_depth: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_transactions: 100,
            max_batch_age_secs: 60,
            min_transactions: 1,
            parallel_validation: true,
            tree_depth: 32,
        }
    }
}

// ============================================================================
// Batch State
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error(transparent)]
    Rejected(#[from] ValidationError),

    /// The tree is full and the transaction would need a new leaf
    #[error(transparent)]
    Capacity(#[from] AccumulatorError),

    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone)]
struct PendingTx {
    seq: u64,
    tx: Transaction,
    received_at: Instant,
}

/// A batch frozen for proving and settlement.
///
/// Holds the working copy it was executed on; the authoritative state only
/// changes when this is handed back to [`BatchManager::commit`].
#[derive(Debug)]
pub struct SealedBatch {
    pub id: u64,
    pub prev_root: [u8; 32],
    pub new_root: [u8; 32],
    pub public_inputs: BatchPublicInputs,
    pub witness: BatchWitness,
    /// Pending sequence numbers, aligned with `public_inputs.transactions`
    pub seqs: Vec<u64>,
    pub tx_hashes: Vec<[u8; 32]>,
    /// Rejected while building; already removed from the queue
    pub rejected: Vec<RejectedTx>,
    /// Set when the accumulator refused a write other than a new leaf
    pub halted: Option<AccumulatorError>,
    working: WorkingState,
}

impl SealedBatch {
    pub fn tx_count(&self) -> usize {
        self.seqs.len()
    }
}

// ============================================================================
// Batch Manager
// ============================================================================

pub struct BatchManager {
    db: Arc<RocksDbStore>,
    validator: TransitionValidator,
    config: BatchConfig,
    state: RollupState,
    pending: VecDeque<PendingTx>,
    /// Pending entries that need a leaf the full tree cannot give. They stay
    /// persisted but are skipped when building batches.
    parked: HashSet<u64>,
    next_batch_id: u64,
    /// Set once the tree refused a new leaf. Leaves are never freed, so this
    /// is not cleared while the process runs.
    capacity_error: Option<AccumulatorError>,
    /// Any other accumulator refusal; cleared by the next clean commit
    halt_error: Option<AccumulatorError>,
    committed_batches: u64,
    rejected_txs: u64,
    dropped_txs: u64,
}

impl BatchManager {
    /// Rebuild state and the pending queue from disk.
    pub fn new(
        db: Arc<RocksDbStore>,
        config: BatchConfig,
        backend: Arc<dyn ProvingBackend>,
    ) -> Result<Self> {
        let state = RollupState::rebuild(config.tree_depth, &db)?;
        let now = Instant::now();
        let pending: VecDeque<PendingTx> = db
            .load_pending()?
            .into_iter()
            .map(|(seq, tx)| PendingTx {
                seq,
                tx,
                received_at: now,
            })
            .collect();
        let next_batch_id = db.next_batch_id()?;

        info!(
            root = %hex::encode(state.root()),
            accounts = state.len(),
            pending = pending.len(),
            next_batch_id,
            "batch manager loaded"
        );

        let validator =
            TransitionValidator::new(backend).with_parallel_validation(config.parallel_validation);

        Ok(Self {
            db,
            validator,
            config,
            state,
            pending,
            parked: HashSet::new(),
            next_batch_id,
            capacity_error: None,
            halt_error: None,
            committed_batches: 0,
            rejected_txs: 0,
            dropped_txs: 0,
        })
    }

    pub fn root(&self) -> [u8; 32] {
        self.state.root()
    }

    pub fn get_account(&self, address: &Address) -> Option<Account> {
        self.state.get_account(address).copied()
    }

    pub fn get_merkle_proof(&self, address: &Address) -> Option<MerkleProof> {
        self.state.get_merkle_proof(address)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn capacity_error(&self) -> Option<&AccumulatorError> {
        self.capacity_error.as_ref()
    }

    pub fn halt_error(&self) -> Option<&AccumulatorError> {
        self.halt_error.as_ref()
    }

    fn is_full(&self) -> bool {
        self.state.len() >= self.state.capacity()
    }

    fn active(&self) -> impl Iterator<Item = &PendingTx> {
        self.pending.iter().filter(|p| !self.parked.contains(&p.seq))
    }

    /// Admit a client transaction into the pending queue.
    ///
    /// Checks run against the authoritative state only; the exact nonce and
    /// balance are re-checked when the batch is built.
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<[u8; 32], SubmitError> {
        if matches!(tx, Transaction::Deposit(_)) {
            return Err(ValidationError::malformed("deposits arrive from the settlement layer").into());
        }
        self.validator.precheck(&tx)?;

        let (Some(sender), Some(nonce)) = (tx.sender(), tx.nonce()) else {
            return Err(ValidationError::malformed("transaction has no sender").into());
        };
        let account = self
            .state
            .get_account(&sender)
            .ok_or(ValidationError::UnknownAddress(sender))?;

        if nonce < account.nonce {
            return Err(ValidationError::NonceMismatch {
                expected: account.nonce,
                got: nonce,
            }
            .into());
        }
        if let (Transaction::Transfer(t), Balance::Plain(available)) = (&tx, account.balance) {
            if t.data.amount > available {
                return Err(ValidationError::InsufficientBalance {
                    available,
                    required: t.data.amount,
                }
                .into());
            }
        }
        if self.is_full()
            && touched_addresses(&tx)
                .iter()
                .any(|address| self.state.get_account(address).is_none())
        {
            return Err(AccumulatorError::CapacityExceeded {
                capacity: self.state.capacity(),
            }
            .into());
        }

        let tx_hash = tx.hash();
        self.append(vec![tx], None)
            .map_err(|e| SubmitError::Storage(e.to_string()))?;
        Ok(tx_hash)
    }

    /// Queue deposit events observed on the settlement layer.
    ///
    /// The event cursor advances in the same write, so a restart neither
    /// loses nor replays them.
    pub fn enqueue_deposits(&mut self, events: Vec<DepositEvent>, cursor: u64) -> Result<()> {
        let txs = events.into_iter().map(Transaction::Deposit).collect();
        self.append(txs, Some(cursor))
    }

    fn append(&mut self, txs: Vec<Transaction>, cursor: Option<u64>) -> Result<()> {
        let seqs = self.db.append_pending(&txs, cursor)?;
        let now = Instant::now();
        for (seq, tx) in seqs.into_iter().zip(txs) {
            self.pending.push_back(PendingTx {
                seq,
                tx,
                received_at: now,
            });
        }
        Ok(())
    }

    /// Size or age threshold reached. Parked entries do not count.
    pub fn should_seal(&self) -> bool {
        let active = self.pending.len() - self.parked.len();
        if active >= self.config.max_transactions {
            return true;
        }

        let Some(oldest) = self.active().next() else {
            return false;
        };
        oldest.received_at.elapsed() >= Duration::from_secs(self.config.max_batch_age_secs)
            && active >= self.config.min_transactions
    }

    /// Execute the head of the queue on a working copy.
    ///
    /// Rejected transactions are removed from the queue here. Transactions
    /// that need a new leaf in a full tree are parked and left queued.
    /// Returns `None` when nothing could be applied.
    pub fn build_batch(&mut self) -> Result<Option<SealedBatch>> {
        let head: Vec<PendingTx> = self
            .active()
            .take(self.config.max_transactions)
            .cloned()
            .collect();
        if head.is_empty() {
            return Ok(None);
        }
        let txs: Vec<Transaction> = head.iter().map(|p| p.tx.clone()).collect();

        let execution = self.validator.execute_batch(&txs, &self.state);

        if !execution.rejected.is_empty() {
            let rejected_seqs: Vec<u64> = execution
                .rejected
                .iter()
                .map(|r| head[r.position].seq)
                .collect();
            for r in &execution.rejected {
                warn!(
                    tx_hash = %hex::encode(&r.tx_hash[..8]),
                    error = %r.error,
                    "transaction dropped"
                );
            }
            self.remove_pending(&rejected_seqs)?;
            self.rejected_txs += rejected_seqs.len() as u64;
        }

        if let Some((_, error)) = execution.parked.first() {
            warn!(
                parked = execution.parked.len(),
                error = %error,
                "tree full, new accounts wait for capacity"
            );
            self.capacity_error = Some(error.clone());
            self.parked
                .extend(execution.parked.iter().map(|(position, _)| head[*position].seq));
        }

        let halted = execution.halted.as_ref().map(|(_, e)| e.clone());
        if let Some(error) = &halted {
            self.halt_error = Some(error.clone());
        }

        if execution.applied.is_empty() {
            return Ok(None);
        }

        let skipped: HashSet<usize> = execution
            .rejected
            .iter()
            .map(|r| r.position)
            .chain(execution.parked.iter().map(|(position, _)| *position))
            .collect();
        let consumed = execution.consumed(txs.len());
        let seqs: Vec<u64> = (0..consumed)
            .filter(|i| !skipped.contains(i))
            .map(|i| head[i].seq)
            .collect();
        debug_assert_eq!(seqs.len(), execution.applied.len());

        let new_root = execution.working.root();
        let sealed = SealedBatch {
            id: self.next_batch_id,
            prev_root: execution.prev_root,
            new_root,
            public_inputs: build_public_inputs(execution.prev_root, new_root, &execution.applied),
            witness: build_witness(&execution.applied),
            seqs,
            tx_hashes: execution.applied.iter().map(|a| a.tx_hash).collect(),
            rejected: execution.rejected,
            halted,
            working: execution.working,
        };

        info!(
            batch_id = sealed.id,
            tx_count = sealed.tx_count(),
            rejected = sealed.rejected.len(),
            new_root = %hex::encode(new_root),
            "batch sealed"
        );
        Ok(Some(sealed))
    }

    /// Swap in the sealed working state and persist it atomically.
    pub fn commit(&mut self, sealed: SealedBatch, settlement_index: u64) -> Result<BatchHeader> {
        if sealed.prev_root != self.state.root() {
            bail!(
                "sealed batch {} was built on {} but state is at {}",
                sealed.id,
                hex::encode(sealed.prev_root),
                hex::encode(self.state.root())
            );
        }

        let header = BatchHeader {
            batch_id: sealed.id,
            prev_root: sealed.prev_root,
            new_root: sealed.new_root,
            tx_count: sealed.tx_count() as u32,
            settlement_index,
        };

        self.db.commit_batch(DbBatch {
            accounts: sealed.working.touched_accounts(),
            consumed_pending: sealed.seqs.clone(),
            root: sealed.new_root,
            header: Some(header.clone()),
        })?;

        let consumed: HashSet<u64> = sealed.seqs.iter().copied().collect();
        self.pending.retain(|p| !consumed.contains(&p.seq));
        self.state = sealed.working.into_state();
        self.next_batch_id = sealed.id + 1;
        self.committed_batches += 1;
        if sealed.halted.is_none() {
            self.halt_error = None;
        }

        info!(
            batch_id = header.batch_id,
            tx_count = header.tx_count,
            root = %hex::encode(header.new_root),
            "batch committed"
        );
        Ok(header)
    }

    /// Throw a sealed batch away. Its transactions stay queued, except the
    /// one at `drop` (a position in the batch), which is removed for good.
    ///
    /// Returns the hash of the dropped transaction.
    pub fn discard(&mut self, sealed: SealedBatch, drop: Option<usize>) -> Result<Option<[u8; 32]>> {
        let Some(position) = drop else {
            info!(batch_id = sealed.id, "batch discarded");
            return Ok(None);
        };
        let (Some(seq), Some(tx_hash)) = (sealed.seqs.get(position), sealed.tx_hashes.get(position))
        else {
            warn!(batch_id = sealed.id, position, "offending position outside batch");
            return Ok(None);
        };

        self.remove_pending(&[*seq])?;
        self.dropped_txs += 1;
        warn!(
            batch_id = sealed.id,
            position,
            tx_hash = %hex::encode(&tx_hash[..8]),
            "batch discarded, offending transaction dropped"
        );
        Ok(Some(*tx_hash))
    }

    fn remove_pending(&mut self, seqs: &[u64]) -> Result<()> {
        self.db.remove_pending(seqs)?;
        let gone: HashSet<u64> = seqs.iter().copied().collect();
        self.pending.retain(|p| !gone.contains(&p.seq));
        self.parked.retain(|seq| !gone.contains(seq));
        Ok(())
    }

    pub fn stats(&self) -> BatchManagerStats {
        BatchManagerStats {
            pending_txs: self.pending.len(),
            parked_txs: self.parked.len(),
            accounts: self.state.len(),
            root: self.state.root(),
            next_batch_id: self.next_batch_id,
            committed_batches: self.committed_batches,
            rejected_txs: self.rejected_txs,
            dropped_txs: self.dropped_txs,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchManagerStats {
    pub pending_txs: usize,
    /// Pending entries waiting for a free leaf
    pub parked_txs: usize,
    pub accounts: u64,
    pub root: [u8; 32],
    pub next_batch_id: u64,
    pub committed_batches: u64,
    pub rejected_txs: u64,
    pub dropped_txs: u64,
}
