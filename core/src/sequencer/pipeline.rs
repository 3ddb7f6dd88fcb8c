//! Pipeline Orchestrator
//!
//! Connects deposit ingestion, the BatchManager, the ProverService and the
//! Settler into one settle-or-discard cycle.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Pipeline Orchestrator                            │
//! │                                                                          │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌───────────┐ │
//! │  │   Ingest    │───▶│    Seal     │───▶│    Prove    │───▶│   Forge   │ │
//! │  │  deposits   │    │ (working    │    │  (prover    │    │ (blocking │ │
//! │  │             │    │   copy)     │    │   thread)   │    │   pool)   │ │
//! │  └─────────────┘    └─────────────┘    └─────────────┘    └───────────┘ │
//! │                            │                  │                  │      │
//! │                            │             ProofError       accepted│     │
//! │                            ▼                  ▼                  ▼      │
//! │  ┌─────────────────────────────────────────────────────────────────────┐│
//! │  │  discard: working copy dropped, pending kept (offending tx removed) ││
//! │  │  commit:  working copy swapped in, RocksDB written atomically       ││
//! │  └─────────────────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use kestrel_account::{Account, Address};
use kestrel_crypto::MerkleProof;
use kestrel_prover::{MockProver, ProvingBackend, ReferenceBackend};
use kestrel_settlement::{SettlementError, SharedSettlement};
use kestrel_transaction::Transaction;

use crate::sequencer::bridge::DepositIngestor;
use crate::sequencer::execution::{
    BatchConfig, BatchManager, BatchManagerStats, SealedBatch, SubmitError,
};
use crate::sequencer::settlement::{ProverService, Settler, SettlerConfig};
use crate::sequencer::storage::{AccumulatorError, BatchHeader, RocksDbStore};

// ============================================================================
// Configuration
// ============================================================================

/// Prover mode selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProverMode {
    /// Checks the whole batch relation before proving (default)
    #[default]
    Reference,
    /// Binding tag only, no relation checks
    Mock,
}

impl ProverMode {
    /// Build the backend. The settlement contract must verify with the same
    /// instance the operator proves with.
    pub fn backend(self) -> Arc<dyn ProvingBackend> {
        match self {
            ProverMode::Reference => Arc::new(ReferenceBackend::default()),
            ProverMode::Mock => Arc::new(MockProver::new()),
        }
    }
}

impl std::str::FromStr for ProverMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reference" => Ok(ProverMode::Reference),
            "mock" => Ok(ProverMode::Mock),
            other => bail!("unknown prover mode '{other}' (expected reference or mock)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub prover_mode: ProverMode,
    /// Interval to poll for pipeline work (ms)
    pub poll_interval_ms: u64,
    pub batch_config: BatchConfig,
    pub settler_config: SettlerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prover_mode: ProverMode::Reference,
            poll_interval_ms: 100,
            batch_config: BatchConfig::default(),
            settler_config: SettlerConfig::default(),
        }
    }
}

// ============================================================================
// Pipeline State
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    /// Stopped making progress until an operator resumes
    Paused { reason: String },
    Stopping,
}

#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub batch_stats: BatchManagerStats,
    pub state: PipelineState,
    pub batches_proved: u64,
    pub batches_settled: u64,
    pub last_settled_batch: Option<u64>,
    /// Batches thrown away after a proving or settlement failure
    pub batches_discarded: u64,
    /// Consecutive settlement failures for the current head of the queue
    pub settlement_retries: u32,
    pub contract_root: [u8; 32],
    pub event_cursor: u64,
}

// ============================================================================
// Pipeline Commands
// ============================================================================

pub enum PipelineCommand {
    /// Submit a client transaction; replies with its hash
    Submit(Transaction, oneshot::Sender<Result<[u8; 32], SubmitError>>),
    GetAccount(Address, oneshot::Sender<Option<Account>>),
    GetMerkleProof(Address, oneshot::Sender<Option<MerkleProof>>),
    /// Run one cycle now regardless of thresholds; replies with the settled batch id
    Seal(oneshot::Sender<Result<Option<u64>>>),
    Stats(oneshot::Sender<PipelineStats>),
    Pause(String, oneshot::Sender<()>),
    Resume(oneshot::Sender<Result<()>>),
    Shutdown,
}

// ============================================================================
// Batch Cycle
// ============================================================================

/// How one sealed batch ended.
#[derive(Debug)]
pub enum CycleOutcome {
    Settled {
        header: BatchHeader,
        halted: Option<AccumulatorError>,
    },
    /// Proving failed; `dropped` is the offending transaction when the
    /// backend named one
    ProofFailed {
        batch_id: u64,
        reason: String,
        dropped: Option<[u8; 32]>,
    },
    StaleRoot {
        batch_id: u64,
        contract_root: [u8; 32],
        local_root: [u8; 32],
    },
    SettlementFailed {
        batch_id: u64,
        reason: String,
    },
}

/// Proves and settles one sealed batch, then commits or discards it.
///
/// Holds the BatchManager lock only for the final commit or discard, so
/// submissions keep queueing while the proof is produced.
#[derive(Clone)]
pub struct CycleWorker {
    batch_manager: Arc<Mutex<BatchManager>>,
    prover: ProverService,
    settler: Settler,
}

impl CycleWorker {
    pub async fn run(self, sealed: SealedBatch) -> Result<CycleOutcome> {
        let batch_id = sealed.id;

        let proof = match self
            .prover
            .prove(batch_id, sealed.public_inputs.clone(), sealed.witness.clone())
            .await?
        {
            Ok(proof) => proof,
            Err(e) => {
                error!(batch_id, error = %e, "proof generation failed");
                let dropped = self
                    .batch_manager
                    .lock()
                    .await
                    .discard(sealed, e.offending_tx())?;
                return Ok(CycleOutcome::ProofFailed {
                    batch_id,
                    reason: e.to_string(),
                    dropped,
                });
            }
        };
        debug!(batch_id, "batch proved");

        let public_inputs = sealed.public_inputs.clone();
        match self.settler.forge(proof, public_inputs).await? {
            Ok(receipt) => {
                let halted = sealed.halted.clone();
                let header = self
                    .batch_manager
                    .lock()
                    .await
                    .commit(sealed, receipt.batch_index)?;
                info!(
                    batch_id = header.batch_id,
                    settlement_index = receipt.batch_index,
                    tx_count = header.tx_count,
                    "batch settled"
                );
                Ok(CycleOutcome::Settled { header, halted })
            }
            Err(SettlementError::StaleRoot { current, submitted }) => {
                warn!(batch_id, %current, %submitted, "settlement root moved, rebuilding");
                let local_root = {
                    let mut manager = self.batch_manager.lock().await;
                    manager.discard(sealed, None)?;
                    manager.root()
                };
                Ok(CycleOutcome::StaleRoot {
                    batch_id,
                    contract_root: self.settler.contract_root(),
                    local_root,
                })
            }
            Err(e) => {
                self.batch_manager.lock().await.discard(sealed, None)?;
                Ok(CycleOutcome::SettlementFailed {
                    batch_id,
                    reason: e.to_string(),
                })
            }
        }
    }
}

// ============================================================================
// Pipeline Orchestrator
// ============================================================================

pub struct PipelineOrchestrator {
    worker: CycleWorker,
    ingestor: DepositIngestor,
    state: PipelineState,
    batches_proved: u64,
    batches_settled: u64,
    last_settled_batch: Option<u64>,
    batches_discarded: u64,
    settlement_retries: u32,
    /// Earliest time the next resubmission may run
    retry_after: Option<Instant>,
}

impl PipelineOrchestrator {
    /// `backend` must be the verifier the contract was created with.
    pub fn new(
        db: Arc<RocksDbStore>,
        config: PipelineConfig,
        contract: SharedSettlement,
        backend: Arc<dyn ProvingBackend>,
    ) -> Result<Self> {
        let batch_manager = BatchManager::new(db.clone(), config.batch_config, backend.clone())
            .context("failed to load rollup state")?;
        let local_root = batch_manager.root();
        let ingestor = DepositIngestor::new(contract.clone(), &db)?;
        let prover = ProverService::start(backend);
        let settler = Settler::new(contract, config.settler_config);

        info!(
            vk = %hex::encode(prover.verification_key_hash()),
            cursor = ingestor.cursor(),
            "pipeline initialized"
        );

        let mut orchestrator = Self {
            worker: CycleWorker {
                batch_manager: Arc::new(Mutex::new(batch_manager)),
                prover,
                settler,
            },
            ingestor,
            state: PipelineState::Running,
            batches_proved: 0,
            batches_settled: 0,
            last_settled_batch: None,
            batches_discarded: 0,
            settlement_retries: 0,
            retry_after: None,
        };

        let contract_root = orchestrator.worker.settler.contract_root();
        if local_root != contract_root {
            orchestrator.pause(format!(
                "local root {} does not match settlement root {}",
                hex::encode(local_root),
                hex::encode(contract_root)
            ));
        }
        Ok(orchestrator)
    }

    pub fn batch_manager(&self) -> Arc<Mutex<BatchManager>> {
        self.worker.batch_manager.clone()
    }

    pub fn worker(&self) -> CycleWorker {
        self.worker.clone()
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Run one cycle to completion. Returns the id of the batch settled by
    /// it, if any.
    ///
    /// With `force` the seal thresholds are ignored.
    pub async fn tick(&mut self, force: bool) -> Result<Option<u64>> {
        let Some(sealed) = self.seal_next(force).await? else {
            return Ok(None);
        };
        let outcome = self.worker.clone().run(sealed).await?;
        Ok(self.record(outcome))
    }

    /// Ingest new deposits and seal the next batch if one is due.
    pub async fn seal_next(&mut self, force: bool) -> Result<Option<SealedBatch>> {
        if self.state != PipelineState::Running {
            return Ok(None);
        }
        if let Some(deadline) = self.retry_after {
            if !force && Instant::now() < deadline {
                return Ok(None);
            }
        }

        let mut manager = self.worker.batch_manager.lock().await;
        self.ingestor.poll(&mut manager)?;

        if !force && !manager.should_seal() {
            return Ok(None);
        }
        let sealed = manager.build_batch()?;
        if sealed.is_none() {
            if let Some(fault) = manager.halt_error().cloned() {
                drop(manager);
                self.pause(format!("cannot build batch: {fault}"));
            }
        }
        Ok(sealed)
    }

    /// Fold the outcome of a cycle into the pipeline state. Returns the id of
    /// the settled batch.
    pub fn record(&mut self, outcome: CycleOutcome) -> Option<u64> {
        match outcome {
            CycleOutcome::Settled { header, halted } => {
                self.batches_proved += 1;
                self.batches_settled += 1;
                self.last_settled_batch = Some(header.batch_id);
                self.settlement_retries = 0;
                self.retry_after = None;
                if let Some(fault) = halted {
                    self.pause(format!("accumulator refused a write: {fault}"));
                }
                Some(header.batch_id)
            }
            CycleOutcome::ProofFailed {
                batch_id,
                reason,
                dropped,
            } => {
                self.batches_discarded += 1;
                if dropped.is_none() {
                    self.settlement_failed(batch_id, &reason);
                }
                None
            }
            CycleOutcome::StaleRoot {
                contract_root,
                local_root,
                ..
            } => {
                self.batches_proved += 1;
                self.batches_discarded += 1;
                if contract_root != local_root {
                    self.pause(format!(
                        "settlement root {} diverged from local root {}",
                        hex::encode(contract_root),
                        hex::encode(local_root)
                    ));
                }
                None
            }
            CycleOutcome::SettlementFailed { batch_id, reason } => {
                self.batches_proved += 1;
                self.batches_discarded += 1;
                self.settlement_failed(batch_id, &reason);
                None
            }
        }
    }

    fn settlement_failed(&mut self, batch_id: u64, reason: &str) {
        self.settlement_retries += 1;
        let max_retries = self.worker.settler.config().max_retries;
        warn!(
            batch_id,
            error = %reason,
            retry = self.settlement_retries,
            max_retries,
            "settlement failed"
        );

        if self.settlement_retries >= max_retries {
            self.pause(format!(
                "settlement failed {} times for batch {}: {}",
                self.settlement_retries, batch_id, reason
            ));
            return;
        }
        self.retry_after =
            Some(Instant::now() + self.worker.settler.backoff(self.settlement_retries));
    }

    pub async fn stats(&self) -> PipelineStats {
        let batch_stats = self.worker.batch_manager.lock().await.stats();
        PipelineStats {
            batch_stats,
            state: self.state.clone(),
            batches_proved: self.batches_proved,
            batches_settled: self.batches_settled,
            last_settled_batch: self.last_settled_batch,
            batches_discarded: self.batches_discarded,
            settlement_retries: self.settlement_retries,
            contract_root: self.worker.settler.contract_root(),
            event_cursor: self.ingestor.cursor(),
        }
    }

    pub fn pause(&mut self, reason: String) {
        warn!(reason = %reason, "pipeline paused");
        self.state = PipelineState::Paused { reason };
    }

    pub fn resume(&mut self) -> Result<()> {
        match &self.state {
            PipelineState::Paused { .. } => {
                info!("pipeline resumed");
                self.state = PipelineState::Running;
                self.settlement_retries = 0;
                self.retry_after = None;
                Ok(())
            }
            PipelineState::Running => Ok(()),
            PipelineState::Stopping => Err(anyhow!("cannot resume stopping pipeline")),
        }
    }
}

// ============================================================================
// Pipeline Service
// ============================================================================

type SealReply = oneshot::Sender<Result<Option<u64>>>;

/// The batch between seal and commit/discard. At most one exists.
struct InFlight {
    batch_id: u64,
    reply: Option<SealReply>,
}

/// Seal the next batch and hand it to a worker task.
///
/// Replies right away when nothing was sealed.
async fn start_cycle(
    orchestrator: &mut PipelineOrchestrator,
    force: bool,
    reply: Option<SealReply>,
    outcome_tx: &mpsc::Sender<Result<CycleOutcome>>,
) -> Option<InFlight> {
    let refusal = match orchestrator.state() {
        PipelineState::Running => None,
        PipelineState::Paused { reason } => Some(anyhow!("pipeline paused: {reason}")),
        PipelineState::Stopping => Some(anyhow!("pipeline stopping")),
    };
    let sealed = match refusal {
        Some(e) if reply.is_some() => Err(e),
        _ => orchestrator.seal_next(force).await,
    };

    match sealed {
        Ok(Some(sealed)) => {
            let batch_id = sealed.id;
            let worker = orchestrator.worker();
            let outcome_tx = outcome_tx.clone();
            tokio::spawn(async move {
                let outcome = worker.run(sealed).await;
                let _ = outcome_tx.send(outcome).await;
            });
            Some(InFlight { batch_id, reply })
        }
        Ok(None) => {
            if let Some(reply) = reply {
                let _ = reply.send(Ok(None));
            }
            None
        }
        Err(e) => {
            match reply {
                Some(reply) => {
                    let _ = reply.send(Err(e));
                }
                None => error!(error = %e, "pipeline tick error"),
            }
            None
        }
    }
}

/// Handle to the pipeline task
pub struct PipelineService {
    command_tx: mpsc::Sender<PipelineCommand>,
}

impl PipelineService {
    pub fn start(
        db: Arc<RocksDbStore>,
        config: PipelineConfig,
        contract: SharedSettlement,
        backend: Arc<dyn ProvingBackend>,
    ) -> Result<Self> {
        let (command_tx, mut command_rx) = mpsc::channel::<PipelineCommand>(1000);
        let poll_interval = Duration::from_millis(config.poll_interval_ms.max(1));
        let mut orchestrator = PipelineOrchestrator::new(db, config, contract, backend)?;
        let batch_manager = orchestrator.batch_manager();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            let (outcome_tx, mut outcome_rx) = mpsc::channel::<Result<CycleOutcome>>(1);
            let mut in_flight: Option<InFlight> = None;
            // Seal commands that arrived while a batch was in flight
            let mut queued_seals: VecDeque<SealReply> = VecDeque::new();

            loop {
                tokio::select! {
                    Some(cmd) = command_rx.recv() => {
                        match cmd {
                            PipelineCommand::Submit(tx, reply) => {
                                let result = batch_manager.lock().await.submit_transaction(tx);
                                let _ = reply.send(result);
                            }
                            PipelineCommand::GetAccount(address, reply) => {
                                let _ = reply.send(batch_manager.lock().await.get_account(&address));
                            }
                            PipelineCommand::GetMerkleProof(address, reply) => {
                                let _ = reply.send(batch_manager.lock().await.get_merkle_proof(&address));
                            }
                            PipelineCommand::Seal(reply) => {
                                if in_flight.is_some() {
                                    queued_seals.push_back(reply);
                                } else {
                                    in_flight =
                                        start_cycle(&mut orchestrator, true, Some(reply), &outcome_tx).await;
                                }
                            }
                            PipelineCommand::Stats(reply) => {
                                let _ = reply.send(orchestrator.stats().await);
                            }
                            PipelineCommand::Pause(reason, reply) => {
                                orchestrator.pause(reason);
                                let _ = reply.send(());
                            }
                            PipelineCommand::Resume(reply) => {
                                let _ = reply.send(orchestrator.resume());
                            }
                            PipelineCommand::Shutdown => {
                                info!("pipeline shutting down");
                                orchestrator.state = PipelineState::Stopping;
                                let waiting = in_flight
                                    .take()
                                    .and_then(|cycle| cycle.reply)
                                    .into_iter()
                                    .chain(queued_seals.drain(..));
                                for reply in waiting {
                                    let _ = reply.send(Err(anyhow!("pipeline stopping")));
                                }
                                break;
                            }
                        }
                    }
                    Some(outcome) = outcome_rx.recv() => {
                        let cycle = in_flight.take();
                        let result = outcome.map(|outcome| orchestrator.record(outcome));
                        if let Err(e) = &result {
                            error!(
                                batch_id = cycle.as_ref().map(|c| c.batch_id),
                                error = %e,
                                "batch cycle failed"
                            );
                        }
                        if let Some(reply) = cycle.and_then(|c| c.reply) {
                            let _ = reply.send(result);
                        }

                        while in_flight.is_none() {
                            let Some(reply) = queued_seals.pop_front() else {
                                break;
                            };
                            in_flight =
                                start_cycle(&mut orchestrator, true, Some(reply), &outcome_tx).await;
                        }
                    }
                    _ = ticker.tick(), if in_flight.is_none() => {
                        in_flight = start_cycle(&mut orchestrator, false, None, &outcome_tx).await;
                    }
                }
            }
        });

        Ok(Self { command_tx })
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> PipelineCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(build(reply_tx))
            .await
            .context("pipeline unavailable")?;
        reply_rx.await.context("pipeline crashed")
    }

    /// Submit a transaction. The outer error means the pipeline is gone.
    pub async fn submit(&self, tx: Transaction) -> Result<Result<[u8; 32], SubmitError>> {
        self.request(|reply| PipelineCommand::Submit(tx, reply)).await
    }

    pub async fn get_account(&self, address: Address) -> Result<Option<Account>> {
        self.request(|reply| PipelineCommand::GetAccount(address, reply))
            .await
    }

    pub async fn get_merkle_proof(&self, address: Address) -> Result<Option<MerkleProof>> {
        self.request(|reply| PipelineCommand::GetMerkleProof(address, reply))
            .await
    }

    /// Seal and settle whatever is pending now
    pub async fn seal(&self) -> Result<Option<u64>> {
        self.request(PipelineCommand::Seal).await?
    }

    pub async fn stats(&self) -> Result<PipelineStats> {
        self.request(PipelineCommand::Stats).await
    }

    pub async fn pause(&self, reason: String) -> Result<()> {
        self.request(|reply| PipelineCommand::Pause(reason, reply))
            .await
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(PipelineCommand::Resume).await?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(PipelineCommand::Shutdown)
            .await
            .context("pipeline unavailable")?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
