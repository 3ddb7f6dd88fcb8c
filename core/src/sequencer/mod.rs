pub mod bridge;
pub mod execution;
pub mod pipeline;
pub mod settlement;
pub mod storage;

pub use bridge::DepositIngestor;
pub use execution::{
    BatchConfig, BatchManager, BatchManagerStats, SealedBatch, SubmitError, TransitionValidator,
};
pub use pipeline::{
    CycleOutcome, CycleWorker, PipelineConfig, PipelineOrchestrator, PipelineService,
    PipelineState, PipelineStats, ProverMode,
};
pub use settlement::{ProverService, Settler, SettlerConfig};
pub use storage::{BatchHeader, MerkleAccumulator, RocksDbStore, RollupState};

#[cfg(test)]
mod tests;
